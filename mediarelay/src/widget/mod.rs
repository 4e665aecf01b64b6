//! Client-side upload widget.
//!
//! An [`UploadWidget`] turns one drop or picker selection into one multipart POST against the
//! relay:
//!
//! 1. The selection is checked against the configured [`FileFilter`]. Rejected selections never
//!    touch the network.
//! 2. Images the compressor can decode are shrunk on a blocking worker thread; everything else is
//!    sent byte for byte.
//! 3. The file is posted with the injected [`BearerToken`]. Progress is published on a watch
//!    channel and mirrored into [`WidgetState::Uploading`].
//! 4. On success the completion callback receives the [`UploadResult`] exactly once. On failure
//!    the state holds a message and the widget accepts the next drop.
//!
//! Only one upload runs at a time: a drop while an upload is in flight fails with
//! [`WidgetError::Busy`].
//!
//! ```no_run
//! use mediarelay::types::FileFilter;
//! use mediarelay::widget::{BearerToken, RelayClient, SelectedFile, UploadWidget, WidgetConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RelayClient::new("https://admin.example.com/upload/products".parse()?)?;
//! let config = WidgetConfig::builder().filter(FileFilter::images_or_pdf()).show_preview(true).build();
//! let widget = UploadWidget::new(config, client, BearerToken::new("session-token"));
//!
//! let file = SelectedFile::from_path("catalog/red-shoe.jpg").await?;
//! widget
//!     .drop_files(vec![file], |result| println!("stored at {}", result.secure_url))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod compress;
pub mod progress;

pub use client::RelayClient;
pub use compress::{CompressionOptions, ImageCompressor, JpegCompressor};
pub use progress::ProgressTracker;

use bon::Builder;
use bytes::Bytes;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use url::Url;

use crate::types::{FileFilter, ResourceType, UploadResult};

/// Message shown when a failure carries no usable detail.
pub const FALLBACK_ERROR_MESSAGE: &str = "Error uploading the file";

#[derive(Debug, thiserror::Error)]
pub enum WidgetError {
    #[error("No file was selected")]
    NoFile,

    #[error("Only one file can be uploaded at a time")]
    TooManyFiles,

    #[error("The selected file format is not supported.")]
    UnsupportedFormat { content_type: Option<String> },

    #[error("An upload is already in progress")]
    Busy,

    #[error("Image compression failed: {0}")]
    Compression(String),

    #[error("Could not read the selected file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request to the upload relay failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Upload relay answered {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Upload relay returned an unusable response: {0}")]
    InvalidResponse(String),
}

impl WidgetError {
    /// Selections refused before any network traffic.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            WidgetError::NoFile | WidgetError::TooManyFiles | WidgetError::UnsupportedFormat { .. }
        )
    }

    /// Message suitable for showing next to the drop zone.
    pub fn user_message(&self) -> String {
        match self {
            WidgetError::Server { message, .. } => message.clone(),
            WidgetError::Compression(_)
            | WidgetError::Io(_)
            | WidgetError::Transport(_)
            | WidgetError::InvalidResponse(_) => FALLBACK_ERROR_MESSAGE.to_string(),
            _ => self.to_string(),
        }
    }
}

/// Bearer credential injected by the form host. Never printed.
#[derive(Clone)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(****)")
    }
}

/// A file picked by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub name: String,
    /// Declared MIME type, as a browser would report it
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, content_type: Option<&str>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.map(str::to_string),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, guessing its MIME type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, WidgetError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| crate::naming::FALLBACK_BASE_NAME.to_string());
        let content_type = mime_guess::from_path(path).first().map(|m| m.essence_str().to_string());

        Ok(Self {
            name,
            content_type,
            bytes: bytes.into(),
        })
    }
}

#[derive(Debug, Clone, Builder)]
pub struct WidgetConfig {
    /// MIME types the drop zone accepts
    #[builder(default)]
    pub filter: FileFilter,
    #[builder(default)]
    pub compression: CompressionOptions,
    /// Accept several files in one drop, uploaded one after another
    #[builder(default = false)]
    pub allow_multiple: bool,
    /// Show the uploaded image inline once complete
    #[builder(default = false)]
    pub show_preview: bool,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetState {
    Idle,
    Compressing,
    Uploading { progress: u8 },
    Complete {
        result: UploadResult,
        /// Set for images when previews are enabled
        inline_preview: Option<Url>,
    },
    Failed { message: String },
    Rejected { message: String },
}

impl WidgetState {
    pub fn is_busy(&self) -> bool {
        matches!(self, WidgetState::Compressing | WidgetState::Uploading { .. })
    }
}

/// Clears the busy flag however the upload ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct UploadWidget {
    config: WidgetConfig,
    client: RelayClient,
    credential: BearerToken,
    compressor: Arc<dyn ImageCompressor>,
    state: watch::Sender<WidgetState>,
    progress: ProgressTracker,
    busy: AtomicBool,
}

impl UploadWidget {
    pub fn new(config: WidgetConfig, client: RelayClient, credential: BearerToken) -> Self {
        let (state, _) = watch::channel(WidgetState::Idle);
        Self {
            config,
            client,
            credential,
            compressor: Arc::new(JpegCompressor),
            state,
            progress: ProgressTracker::new(),
            busy: AtomicBool::new(false),
        }
    }

    pub fn with_compressor(mut self, compressor: Arc<dyn ImageCompressor>) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn config(&self) -> &WidgetConfig {
        &self.config
    }

    pub fn state(&self) -> WidgetState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WidgetState> {
        self.state.subscribe()
    }

    pub fn progress(&self) -> watch::Receiver<u8> {
        self.progress.subscribe()
    }

    /// Handle a drop or picker event.
    ///
    /// `on_complete` is called once per stored file, after the relay confirmed it. It is never
    /// called for a rejected or failed upload. With several files, the first failure stops the
    /// remaining ones.
    #[tracing::instrument(skip_all, fields(files = files.len()))]
    pub async fn drop_files<F>(&self, files: Vec<SelectedFile>, mut on_complete: F) -> Result<Vec<UploadResult>, WidgetError>
    where
        F: FnMut(UploadResult),
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Drop ignored, an upload is already in flight");
            return Err(WidgetError::Busy);
        }
        let _guard = BusyGuard(&self.busy);

        if let Err(e) = self.check_selection(&files) {
            tracing::debug!(error = %e, "Selection rejected");
            self.state.send_replace(WidgetState::Rejected { message: e.user_message() });
            return Err(e);
        }

        let mut results = Vec::with_capacity(files.len());
        for file in files {
            match self.upload_one(file).await {
                Ok(result) => {
                    let inline_preview = (self.config.show_preview && result.resource_type == ResourceType::Image)
                        .then(|| result.preview.clone().unwrap_or_else(|| result.secure_url.clone()));
                    self.state.send_replace(WidgetState::Complete {
                        result: result.clone(),
                        inline_preview,
                    });
                    on_complete(result.clone());
                    results.push(result);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Upload failed");
                    self.state.send_replace(WidgetState::Failed { message: e.user_message() });
                    return Err(e);
                }
            }
        }

        Ok(results)
    }

    fn check_selection(&self, files: &[SelectedFile]) -> Result<(), WidgetError> {
        if files.is_empty() {
            return Err(WidgetError::NoFile);
        }
        if files.len() > 1 && !self.config.allow_multiple {
            return Err(WidgetError::TooManyFiles);
        }
        if let Some(file) = files
            .iter()
            .find(|f| !self.config.filter.accepts(f.content_type.as_deref()))
        {
            return Err(WidgetError::UnsupportedFormat {
                content_type: file.content_type.clone(),
            });
        }
        Ok(())
    }

    async fn upload_one(&self, file: SelectedFile) -> Result<UploadResult, WidgetError> {
        self.progress.reset();

        let file = if self.compressor.handles(file.content_type.as_deref()) {
            self.state.send_replace(WidgetState::Compressing);
            let compressor = self.compressor.clone();
            let options = self.config.compression.clone();
            tokio::task::spawn_blocking(move || compressor.compress(file, &options))
                .await
                .map_err(|e| WidgetError::Compression(format!("compression worker stopped: {e}")))??
        } else {
            file
        };

        self.state.send_replace(WidgetState::Uploading { progress: 0 });
        tracing::info!(name = %file.name, size = file.bytes.len(), endpoint = %self.client.endpoint(), "Uploading file");

        let mut readings = self.progress.subscribe();
        let upload = self.client.upload(&self.credential, file, &self.progress);
        tokio::pin!(upload);

        loop {
            tokio::select! {
                outcome = &mut upload => return outcome,
                Ok(()) = readings.changed() => {
                    let progress = *readings.borrow_and_update();
                    self.state.send_replace(WidgetState::Uploading { progress });
                }
            }
        }
    }
}
