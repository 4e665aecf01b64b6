//! Asset host abstraction layer
//!
//! This module defines the `AssetHost` trait, which is the single network boundary of the relay:
//! one call per client request, no retries, no partial state kept on failure.

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::config::{AssetHostConfig, HostCredentials};
use crate::types::ResourceType;

pub mod cloudinary;

/// Create the asset host client from configuration
pub fn create_host(config: &AssetHostConfig) -> Result<Box<dyn AssetHost>, HostError> {
    Ok(Box::new(cloudinary::CloudinaryHost::new(config)?))
}

/// Errors that can occur while handing an upload to the asset host
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Asset host request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Asset host rejected the upload with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Asset host returned an unusable response: {0}")]
    InvalidResponse(String),
}

impl HostError {
    /// Human-readable detail for API clients. Never contains credentials.
    pub fn detail(&self) -> String {
        match self {
            HostError::Transport(e) if e.is_timeout() => "Asset host did not respond in time".to_string(),
            HostError::Transport(e) if e.is_connect() => "Could not connect to the asset host".to_string(),
            HostError::Transport(_) => "Network error while contacting the asset host".to_string(),
            HostError::Rejected { message, .. } => message.clone(),
            HostError::InvalidResponse(message) => message.clone(),
        }
    }
}

/// One file, classified and named, ready to be sent to the host.
#[derive(Debug, Clone)]
pub struct HostUpload {
    pub bytes: Bytes,
    /// Filename as sent by the client, used for the multipart part
    pub filename: String,
    pub content_type: Option<String>,
    pub resource_type: ResourceType,
    /// Folder (namespace) at the host
    pub folder: String,
    /// Public id without folder
    pub public_id: String,
    /// Target format for image and video assets
    pub format: Option<String>,
}

/// What the host reports after storing an asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    pub secure_url: Url,
    pub public_id: Option<String>,
    pub bytes: Option<u64>,
}

/// Abstract asset host interface
///
/// Implementors store one file per call and report where it can be fetched.
#[async_trait]
pub trait AssetHost: Send + Sync {
    /// Store a file at the host.
    ///
    /// This is a single attempt: implementations must not retry, because the relay guarantees
    /// at-most-once delivery per client request.
    async fn upload(&self, credentials: &HostCredentials, upload: HostUpload) -> Result<StoredAsset, HostError>;

    /// URL of a first-page rendering of a paginated document stored at `secure_url`.
    ///
    /// Best effort: `None` when the URL does not have the shape the host's transformation needs.
    fn page_preview(&self, secure_url: &Url) -> Option<Url>;
}
