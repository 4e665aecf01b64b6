//! HTTP client for the upload relay.

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use url::Url;

use super::progress::{ProgressTracker, tracked_body};
use super::{BearerToken, SelectedFile, WidgetError};
use crate::types::UploadResult;

/// Error body of the relay. `error` carries the asset host's detail when there is one.
#[derive(Debug, Default, Deserialize)]
struct RelayErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Sends files to one relay endpoint, e.g. `https://admin.example.com/upload/products`.
#[derive(Debug, Clone)]
pub struct RelayClient {
    client: reqwest::Client,
    endpoint: Url,
}

impl RelayClient {
    pub fn new(endpoint: Url) -> Result<Self, WidgetError> {
        crate::install_crypto_provider();
        let client = reqwest::Client::builder().build()?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: reqwest::Client, endpoint: Url) -> Self {
        Self { client, endpoint }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Send one file as the `file` part of a multipart POST.
    ///
    /// Progress is recorded as the body is handed to the transport. A `2xx` answer only counts
    /// as success when it carries an absolute `secure_url`.
    pub async fn upload(
        &self,
        credential: &BearerToken,
        file: SelectedFile,
        progress: &ProgressTracker,
    ) -> Result<UploadResult, WidgetError> {
        let length = file.bytes.len() as u64;
        let body = reqwest::Body::wrap_stream(tracked_body(file.bytes, progress.clone()));
        let mut part = Part::stream_with_length(body, length).file_name(file.name);
        if let Some(content_type) = &file.content_type {
            part = part.mime_str(content_type)?;
        }
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(credential.expose())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let parsed: RelayErrorBody = serde_json::from_slice(&body).unwrap_or_default();
            let message = parsed
                .error
                .or(parsed.message)
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| super::FALLBACK_ERROR_MESSAGE.to_string());
            tracing::warn!(status = status.as_u16(), message = %message, "Relay rejected upload");
            return Err(WidgetError::Server {
                status: status.as_u16(),
                message,
            });
        }

        let result: UploadResult = serde_json::from_slice(&body)
            .map_err(|e| WidgetError::InvalidResponse(format!("Upload response is not a valid envelope: {e}")))?;
        if !matches!(result.secure_url.scheme(), "http" | "https") {
            return Err(WidgetError::InvalidResponse(format!(
                "secure_url '{}' is not a web address",
                result.secure_url
            )));
        }

        progress.complete();
        Ok(result)
    }
}
