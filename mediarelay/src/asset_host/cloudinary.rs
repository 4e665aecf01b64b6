//! Cloudinary upload API client.
//!
//! Uploads are signed requests against `{api_base_url}/v1_1/{cloud_name}/{resource_type}/upload`.
//! The signature is the SHA-256 hex digest of the alphabetically sorted `key=value` pairs joined
//! with `&`, followed by the API secret. `file`, `api_key`, `signature` and
//! `signature_algorithm` are not part of the signed string.
//!
//! See: <https://cloudinary.com/documentation/authentication_signatures>

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use url::Url;

use crate::asset_host::{AssetHost, HostError, HostUpload, StoredAsset};
use crate::config::{AssetHostConfig, HostCredentials};
use crate::types::ResourceType;

/// Transformation inserted into a delivery URL to render page 1 of a document as a thumbnail.
pub const PAGE_PREVIEW_TRANSFORMATION: &str = "w_300,h_400,pg_1";

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    public_id: Option<String>,
    bytes: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

pub struct CloudinaryHost {
    client: reqwest::Client,
    base_url: Url,
}

impl CloudinaryHost {
    pub fn new(config: &AssetHostConfig) -> Result<Self, HostError> {
        crate::install_crypto_provider();

        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.clone(),
        })
    }

    fn upload_endpoint(&self, cloud_name: &str, resource_type: ResourceType) -> Url {
        let mut url = self.base_url.clone();
        // Only cannot-be-a-base URLs refuse segments, and config validation rejects those
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["v1_1", cloud_name, resource_type.as_str(), "upload"]);
        }
        url
    }
}

/// Compute the request signature for a set of upload parameters.
pub fn sign(params: &BTreeMap<&str, String>, api_secret: &str) -> String {
    let to_sign = params
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    hex::encode(Sha256::digest(format!("{to_sign}{api_secret}").as_bytes()))
}

#[async_trait]
impl AssetHost for CloudinaryHost {
    async fn upload(&self, credentials: &HostCredentials, upload: HostUpload) -> Result<StoredAsset, HostError> {
        let mut params = BTreeMap::new();
        params.insert("folder", upload.folder.clone());
        params.insert("public_id", upload.public_id.clone());
        params.insert("timestamp", Utc::now().timestamp().to_string());
        if let Some(format) = &upload.format {
            params.insert("format", format.clone());
        }
        let signature = sign(&params, &credentials.api_secret);

        let size = upload.bytes.len() as u64;
        let part = Part::stream_with_length(reqwest::Body::from(upload.bytes), size).file_name(upload.filename.clone());
        let part = match upload
            .content_type
            .as_deref()
            .filter(|ct| ct.parse::<mime_guess::mime::Mime>().is_ok())
        {
            Some(content_type) => part.mime_str(content_type)?,
            None => part,
        };

        let mut form = Form::new()
            .text("api_key", credentials.api_key.clone())
            .text("signature", signature)
            .text("signature_algorithm", "sha256");
        for (key, value) in params {
            form = form.text(key, value);
        }
        let form = form.part("file", part);

        let endpoint = self.upload_endpoint(&credentials.cloud_name, upload.resource_type);
        tracing::info!(
            resource_type = %upload.resource_type,
            folder = %upload.folder,
            public_id = %upload.public_id,
            size = size,
            "Uploading asset to Cloudinary"
        );

        let response = self.client.post(endpoint).multipart(form).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorEnvelope>(&body)
                .map(|envelope| envelope.error.message)
                .unwrap_or_else(|_| format!("HTTP {status}"));
            tracing::warn!(status = status.as_u16(), message = %message, "Cloudinary rejected upload");
            return Err(HostError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: UploadResponse =
            serde_json::from_slice(&body).map_err(|e| HostError::InvalidResponse(format!("Malformed upload response: {e}")))?;

        let secure_url = parsed
            .secure_url
            .ok_or_else(|| HostError::InvalidResponse("Upload response has no secure_url".to_string()))?;
        let secure_url = Url::parse(&secure_url)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .ok_or_else(|| HostError::InvalidResponse(format!("secure_url '{secure_url}' is not an absolute URL")))?;

        tracing::debug!(secure_url = %secure_url, public_id = ?parsed.public_id, "Cloudinary upload complete");

        Ok(StoredAsset {
            secure_url,
            public_id: parsed.public_id,
            bytes: parsed.bytes,
        })
    }

    fn page_preview(&self, secure_url: &Url) -> Option<Url> {
        insert_transformation(secure_url, PAGE_PREVIEW_TRANSFORMATION)
    }
}

/// Insert a transformation segment right after `/upload/` in a delivery URL.
pub fn insert_transformation(secure_url: &Url, transformation: &str) -> Option<Url> {
    const MARKER: &str = "/upload/";

    let path = secure_url.path();
    let idx = path.find(MARKER)?;
    let rest = &path[idx + MARKER.len()..];
    if rest.is_empty() {
        return None;
    }

    let mut transformed = secure_url.clone();
    transformed.set_path(&format!("{}{MARKER}{transformation}/{rest}", &path[..idx]));
    Some(transformed)
}
