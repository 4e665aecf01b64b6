//! Upload relay endpoints.
//!
//! `POST /upload/{category}` accepts one multipart part named `file`, classifies it, stores it at
//! the asset host under a fresh storage key and answers `201` with an [`UploadResult`].
//! `POST /upload` does the same for the configured default category.

use axum::{
    Json,
    extract::{
        Path, State,
        multipart::{Field, Multipart, MultipartRejection},
    },
    http::StatusCode,
};
use bytes::{Bytes, BytesMut};
use chrono::Utc;

use crate::AppState;
use crate::asset_host::HostUpload;
use crate::config::Environment;
use crate::errors::{Error, Result};
use crate::naming::{self, StorageKey};
use crate::types::{ResourceType, UploadResult, mime_essence};

/// Name of the multipart part carrying the file
pub const FILE_FIELD: &str = "file";

/// Extensions of document formats with pages that can be rendered as a preview
pub const PAGINATED_EXTENSIONS: &[&str] = &["pdf"];

/// A file part read from the request.
#[derive(Debug)]
struct ReceivedFile {
    filename: String,
    content_type: Option<String>,
    bytes: Bytes,
}

/// Upload a file into the default category.
#[tracing::instrument(skip_all)]
pub async fn upload_default(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadResult>)> {
    let category = state.config.default_category.clone();
    relay_upload(&state, &category, multipart).await
}

/// Upload a file into a named category.
#[tracing::instrument(skip_all, fields(category = %category))]
pub async fn upload_to_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadResult>)> {
    relay_upload(&state, &category, multipart).await
}

async fn relay_upload(
    state: &AppState,
    category_name: &str,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadResult>)> {
    // Configuration problems are reported before anything about the request is looked at
    let credentials = state.config.asset_host.credentials()?;

    let category = state.config.category(category_name).ok_or_else(|| Error::NotFound {
        resource: "Upload category".to_string(),
        id: category_name.to_string(),
    })?;

    let mut multipart = multipart.map_err(|rejection| {
        tracing::debug!(error = %rejection, "Rejected non-multipart upload");
        Error::BadRequest {
            message: "Invalid content type. Must be multipart/form-data".to_string(),
        }
    })?;

    let mut received = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| Error::BadRequest {
        message: format!("Failed to parse multipart data: {}", e),
    })? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field
            .file_name()
            .filter(|name| !name.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("file_{}", Utc::now().timestamp_millis()));
        let content_type = field.content_type().map(str::to_string);

        if !category.accept.accepts(content_type.as_deref()) {
            return Err(Error::BadRequest {
                message: format!(
                    "The selected file format ({}) is not supported for {}",
                    content_type.as_deref().unwrap_or("unknown"),
                    category_name
                ),
            });
        }

        let bytes = read_file_part(field, state.config.limits.max_file_size).await?;
        received = Some(ReceivedFile {
            filename,
            content_type,
            bytes,
        });
        break;
    }

    let file = received.ok_or_else(|| Error::BadRequest {
        message: "No file uploaded".to_string(),
    })?;

    tracing::info!(
        name = %file.filename,
        content_type = ?file.content_type,
        size = file.bytes.len(),
        "Received file"
    );

    // Decided once, before the host is contacted
    let resource_type = ResourceType::from_mime(file.content_type.as_deref());
    let key = StorageKey::generate(&file.filename);
    let extension = naming::extension(&file.filename);

    let (public_id, format) = match resource_type {
        // Raw assets are delivered as-is, so the extension has to live in the public id
        ResourceType::Raw => (
            extension.as_ref().map_or_else(|| key.to_string(), |ext| format!("{key}.{ext}")),
            None,
        ),
        ResourceType::Image | ResourceType::Video => (key.to_string(), extension.clone()),
    };

    tracing::info!(
        storage_key = %key,
        resource_type = %resource_type,
        folder = %category.folder,
        "Uploading {} as {}",
        file.filename,
        resource_type
    );

    let stored = state
        .asset_host
        .upload(
            &credentials,
            HostUpload {
                bytes: file.bytes,
                filename: file.filename.clone(),
                content_type: file.content_type.clone(),
                resource_type,
                folder: category.folder.clone(),
                public_id,
                format,
            },
        )
        .await
        .map_err(|source| Error::Upload {
            source,
            details: (state.config.environment != Environment::Production).then(|| state.config.asset_host.presence()),
        })?;

    let is_paginated = extension.as_deref().is_some_and(|ext| PAGINATED_EXTENSIONS.contains(&ext))
        || file.content_type.as_deref().is_some_and(|ct| mime_essence(ct) == "application/pdf");

    let preview = match resource_type {
        ResourceType::Image => Some(stored.secure_url.clone()),
        ResourceType::Raw if category.preview && is_paginated => {
            let preview = state.asset_host.page_preview(&stored.secure_url);
            if preview.is_none() {
                tracing::debug!(secure_url = %stored.secure_url, "No page preview available for document");
            }
            preview
        }
        _ => None,
    };

    Ok((
        StatusCode::CREATED,
        Json(UploadResult {
            secure_url: stored.secure_url,
            public_id: stored.public_id,
            resource_type,
            preview,
            original_filename: key.base().to_string(),
            storage_key: key.to_string(),
        }),
    ))
}

/// Read a file part into memory, failing as soon as it exceeds `max_size`.
async fn read_file_part(mut field: Field<'_>, max_size: u64) -> Result<Bytes> {
    let too_large = || Error::PayloadTooLarge {
        message: format!(
            "File size exceeds maximum allowed size of {} bytes ({} MB)",
            max_size,
            max_size / (1024 * 1024)
        ),
    };

    let mut buffer = BytesMut::new();
    while let Some(chunk) = field.chunk().await.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            too_large()
        } else {
            Error::BadRequest {
                message: format!("Failed to read file chunk: {}", e),
            }
        }
    })? {
        if (buffer.len() + chunk.len()) as u64 > max_size {
            tracing::warn!(
                received = buffer.len() + chunk.len(),
                max_file_size = max_size,
                "File size limit exceeded, aborting upload"
            );
            return Err(too_large());
        }
        buffer.extend_from_slice(&chunk);
    }

    Ok(buffer.freeze())
}
