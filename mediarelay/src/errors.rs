use crate::asset_host::HostError;
use crate::config::CredentialPresence;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid request data
    #[error("{message}")]
    BadRequest { message: String },

    /// Asset host credentials absent from the process configuration
    #[error("Missing asset host configuration: {}", .missing.join(", "))]
    MissingConfiguration { missing: Vec<&'static str> },

    /// Requested resource not found
    #[error("{resource} '{id}' not found")]
    NotFound { resource: String, id: String },

    /// Uploaded file exceeds the configured size limit
    #[error("{message}")]
    PayloadTooLarge { message: String },

    /// The asset host failed or answered with something unusable
    #[error("Asset host upload failed: {source}")]
    Upload {
        #[source]
        source: HostError,
        /// Which credentials were present, attached outside production only
        details: Option<CredentialPresence>,
    },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::MissingConfiguration { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Upload { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::BadRequest { message } => message.clone(),
            Error::MissingConfiguration { .. } => self.to_string(),
            Error::NotFound { .. } => self.to_string(),
            Error::PayloadTooLarge { message } => message.clone(),
            Error::Upload { .. } => "Failed to upload file".to_string(),
            Error::Internal { .. } => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Internal { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Upload { source, .. } => {
                tracing::error!(error = %source, "Upload to asset host failed");
            }
            Error::MissingConfiguration { missing } => {
                tracing::error!(missing = ?missing, "Asset host is not configured");
            }
            Error::BadRequest { .. } | Error::NotFound { .. } | Error::PayloadTooLarge { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let message = self.user_message();

        let body = match self {
            Error::MissingConfiguration { missing } => json!({
                "message": message,
                "missing": missing,
            }),
            Error::Upload { source, details } => {
                let mut body = json!({
                    "message": message,
                    "error": source.detail(),
                });
                if let Some(details) = details {
                    body["details"] = json!(details);
                }
                body
            }
            _ => json!({ "message": message }),
        };

        (status, Json(body)).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
