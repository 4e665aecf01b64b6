//! Types shared by the relay and the upload widget.
//!
//! - [`ResourceType`]: host-side handling category, derived once from the declared MIME type
//! - [`UploadResult`]: the normalized success envelope returned by the relay
//! - [`FileFilter`]: MIME predicate used by widgets and relay categories
//!
//! The envelope uses `secure_url` as its only URL key. Clients must not look for `url`.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Host-side handling category for an uploaded asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Image,
    Video,
    Raw,
}

impl ResourceType {
    /// Classify a declared MIME type.
    ///
    /// `image/*` maps to [`ResourceType::Image`], `video/*` to [`ResourceType::Video`], and
    /// anything else (documents, unknown types, a missing type) to [`ResourceType::Raw`].
    pub fn from_mime(mime: Option<&str>) -> Self {
        let Some(essence) = mime.map(mime_essence) else {
            return ResourceType::Raw;
        };

        if essence.starts_with("image/") {
            ResourceType::Image
        } else if essence.starts_with("video/") {
            ResourceType::Video
        } else {
            ResourceType::Raw
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Image => "image",
            ResourceType::Video => "video",
            ResourceType::Raw => "raw",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized result of one successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    /// Absolute, publicly fetchable address of the stored asset
    pub secure_url: Url,
    /// Host-assigned identifier, used for later reference or deletion
    #[serde(default)]
    pub public_id: Option<String>,
    pub resource_type: ResourceType,
    /// First-page rendering for paginated documents, the asset itself for images
    #[serde(default)]
    pub preview: Option<Url>,
    /// Sanitized base name of the uploaded file, extension stripped
    #[serde(default)]
    pub original_filename: String,
    /// Unique key the relay stored the asset under
    #[serde(default)]
    pub storage_key: String,
}

/// Predicate over declared MIME types.
///
/// Parameters (`; charset=...`) and case are ignored when matching.
///
/// ```yaml
/// accept: any
/// accept: { prefix: "image/" }
/// accept: { one_of: [{ prefix: "image/" }, { exact: "application/pdf" }] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFilter {
    #[default]
    Any,
    Prefix(String),
    Exact(String),
    OneOf(Vec<FileFilter>),
}

impl FileFilter {
    pub fn images() -> Self {
        FileFilter::Prefix("image/".to_string())
    }

    pub fn pdf() -> Self {
        FileFilter::Exact("application/pdf".to_string())
    }

    pub fn images_or_pdf() -> Self {
        FileFilter::OneOf(vec![Self::images(), Self::pdf()])
    }

    /// Whether a file with this declared MIME type is accepted. A missing type only passes
    /// [`FileFilter::Any`].
    pub fn accepts(&self, mime: Option<&str>) -> bool {
        match self {
            FileFilter::Any => true,
            FileFilter::Prefix(prefix) => mime.is_some_and(|m| mime_essence(m).starts_with(&prefix.to_ascii_lowercase())),
            FileFilter::Exact(expected) => mime.is_some_and(|m| mime_essence(m) == expected.to_ascii_lowercase()),
            FileFilter::OneOf(filters) => filters.iter().any(|f| f.accepts(mime)),
        }
    }
}

/// Lowercased MIME type without parameters, e.g. `Image/JPEG; q=1` -> `image/jpeg`.
pub fn mime_essence(mime: &str) -> String {
    mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}
