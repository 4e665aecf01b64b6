//! Storage key derivation.
//!
//! A storage key is the sanitized base name of the uploaded file plus a suffix made of the
//! upload time in milliseconds and a random token:
//!
//! ```text
//! "Spring Catalog (v2).final.pdf"  ->  base "Spring_Catalog_v2_.final"  ->  key "Spring_Catalog_v2_.final_1729339200123_9f86d081"
//! ```
//!
//! The random token is what makes keys unique. The timestamp only keeps keys roughly sortable
//! in the host's media library.

use chrono::Utc;
use std::fmt;
use uuid::Uuid;

/// Base name used when the client sent no usable filename.
pub const FALLBACK_BASE_NAME: &str = "file";

/// Longest base name kept before the suffix is appended.
const MAX_BASE_LEN: usize = 100;

/// Strip any directory components and the last extension from a client-supplied filename.
///
/// Hidden-file style names (`.env`) keep their leading dot rather than collapsing to nothing.
pub fn original_base_name(filename: &str) -> &str {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

/// Lowercased extension of a client-supplied filename, if any.
pub fn extension(filename: &str) -> Option<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) => {
            let ext = &name[idx + 1..];
            (!ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric())).then(|| ext.to_ascii_lowercase())
        }
    }
}

/// Reduce a base name to characters every asset host accepts in a public id.
pub fn sanitize(base: &str) -> String {
    let mut out = String::with_capacity(base.len());
    let mut last_was_sep = false;

    for c in base.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
            out.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }

    out.truncate(MAX_BASE_LEN);
    let trimmed = out.trim_matches(|c| c == '_' || c == '.');
    if trimmed.is_empty() {
        return FALLBACK_BASE_NAME.to_string();
    }
    trimmed.to_string()
}

/// A unique name under which one upload is stored at the asset host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    base: String,
    key: String,
}

impl StorageKey {
    /// Derive a fresh key for a client-supplied filename. Two calls never return the same key.
    pub fn generate(filename: &str) -> Self {
        let base = sanitize(original_base_name(filename));
        let token = Uuid::new_v4().simple().to_string();
        let key = format!("{}_{}_{}", base, Utc::now().timestamp_millis(), &token[..8]);
        Self { base, key }
    }

    /// Sanitized base name without the uniqueness suffix.
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}
