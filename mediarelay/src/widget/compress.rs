//! Client-side image compression.
//!
//! Images are shrunk before they leave the client: the longer side is capped (never enlarged),
//! then the image is re-encoded as JPEG at decreasing quality until it fits the byte budget.
//! If the lowest quality is still too large the image is scaled down further.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use super::{SelectedFile, WidgetError};
use crate::naming;

/// Smallest longer side the compressor scales down to while chasing the byte budget.
const MIN_DIMENSION: u32 = 64;
const QUALITY_STEP: u8 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionOptions {
    /// Target payload size in bytes
    pub max_bytes: u64,
    /// Longest allowed side in pixels
    pub max_dimension: u32,
    pub initial_quality: u8,
    pub min_quality: u8,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            max_bytes: 512 * 1024,
            max_dimension: 800,
            initial_quality: 80,
            min_quality: 40,
        }
    }
}

/// Compresses one image. Runs on a blocking worker thread.
pub trait ImageCompressor: Send + Sync {
    /// Whether files of this MIME type go through [`ImageCompressor::compress`].
    fn handles(&self, content_type: Option<&str>) -> bool {
        content_type.is_some_and(|ct| ct.to_ascii_lowercase().starts_with("image/"))
    }

    fn compress(&self, file: SelectedFile, options: &CompressionOptions) -> Result<SelectedFile, WidgetError>;
}

/// Re-encodes images as JPEG with the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegCompressor;

impl ImageCompressor for JpegCompressor {
    fn handles(&self, content_type: Option<&str>) -> bool {
        // Vector and exotic formats pass through untouched
        content_type
            .and_then(|ct| ImageFormat::from_mime_type(crate::types::mime_essence(ct)))
            .is_some_and(|format| format.reading_enabled())
    }

    fn compress(&self, file: SelectedFile, options: &CompressionOptions) -> Result<SelectedFile, WidgetError> {
        let img = image::load_from_memory(&file.bytes)
            .map_err(|e| WidgetError::Compression(format!("cannot decode {}: {e}", file.name)))?;

        let longer = img.width().max(img.height());
        if file.bytes.len() as u64 <= options.max_bytes && longer <= options.max_dimension {
            return Ok(file);
        }

        let mut current = fit_within(img, options.max_dimension);
        let encoded = loop {
            let mut quality = options.initial_quality.max(options.min_quality);
            let mut encoded = encode_jpeg(&current, quality)?;
            while encoded.len() as u64 > options.max_bytes && quality > options.min_quality {
                quality = quality.saturating_sub(QUALITY_STEP).max(options.min_quality);
                encoded = encode_jpeg(&current, quality)?;
            }

            let longer = current.width().max(current.height());
            if encoded.len() as u64 <= options.max_bytes || longer <= MIN_DIMENSION {
                break encoded;
            }
            current = fit_within(current, (longer * 3 / 4).max(MIN_DIMENSION));
        };

        tracing::debug!(
            name = %file.name,
            before = file.bytes.len(),
            after = encoded.len(),
            width = current.width(),
            height = current.height(),
            "Compressed image"
        );

        Ok(SelectedFile {
            name: format!("{}.jpg", naming::original_base_name(&file.name)),
            content_type: Some("image/jpeg".to_string()),
            bytes: encoded.into(),
        })
    }
}

/// Scale down so the longer side is at most `max_dimension`, keeping the aspect ratio.
fn fit_within(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    if img.width().max(img.height()) <= max_dimension {
        return img;
    }
    img.resize(max_dimension, max_dimension, FilterType::Triangle)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, WidgetError> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    img.to_rgb8()
        .write_with_encoder(encoder)
        .map_err(|e| WidgetError::Compression(format!("JPEG encode failed: {e}")))?;
    Ok(buf.into_inner())
}
