//! Image compression before upload.
//!
//! Shrinks images to a maximum long edge and re-encodes them as JPEG until the
//! payload fits the target size. Orientation from EXIF is baked into the
//! pixels first so the result displays the same way as the original.

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use std::io::Cursor;
use std::sync::Arc;

use super::types::{MediaKind, SourceFile};
use crate::config::CompressionConfig;
use crate::error::UploadError;

/// Receives engine progress, 0-100
pub type CompressionProgress = Arc<dyn Fn(u8) + Send + Sync>;

// Tried in order until the encoded image fits the target size
const JPEG_QUALITY_STEPS: [u8; 6] = [85, 75, 65, 55, 45, 35];

#[async_trait]
pub trait Compressor: Send + Sync {
    /// Whether this file goes through compression at all
    fn applies_to(&self, file: &SourceFile) -> bool;

    async fn compress(
        &self,
        file: &SourceFile,
        on_progress: CompressionProgress,
    ) -> Result<SourceFile, UploadError>;
}

#[derive(Debug, Clone)]
pub struct ImageCompressor {
    max_bytes: u64,
    max_dimension: u32,
}

impl Default for ImageCompressor {
    fn default() -> Self {
        Self::new(&CompressionConfig::default())
    }
}

impl ImageCompressor {
    pub fn new(config: &CompressionConfig) -> Self {
        Self {
            max_bytes: config.max_bytes,
            max_dimension: config.max_dimension.max(1),
        }
    }

    /// CPU-bound part; run it off the async workers
    pub fn compress_blocking(
        &self,
        file: &SourceFile,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<SourceFile, UploadError> {
        on_progress(5);

        let orientation = read_exif_orientation(&file.data);
        let img = image::load_from_memory(&file.data).map_err(|e| {
            UploadError::Compression(format!("{}: could not decode image: {}", file.name, e))
        })?;
        on_progress(30);

        let (width, height) = img.dimensions();
        let needs_resize = width.max(height) > self.max_dimension;
        let needs_rotation = orientation > 1 && orientation <= 8;

        if !needs_resize && !needs_rotation && file.size() <= self.max_bytes {
            tracing::debug!(file = %file.name, "Image already within limits, keeping original");
            on_progress(100);
            return Ok(file.clone());
        }

        let mut img = apply_orientation(img, orientation);
        if needs_resize {
            img = img.resize(self.max_dimension, self.max_dimension, FilterType::Lanczos3);
        }
        on_progress(60);

        let rgb = img.to_rgb8();
        let mut smallest: Option<Vec<u8>> = None;

        for (step, quality) in JPEG_QUALITY_STEPS.iter().enumerate() {
            let mut buffer = Vec::new();
            let mut encoder = JpegEncoder::new_with_quality(Cursor::new(&mut buffer), *quality);
            encoder.encode_image(&rgb).map_err(|e| {
                UploadError::Compression(format!("{}: could not encode image: {}", file.name, e))
            })?;

            let progress = 60 + ((step + 1) * 40 / JPEG_QUALITY_STEPS.len()) as u8;
            on_progress(progress);

            let fits = buffer.len() as u64 <= self.max_bytes;
            if smallest.as_ref().is_none_or(|s| buffer.len() < s.len()) {
                smallest = Some(buffer);
            }
            if fits {
                break;
            }
        }

        let data = smallest.ok_or_else(|| {
            UploadError::Compression(format!("{}: encoder produced no output", file.name))
        })?;
        on_progress(100);

        tracing::debug!(
            file = %file.name,
            original = file.size(),
            compressed = data.len(),
            "Compressed image"
        );

        Ok(SourceFile {
            name: jpeg_file_name(&file.name),
            content_type: "image/jpeg".to_string(),
            data: Bytes::from(data),
        })
    }
}

#[async_trait]
impl Compressor for ImageCompressor {
    fn applies_to(&self, file: &SourceFile) -> bool {
        file.kind() == Some(MediaKind::Image)
    }

    async fn compress(
        &self,
        file: &SourceFile,
        on_progress: CompressionProgress,
    ) -> Result<SourceFile, UploadError> {
        let compressor = self.clone();
        let file = file.clone();
        tokio::task::spawn_blocking(move || compressor.compress_blocking(&file, on_progress.as_ref()))
            .await
            .map_err(|e| UploadError::Compression(format!("compression task failed: {}", e)))?
    }
}

/// EXIF orientation tag (1-8), 1 when absent or unreadable
pub fn read_exif_orientation(data: &[u8]) -> u32 {
    let mut cursor = Cursor::new(data);
    exif::Reader::new()
        .read_from_container(&mut cursor)
        .ok()
        .and_then(|exif| {
            exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
                .and_then(|field| field.value.get_uint(0))
        })
        .unwrap_or(1)
}

/// Bake an EXIF orientation into the pixels
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

fn jpeg_file_name(name: &str) -> String {
    let path = std::path::Path::new(name);
    match path.file_stem().and_then(|s| s.to_str()) {
        Some(stem) if !stem.is_empty() => format!("{}.jpg", stem),
        _ => format!("{}.jpg", name),
    }
}
