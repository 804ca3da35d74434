use std::io::Cursor;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};

use super::error::OptimizationFailure;
use super::types::MediaPayload;

pub const DEFAULT_MAX_DIMENSION: u32 = 1024;
pub const DEFAULT_JPEG_QUALITY: u8 = 85;
const MIN_DIMENSION: u32 = 64;

/// Shrinks a reference before it is attached to a request.
#[async_trait]
pub trait ImageOptimizer: Send + Sync {
    async fn optimize(&self, payload: &MediaPayload) -> Result<MediaPayload, OptimizationFailure>;
}

#[derive(Debug, Clone, Copy)]
pub struct DownscaleOptimizer {
    pub max_dimension: u32,
    pub jpeg_quality: u8,
}

impl Default for DownscaleOptimizer {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl DownscaleOptimizer {
    pub fn new(max_dimension: u32, jpeg_quality: u8) -> Self {
        Self {
            max_dimension: max_dimension.max(MIN_DIMENSION),
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }
}

#[async_trait]
impl ImageOptimizer for DownscaleOptimizer {
    async fn optimize(&self, payload: &MediaPayload) -> Result<MediaPayload, OptimizationFailure> {
        let payload = payload.clone();
        let max_dimension = self.max_dimension;
        let quality = self.jpeg_quality;
        tokio::task::spawn_blocking(move || downscale(&payload, max_dimension, quality))
            .await
            .map_err(|err| OptimizationFailure(format!("optimizer task failed: {err}")))?
    }
}

/// Images already inside the bound are returned untouched; larger ones are
/// resized to fit and re-encoded as JPEG over a white background.
pub fn downscale(
    payload: &MediaPayload,
    max_dimension: u32,
    quality: u8,
) -> Result<MediaPayload, OptimizationFailure> {
    let image = image::load_from_memory(&payload.bytes)
        .map_err(|err| OptimizationFailure(format!("decode failed: {err}")))?;
    let (width, height) = image.dimensions();
    if width <= max_dimension && height <= max_dimension {
        return Ok(payload.clone());
    }

    let rgba = image.to_rgba8();
    let mut flattened = RgbaImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(
            x,
            y,
            Rgba([blend(pixel[0]), blend(pixel[1]), blend(pixel[2]), 255]),
        );
    }
    let resized = DynamicImage::ImageRgba8(flattened)
        .resize(max_dimension, max_dimension, FilterType::Triangle)
        .to_rgb8();

    let mut cursor = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut cursor, quality)
        .encode_image(&resized)
        .map_err(|err| OptimizationFailure(format!("encode failed: {err}")))?;

    Ok(MediaPayload::new(cursor.into_inner(), "image/jpeg"))
}
