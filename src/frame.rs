//! Decoded frames.
//!
//! - `Frame`: RGB8 pixels plus dimensions and the monotonic capture instant.
//! - Decoding from uploaded bytes (JPEG/PNG) for the single-shot path.
//! - Downscaling and JPEG encoding for preview snapshots.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{GenericImageView, RgbImage};
use std::time::{Duration, Instant};

/// Upper bound for uploaded image payloads.
pub const MAX_IMAGE_BYTES: usize = 16 * 1024 * 1024;

/// A decoded RGB8 frame.
///
/// Frames are cheap to move and are not `Clone`; the stream worker drops each one
/// after classification (and after snapshotting, when an episode is emitted).
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    captured_at: Instant,
}

impl Frame {
    /// Build a frame from packed RGB8 pixels.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if width == 0 || height == 0 {
            return Err(anyhow!("frame has zero dimension {}x{}", width, height));
        }
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            captured_at: Instant::now(),
        })
    }

    /// Decode an encoded image (JPEG or PNG) into a frame.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(anyhow!("image payload is empty"));
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(anyhow!(
                "image payload of {} bytes exceeds {} byte limit",
                bytes.len(),
                MAX_IMAGE_BYTES
            ));
        }
        let image = image::load_from_memory(bytes).context("decode image")?;
        let (width, height) = image.dimensions();
        let rgb = image.into_rgb8();
        Self::from_rgb(rgb.into_raw(), width, height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// Copy of the frame as an `image` buffer.
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }

    /// Resize to exactly `width` x `height` (aspect ratio is not preserved).
    pub fn resized(&self, width: u32, height: u32) -> Result<RgbImage> {
        let image = self.to_rgb_image()?;
        Ok(image::imageops::resize(
            &image,
            width,
            height,
            FilterType::Triangle,
        ))
    }
}

/// Encode an RGB image as JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder.encode_image(image).context("encode jpeg")?;
    Ok(out)
}
