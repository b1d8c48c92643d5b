//! Image decoding and channel normalization.
//!
//! Frames arrive as encoded image bytes of arbitrary channel depth.
//! 3-channel input passes through, 4-channel input drops its alpha
//! channel, anything else is rejected rather than silently coerced.

use image::{ColorType, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PixelError {
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("unsupported pixel format {0:?}: expected 8-bit RGB or RGBA")]
    UnsupportedFormat(ColorType),
}

/// Decode raw image bytes into an 8-bit RGB image.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, PixelError> {
    let img = image::load_from_memory(bytes)?;
    match img.color() {
        ColorType::Rgb8 | ColorType::Rgba8 => Ok(img.to_rgb8()),
        other => Err(PixelError::UnsupportedFormat(other)),
    }
}
