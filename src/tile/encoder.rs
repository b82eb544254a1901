//! PNG tile encoder.
//!
//! Tiles are stored losslessly so repeated zooming never accumulates banding.
//!
//! # Design Decisions
//!
//! - **Lossless only**: PNG with default compression. Re-encoding a decoded
//!   tile yields identical pixels.
//!
//! - **RGBA8 everywhere**: sources are converted to RGBA8 at load time, so the
//!   encoder never has to negotiate colour types.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::png::PngEncoder;
use image::{ImageEncoder, ImageReader, RgbaImage};

use crate::error::TileError;

/// PNG encoder/decoder for tile pixels.
///
/// # Example
///
/// ```
/// use image::{Rgba, RgbaImage};
/// use tile_pyramid::tile::PngTileEncoder;
///
/// let encoder = PngTileEncoder::new();
/// let pixels = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]));
///
/// let png = encoder.encode(&pixels).unwrap();
/// assert_eq!(encoder.decode(&png).unwrap(), pixels);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PngTileEncoder {}

impl PngTileEncoder {
    pub fn new() -> Self {
        Self {}
    }

    /// Encode RGBA pixels as PNG.
    ///
    /// # Errors
    ///
    /// Returns [`TileError::Encode`] if the image has no pixels or the
    /// encoder fails.
    pub fn encode(&self, pixels: &RgbaImage) -> Result<Bytes, TileError> {
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(TileError::Encode {
                message: "cannot encode an image with no pixels".to_string(),
            });
        }

        let mut output = Vec::new();
        PngEncoder::new(&mut output)
            .write_image(
                pixels.as_raw(),
                pixels.width(),
                pixels.height(),
                image::ExtendedColorType::Rgba8,
            )
            .map_err(|e| TileError::Encode {
                message: e.to_string(),
            })?;

        Ok(Bytes::from(output))
    }

    /// Decode PNG bytes back into RGBA pixels.
    pub fn decode(&self, data: &[u8]) -> Result<RgbaImage, TileError> {
        let reader = ImageReader::with_format(Cursor::new(data), image::ImageFormat::Png);
        let img = reader.decode().map_err(|e| TileError::Decode {
            message: e.to_string(),
        })?;
        Ok(img.to_rgba8())
    }

    /// Read the pixel dimensions from the PNG header without decoding.
    pub fn dimensions(&self, data: &[u8]) -> Result<(u32, u32), TileError> {
        let reader = ImageReader::with_format(Cursor::new(data), image::ImageFormat::Png);
        reader.into_dimensions().map_err(|e| TileError::Decode {
            message: e.to_string(),
        })
    }
}
