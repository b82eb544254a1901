//! Tile synthesis: crop a tile-sized region out of a source tier and encode it.
//!
//! The requested rectangle is in the displayed image's logical coordinates.
//! Tiers are different resolutions of the same picture, so the rectangle is
//! mapped into the tier's pixel space with an independent ratio per axis,
//! clamped to the buffer, cropped, resampled to the native tile pixel size and
//! PNG-encoded.

use image::imageops::{self, FilterType};
use tracing::trace;

use crate::error::TileError;
use crate::geometry::{Rect, Size, TileSize};
use crate::source::ResolutionTier;

use super::encoder::PngTileEncoder;
use super::record::TileRecord;

/// Integer pixel region inside a source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Map a logical rectangle into a tier's pixel space, per axis.
pub fn map_rect(requested: Rect, tier: Size, logical: Size) -> Rect {
    requested.scaled(tier.width / logical.width, tier.height / logical.height)
}

/// Clamp a mapped rectangle to a `width` x `height` buffer.
///
/// Partial pixels are included (floor the start, ceil the end). Returns `None`
/// when nothing of the rectangle lies inside the buffer.
pub fn clamp_to_buffer(mapped: Rect, width: u32, height: u32) -> Option<PixelRegion> {
    let x0 = mapped.min_x().floor().max(0.0);
    let y0 = mapped.min_y().floor().max(0.0);
    let x1 = mapped.max_x().ceil().min(width as f64);
    let y1 = mapped.max_y().ceil().min(height as f64);

    if !(x1 > x0 && y1 > y0) {
        return None;
    }

    Some(PixelRegion {
        x: x0 as u32,
        y: y0 as u32,
        width: (x1 - x0) as u32,
        height: (y1 - y0) as u32,
    })
}

/// Native pixel size of a tile covering `requested` at `scale`.
///
/// Full tiles come out at `tile_size`; edge tiles are proportionally smaller.
pub fn output_size(requested: Rect, scale: f64, tile_size: TileSize) -> (u32, u32) {
    let fit = |logical: f64, max: u32| -> u32 {
        let pixels = (logical * scale).round();
        if pixels.is_finite() {
            (pixels as u32).clamp(1, max.max(1))
        } else {
            1
        }
    };
    (
        fit(requested.width, tile_size.width),
        fit(requested.height, tile_size.height),
    )
}

// =============================================================================
// Synthesizer
// =============================================================================

/// Produces [`TileRecord`]s from decoded source tiers.
///
/// Stateless apart from the encoder and resampling filter; safe to share
/// across threads.
#[derive(Debug, Clone)]
pub struct TileSynthesizer {
    encoder: PngTileEncoder,
    filter: FilterType,
}

impl TileSynthesizer {
    pub fn new() -> Self {
        Self {
            encoder: PngTileEncoder::new(),
            filter: FilterType::Triangle,
        }
    }

    /// Use a different resampling filter.
    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    pub fn encoder(&self) -> &PngTileEncoder {
        &self.encoder
    }

    /// Synthesize the tile covering `requested`.
    ///
    /// # Arguments
    ///
    /// * `source` - Tier to crop from (already selected by the caller)
    /// * `scale` - Device pixels per logical unit
    /// * `tile_size` - Native pixel size of a full tile
    /// * `requested` - Region in logical coordinates
    /// * `logical` - Size of the displayed image in logical units
    ///
    /// # Errors
    ///
    /// Returns an error instead of a partial record if the scale or logical
    /// size are invalid, the region is empty after clamping, or encoding
    /// fails.
    pub fn synthesize(
        &self,
        source: &ResolutionTier,
        scale: f64,
        tile_size: TileSize,
        requested: Rect,
        logical: Size,
    ) -> Result<TileRecord, TileError> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(TileError::InvalidScale { scale });
        }

        let empty_region = || TileError::EmptyRegion {
            width: source.width(),
            height: source.height(),
            region: requested.to_string(),
        };

        if logical.is_empty() || requested.is_empty() {
            return Err(empty_region());
        }

        let mapped = map_rect(requested, source.size(), logical);
        let region =
            clamp_to_buffer(mapped, source.width(), source.height()).ok_or_else(empty_region)?;

        // A view into the tier; only copied when no resampling is needed.
        let view =
            imageops::crop_imm(source.image(), region.x, region.y, region.width, region.height);

        let (width, height) = output_size(requested, scale, tile_size);
        let pixels = if (region.width, region.height) == (width, height) {
            view.to_image()
        } else {
            imageops::resize(&*view, width, height, self.filter)
        };

        let data = self.encoder.encode(&pixels)?;

        trace!(
            tier = %source.tier(),
            ?region,
            width,
            height,
            bytes = data.len(),
            "synthesized tile"
        );

        Ok(TileRecord {
            data,
            width,
            height,
            rect: requested,
        })
    }
}

impl Default for TileSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}
