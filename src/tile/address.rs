//! Tile addressing: which tiles cover a rectangle at a given scale.
//!
//! Tiles are stored at their native pixel size but drawn scaled, so the
//! footprint of one tile in the rectangle's coordinate space is
//! `tile_size / scale`. Columns run left to right, rows top to bottom, and the
//! tile at `(row, col)` covers
//! `[col * footprint.width, (col + 1) * footprint.width)` horizontally.

use serde::{Deserialize, Serialize};

use crate::geometry::{Rect, TileSize};

/// Row/column address of one tile. Negative indices address tiles left of
/// or above the image origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub row: i64,
    pub col: i64,
}

impl TileCoord {
    pub const fn new(row: i64, col: i64) -> Self {
        Self { row, col }
    }

    /// Footprint of this tile in logical units at `scale`.
    pub fn rect(&self, tile_size: TileSize, scale: f64) -> Rect {
        let footprint = tile_size.footprint(scale);
        Rect::new(
            footprint.width * self.col as f64,
            footprint.height * self.row as f64,
            footprint.width,
            footprint.height,
        )
    }
}

/// Tiles covering `rect`, in row-major order (rows outer, columns inner).
///
/// Returns an empty vector when the rectangle has no area, when it is not
/// finite, or when `scale` is not a positive finite number. A rectangle whose
/// tile count does not fit in an `i64` is not addressable and also yields an
/// empty vector; callers clip to the image bounds first.
pub fn tiles_covering(rect: Rect, tile_size: TileSize, scale: f64) -> Vec<TileCoord> {
    if rect.is_empty() || !rect.is_finite() || !(scale.is_finite() && scale > 0.0) {
        return Vec::new();
    }
    if tile_size.width == 0 || tile_size.height == 0 {
        return Vec::new();
    }

    let footprint = tile_size.footprint(scale);

    let first_col = (rect.min_x() / footprint.width).floor() as i64;
    let last_col = ((rect.max_x() - 1.0) / footprint.width).floor() as i64;
    let first_row = (rect.min_y() / footprint.height).floor() as i64;
    let last_row = ((rect.max_y() - 1.0) / footprint.height).floor() as i64;

    if last_col < first_col || last_row < first_row {
        return Vec::new();
    }

    let count = tile_span(first_row, last_row)
        .zip(tile_span(first_col, last_col))
        .and_then(|(rows, cols)| rows.checked_mul(cols))
        .and_then(|count| usize::try_from(count).ok());
    let Some(count) = count else {
        return Vec::new();
    };

    let mut coords = Vec::with_capacity(count.min(MAX_PREALLOCATED));
    for row in first_row..=last_row {
        for col in first_col..=last_col {
            coords.push(TileCoord::new(row, col));
        }
    }
    coords
}

/// Upper bound on the up-front allocation of [`tiles_covering`].
const MAX_PREALLOCATED: usize = 4096;

fn tile_span(first: i64, last: i64) -> Option<i64> {
    last.checked_sub(first)?.checked_add(1)
}
