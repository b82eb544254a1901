//! Tile keys and stored tile records.

use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;

use crate::geometry::Rect;
use crate::source::{ImageIdentity, Tier};

use super::address::TileCoord;

/// Quantize a scale factor into the integer discriminant used by tile keys.
///
/// Scales are kept to three decimals (`round(scale * 1000)`), never below 1.
pub fn quantize_scale(scale: f64) -> u32 {
    let milli = (scale * 1000.0).round();
    if milli.is_finite() && milli >= 1.0 {
        milli.min(u32::MAX as f64) as u32
    } else {
        1
    }
}

// =============================================================================
// Tile Key
// =============================================================================

/// Key uniquely addressing the pixel content of one tile.
///
/// Identical keys always map to byte-identical content: the tier and the
/// quantized scale fully determine the source buffer and the mapped rectangle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Image the tile belongs to
    pub identity: ImageIdentity,

    /// Quantized scale (`round(scale * 1000)`)
    pub scale_milli: u32,

    /// Tier the tile was synthesized from
    pub tier: Tier,

    /// Tile address
    pub coord: TileCoord,
}

impl TileKey {
    pub fn new(identity: ImageIdentity, scale_milli: u32, tier: Tier, coord: TileCoord) -> Self {
        Self {
            identity,
            scale_milli,
            tier,
            coord,
        }
    }

    /// Record path relative to the identity namespace.
    ///
    /// Every component lives in its own path segment, so `row=1,col=23` and
    /// `row=12,col=3` can never collide.
    pub fn relative_path(&self) -> PathBuf {
        let mut path = PathBuf::from(format!("s{}", self.scale_milli));
        path.push(self.tier.as_str());
        path.push(format!("r{}", self.coord.row));
        path.push(format!("c{}.png", self.coord.col));
        path
    }

    /// Stable string form used as the index key.
    pub fn index_key(&self) -> String {
        format!(
            "s{}/{}/r{}/c{}",
            self.scale_milli, self.tier, self.coord.row, self.coord.col
        )
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.identity, self.index_key())
    }
}

// =============================================================================
// Tile Record
// =============================================================================

/// Encoded pixels of one tile plus the logical rectangle they represent.
///
/// Records are write-once: the cache never mutates a record after storing it.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRecord {
    /// PNG-encoded pixels
    pub data: Bytes,

    /// Encoded pixel width
    pub width: u32,

    /// Encoded pixel height
    pub height: u32,

    /// Logical rectangle of the displayed image covered by these pixels
    pub rect: Rect,
}

impl TileRecord {
    /// MIME type of `data`.
    pub const CONTENT_TYPE: &'static str = "image/png";

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
