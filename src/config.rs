//! Configuration for tile pyramids and the `tile-pyramid` binary.
//!
//! Two layers:
//! - [`PyramidConfig`]: library-level constants (tile size, zoom bounds, tier
//!   thresholds, memory budget) consumed by [`crate::RenderRequestPlanner`].
//! - [`Cli`]: command-line arguments via clap, with environment variable
//!   fallbacks using the `PYRAMID_` prefix.
//!
//! # Environment Variables
//!
//! - `PYRAMID_CACHE_DIR` - Tile cache directory (default: .tile-cache)
//! - `PYRAMID_LOW` / `PYRAMID_MEDIUM` / `PYRAMID_HIGH` - Tier source images
//! - `PYRAMID_IDENTITY` - Image identity (default: content hash of the lowest tier)
//! - `PYRAMID_TILE_SIZE` - Native tile size, `N` or `WxH` (default: 500)
//! - `PYRAMID_TIER_THRESHOLDS` - Tier scale thresholds (default: 1.0,2.0)
//! - `PYRAMID_MIN_ZOOM` / `PYRAMID_MAX_ZOOM` - Zoom bounds (default: 0.125 / 2.0)
//! - `PYRAMID_CACHE_MEMORY` - In-memory tile budget in bytes (default: 64MB)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::geometry::{Rect, Size, TileSize};
use crate::source::TierTable;
use crate::tile::DEFAULT_MEMORY_CAPACITY;

// =============================================================================
// Default Values
// =============================================================================

/// Default tile cache directory.
pub const DEFAULT_CACHE_DIR: &str = ".tile-cache";

/// Default native tile side in pixels.
pub const DEFAULT_TILE_SIDE: u32 = 500;

/// Largest accepted tile side in pixels.
pub const MAX_TILE_SIDE: u32 = 8192;

/// Default minimum zoom scale.
pub const DEFAULT_MIN_ZOOM: f64 = 0.125;

/// Default maximum zoom scale.
pub const DEFAULT_MAX_ZOOM: f64 = 2.0;

/// Default tier thresholds.
pub const DEFAULT_TIER_THRESHOLDS: &str = "1.0,2.0";

// =============================================================================
// Zoom Bounds
// =============================================================================

/// Minimum and maximum zoom scale of the viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomBounds {
    pub min: f64,
    pub max: f64,
}

/// Zoom bounds adjusted for a particular view, plus the initial scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FittedZoom {
    pub bounds: ZoomBounds,
    pub initial: f64,
}

impl ZoomBounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.min.is_finite() && self.min > 0.0) {
            return Err(format!("min zoom must be positive, got {}", self.min));
        }
        if !(self.max.is_finite() && self.max >= self.min) {
            return Err(format!(
                "max zoom must be at least min zoom ({}), got {}",
                self.min, self.max
            ));
        }
        Ok(())
    }

    pub fn clamp(&self, scale: f64) -> f64 {
        scale.clamp(self.min, self.max)
    }

    /// Bounds and initial scale for showing an `image` inside a `view`.
    ///
    /// An image wider than the view starts at the fit-width scale, which also
    /// lowers the minimum if needed. An image that fits entirely inside the
    /// view is pinned to its fit scale.
    pub fn for_view(&self, view: Size, image: Size) -> FittedZoom {
        let mut bounds = *self;
        let mut initial = self.clamp(1.0);

        if view.is_empty() || image.is_empty() {
            return FittedZoom { bounds, initial };
        }

        if image.width > view.width {
            let fit_width = view.width / image.width;
            bounds.min = bounds.min.min(fit_width);
            initial = fit_width;
        }

        if image.width < view.width && image.height < view.height {
            let fit = (view.width / image.width).min(view.height / image.height);
            bounds = ZoomBounds::new(fit, fit);
            initial = fit;
        }

        FittedZoom { bounds, initial }
    }
}

impl Default for ZoomBounds {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_ZOOM, DEFAULT_MAX_ZOOM)
    }
}

// =============================================================================
// Pyramid Configuration
// =============================================================================

/// Constants of one tile pyramid.
#[derive(Debug, Clone, PartialEq)]
pub struct PyramidConfig {
    /// Native pixel size of a stored tile
    pub tile_size: TileSize,

    /// Zoom bounds offered to the viewport
    pub zoom: ZoomBounds,

    /// Scale → tier lookup table
    pub tiers: TierTable,

    /// Byte budget of the in-memory tile layer
    pub memory_capacity: usize,

    /// Keep persisted tiles of an identity when it is displayed again
    pub retain_on_display: bool,
}

impl PyramidConfig {
    pub fn validate(&self) -> Result<(), String> {
        let TileSize { width, height } = self.tile_size;
        if width == 0 || height == 0 || width > MAX_TILE_SIDE || height > MAX_TILE_SIDE {
            return Err(format!(
                "tile size must be between 1 and {} pixels per side, got {}x{}",
                MAX_TILE_SIDE, width, height
            ));
        }
        self.zoom.validate()?;
        self.tiers.validate()?;
        Ok(())
    }
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            tile_size: TileSize::square(DEFAULT_TILE_SIDE),
            zoom: ZoomBounds::default(),
            tiers: TierTable::default(),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            retain_on_display: false,
        }
    }
}

// =============================================================================
// Argument Parsers
// =============================================================================

/// Parse `x,y,width,height`.
pub fn parse_rect(s: &str) -> Result<Rect, String> {
    let parts = s
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|e| format!("invalid number '{}': {}", part.trim(), e))
        })
        .collect::<Result<Vec<_>, _>>()?;

    match parts.as_slice() {
        [x, y, width, height] => Ok(Rect::new(*x, *y, *width, *height)),
        _ => Err(format!("expected x,y,width,height, got '{}'", s)),
    }
}

/// Parse `N` or `WxH` into a tile size.
pub fn parse_tile_size(s: &str) -> Result<TileSize, String> {
    let parse = |part: &str| {
        part.trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid tile dimension '{}': {}", part.trim(), e))
    };

    match s.split_once(['x', 'X']) {
        Some((width, height)) => Ok(TileSize::new(parse(width)?, parse(height)?)),
        None => Ok(TileSize::square(parse(s)?)),
    }
}

/// Parse `WxH` into a size.
pub fn parse_size(s: &str) -> Result<Size, String> {
    let (width, height) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    let parse = |part: &str| {
        part.trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid dimension '{}': {}", part.trim(), e))
    };
    Ok(Size::new(parse(width)?, parse(height)?))
}

fn parse_tier_table(s: &str) -> Result<TierTable, String> {
    s.parse()
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tile Pyramid - tiled rendering cache for very large images.
#[derive(Parser, Debug, Clone)]
#[command(name = "tile-pyramid")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Display an image and plan the tiles for one viewport.
    Plan(PlanConfig),

    /// Remove every persisted tile of an identity.
    Clear(ClearConfig),

    /// List the persisted tiles of an identity.
    Inspect(InspectConfig),
}

/// Arguments of `tile-pyramid plan`.
#[derive(Args, Debug, Clone)]
pub struct PlanConfig {
    // =========================================================================
    // Sources
    // =========================================================================
    /// Low-resolution source image (also defines the logical image size).
    #[arg(long, env = "PYRAMID_LOW")]
    pub low: Option<PathBuf>,

    /// Medium-resolution source image.
    #[arg(long, env = "PYRAMID_MEDIUM")]
    pub medium: Option<PathBuf>,

    /// High-resolution source image.
    #[arg(long, env = "PYRAMID_HIGH")]
    pub high: Option<PathBuf>,

    /// Image identity. Defaults to the content hash of the lowest source.
    #[arg(long, env = "PYRAMID_IDENTITY")]
    pub identity: Option<String>,

    // =========================================================================
    // Viewport
    // =========================================================================
    /// Viewport rectangle in image coordinates: x,y,width,height.
    #[arg(long, value_parser = parse_rect, allow_hyphen_values = true)]
    pub viewport: Rect,

    /// Zoom scale (device pixels per image unit).
    ///
    /// If omitted, the initial scale for --view-size is used, else 1.0.
    #[arg(long)]
    pub scale: Option<f64>,

    /// Size of the on-screen view, WIDTHxHEIGHT, used to fit the zoom bounds.
    #[arg(long, value_parser = parse_size)]
    pub view_size: Option<Size>,

    // =========================================================================
    // Pyramid
    // =========================================================================
    /// Native tile size in pixels: N or WIDTHxHEIGHT.
    #[arg(long, default_value = "500", value_parser = parse_tile_size, env = "PYRAMID_TILE_SIZE")]
    pub tile_size: TileSize,

    /// Comma-separated scale thresholds for the low and medium tiers.
    #[arg(
        long,
        default_value = DEFAULT_TIER_THRESHOLDS,
        value_parser = parse_tier_table,
        env = "PYRAMID_TIER_THRESHOLDS"
    )]
    pub tier_thresholds: TierTable,

    /// Minimum zoom scale.
    #[arg(long, default_value_t = DEFAULT_MIN_ZOOM, env = "PYRAMID_MIN_ZOOM")]
    pub min_zoom: f64,

    /// Maximum zoom scale.
    #[arg(long, default_value_t = DEFAULT_MAX_ZOOM, env = "PYRAMID_MAX_ZOOM")]
    pub max_zoom: f64,

    // =========================================================================
    // Cache
    // =========================================================================
    /// Directory holding persisted tiles.
    #[arg(long, default_value = DEFAULT_CACHE_DIR, env = "PYRAMID_CACHE_DIR")]
    pub cache_dir: PathBuf,

    /// In-memory tile budget in bytes.
    #[arg(long, default_value_t = DEFAULT_MEMORY_CAPACITY, env = "PYRAMID_CACHE_MEMORY")]
    pub cache_memory: usize,

    /// Reuse tiles persisted by an earlier run for the same identity.
    #[arg(long, default_value_t = false)]
    pub keep_tiles: bool,

    /// Write the planned tiles as PNG files into this directory.
    #[arg(long)]
    pub export_dir: Option<PathBuf>,

    // =========================================================================
    // Logging
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl PlanConfig {
    /// Validate the arguments and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.low.is_none() && self.medium.is_none() && self.high.is_none() {
            return Err(
                "At least one source image is required. Set --low, --medium or --high".to_string(),
            );
        }
        if !self.viewport.is_finite() {
            return Err("viewport coordinates must be finite".to_string());
        }
        if let Some(scale) = self.scale {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(format!("scale must be positive, got {}", scale));
            }
        }
        if let Some(view) = self.view_size {
            if view.is_empty() {
                return Err("view size must be positive".to_string());
            }
        }
        if let Some(identity) = &self.identity {
            if identity.trim().is_empty() {
                return Err("identity must not be empty".to_string());
            }
        }
        self.pyramid().validate()
    }

    /// Library configuration derived from the arguments.
    pub fn pyramid(&self) -> PyramidConfig {
        PyramidConfig {
            tile_size: self.tile_size,
            zoom: ZoomBounds::new(self.min_zoom, self.max_zoom),
            tiers: self.tier_thresholds.clone(),
            memory_capacity: self.cache_memory,
            retain_on_display: self.keep_tiles,
        }
    }
}

/// Arguments of `tile-pyramid clear`.
#[derive(Args, Debug, Clone)]
pub struct ClearConfig {
    /// Image identity whose tiles are removed.
    #[arg(long, env = "PYRAMID_IDENTITY")]
    pub identity: String,

    /// Directory holding persisted tiles.
    #[arg(long, default_value = DEFAULT_CACHE_DIR, env = "PYRAMID_CACHE_DIR")]
    pub cache_dir: PathBuf,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

/// Arguments of `tile-pyramid inspect`.
#[derive(Args, Debug, Clone)]
pub struct InspectConfig {
    /// Image identity to list.
    #[arg(long, env = "PYRAMID_IDENTITY")]
    pub identity: String,

    /// Directory holding persisted tiles.
    #[arg(long, default_value = DEFAULT_CACHE_DIR, env = "PYRAMID_CACHE_DIR")]
    pub cache_dir: PathBuf,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

// =============================================================================
// Tests
// =============================================================================
