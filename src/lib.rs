//! # Tile Pyramid
//!
//! Tiled rendering for very large images: a viewport asks for the tiles
//! covering a rectangle at a zoom scale, and each tile is synthesized once
//! from the best available resolution tier, then served from cache.
//!
//! ## Features
//!
//! - **Deterministic addressing**: Row-major tile coordinates for any rectangle and scale
//! - **Resolution tiers**: Low/medium/high sources, picked per scale with graceful fallback
//! - **Two-layer cache**: In-memory LRU over a persistent, per-image disk store
//! - **Singleflight synthesis**: Concurrent requests for a tile synthesize it once
//! - **Non-blocking requests**: Cached tiles immediately, misses as background tasks
//!
//! ## Architecture
//!
//! - [`geometry`] - Rectangles, sizes and tile sizes
//! - [`source`] - Image identities, tiers and source loading
//! - [`tile`] - Addressing, synthesis, caching, storage and planning
//! - [`config`] - Pyramid configuration and CLI types
//! - [`error`] - Error types
//!
//! ## Example
//!
//! ```rust,no_run
//! use tile_pyramid::{
//!     load_tier, DiskTileStore, ImageIdentity, PyramidConfig, Rect, RenderRequestPlanner,
//!     SourceSet, Tier,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = DiskTileStore::open(".tile-cache").await?;
//!     let planner = RenderRequestPlanner::new(store, PyramidConfig::default());
//!
//!     let low = load_tier(Tier::Low, "galaxy-small.png").await?;
//!     planner
//!         .display_image(ImageIdentity::new("galaxy"), SourceSet::new().with(low))
//!         .await?;
//!
//!     for tile in planner.plan(Rect::new(0.0, 0.0, 1200.0, 800.0), 1.0).await? {
//!         println!("{:?} -> {}", tile.coord, tile.destination);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod geometry;
pub mod source;
pub mod tile;

// Re-export commonly used types
pub use config::{Cli, Command, FittedZoom, PlanConfig, PyramidConfig, ZoomBounds};
pub use error::{StoreError, TileError};
pub use geometry::{Rect, Size, TileSize};
pub use source::{
    identity_for_file, load_tier, ImageIdentity, ResolutionTier, SourceSet, Tier, TierBand,
    TierTable,
};
pub use tile::{
    quantize_scale, tiles_covering, CacheLookup, CacheStats, DiskTileStore, IndexEntry,
    PendingTile, PlannedTile, PngTileEncoder, RenderPlan, RenderRequestPlanner, TileCache,
    TileCoord, TileKey, TileRecord, TileStore, TileSynthesizer, DEFAULT_MEMORY_CAPACITY,
};
