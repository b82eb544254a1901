//! Tile addressing, synthesis and caching.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          RenderRequestPlanner           │
//! │   (viewport, scale) → ordered tiles     │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │               TileCache                 │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  memory LRU  │  │ TileSynthesizer │  │
//! │  │  (encoded    │  │ (crop → resize  │  │
//! │  │   PNGs)      │  │  → PNG encode)  │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │          TileStore (on disk)            │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`tiles_covering`]: Row-major tile coordinates covering a rectangle
//! - [`TileKey`] / [`TileRecord`]: Cache key (identity, scale, tier, coord) and encoded tile
//! - [`TileSynthesizer`]: Crops a tier, resamples to tile size, encodes PNG
//! - [`TileCache`]: Memory LRU over a [`TileStore`], with singleflight synthesis
//! - [`DiskTileStore`]: Filesystem store with a per-identity JSON index
//! - [`RenderRequestPlanner`]: Display sessions and viewport planning

mod address;
mod cache;
mod encoder;
mod planner;
mod record;
mod store;
mod synth;

pub use address::{tiles_covering, TileCoord};
pub use cache::{CacheLookup, CacheStats, TileCache, DEFAULT_MEMORY_CAPACITY};
pub use encoder::PngTileEncoder;
pub use planner::{PendingTile, PlannedTile, RenderPlan, RenderRequestPlanner};
pub use record::{quantize_scale, TileKey, TileRecord};
pub use store::{DiskTileStore, IdentityIndex, IndexEntry, TileStore, INDEX_FILE_NAME};
pub use synth::{clamp_to_buffer, map_rect, output_size, PixelRegion, TileSynthesizer};
