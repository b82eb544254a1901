//! Test utilities for integration tests.
//!
//! Provides a request-tracking store wrapper and helpers for building source
//! images, planners and synthesis closures.

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tile_pyramid::{
    DiskTileStore, ImageIdentity, IndexEntry, PyramidConfig, Rect, RenderRequestPlanner,
    ResolutionTier, StoreError, Tier, TileError, TileKey, TileRecord, TileSize, TileStore,
    TileSynthesizer,
};

// =============================================================================
// Tracking Store
// =============================================================================

/// A [`DiskTileStore`] wrapper that counts reads, writes and clears.
#[derive(Clone)]
pub struct TrackingStore {
    inner: Arc<DiskTileStore>,
    reads: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
    clears: Arc<AtomicUsize>,
}

impl TrackingStore {
    pub async fn open(root: &Path) -> Self {
        Self {
            inner: Arc::new(DiskTileStore::open(root).await.unwrap()),
            reads: Arc::new(AtomicUsize::new(0)),
            writes: Arc::new(AtomicUsize::new(0)),
            clears: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn inner(&self) -> &DiskTileStore {
        &self.inner
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TileStore for TrackingStore {
    async fn read(&self, key: &TileKey) -> Result<Option<TileRecord>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(key).await
    }

    async fn write(&self, key: &TileKey, record: &TileRecord) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(key, record).await
    }

    async fn clear(&self, identity: &ImageIdentity) -> Result<usize, StoreError> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.inner.clear(identity).await
    }

    async fn entries(&self, identity: &ImageIdentity) -> Result<Vec<IndexEntry>, StoreError> {
        self.inner.entries(identity).await
    }
}

// =============================================================================
// Source Images
// =============================================================================

/// An image whose pixels encode their position, tagged by `seed`.
pub fn patterned_image(width: u32, height: u32, seed: u8) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 251) as u8, (y % 241) as u8, seed, 255])
    })
}

pub fn patterned_tier(tier: Tier, width: u32, height: u32, seed: u8) -> ResolutionTier {
    ResolutionTier::new(tier, patterned_image(width, height, seed))
}

/// A uniformly coloured tier; every tile synthesized from it is that colour.
pub fn solid_tier(tier: Tier, width: u32, height: u32, value: u8) -> ResolutionTier {
    ResolutionTier::new(
        tier,
        RgbaImage::from_pixel(width, height, Rgba([value, value, value, 255])),
    )
}

/// Write a PNG source file into `dir`.
pub fn write_png(dir: &Path, name: &str, image: &RgbaImage) -> std::path::PathBuf {
    let path = dir.join(name);
    image.save(&path).unwrap();
    path
}

// =============================================================================
// Planners and Synthesis
// =============================================================================

pub async fn disk_planner(root: &Path, config: PyramidConfig) -> RenderRequestPlanner<DiskTileStore> {
    RenderRequestPlanner::new(DiskTileStore::open(root).await.unwrap(), config)
}

/// Config with small tiles so tests stay fast.
pub fn small_tiles(side: u32) -> PyramidConfig {
    PyramidConfig {
        tile_size: TileSize::square(side),
        ..PyramidConfig::default()
    }
}

/// Synthesize the full-size tile at `rect` from `source`, counting calls.
pub async fn counted_synthesis(
    calls: &AtomicUsize,
    source: &ResolutionTier,
    rect: Rect,
) -> Result<TileRecord, TileError> {
    calls.fetch_add(1, Ordering::SeqCst);
    TileSynthesizer::new().synthesize(
        source,
        1.0,
        TileSize::new(rect.width as u32, rect.height as u32),
        rect,
        source.size(),
    )
}

// =============================================================================
// Failing Store
// =============================================================================

/// A store whose every operation fails, as an unwritable cache directory would.
#[derive(Default)]
pub struct FailingStore {
    writes: AtomicUsize,
}

impl FailingStore {
    pub fn write_attempts(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn error(&self) -> StoreError {
        StoreError::Io {
            path: "/unwritable".to_string(),
            message: "permission denied".to_string(),
        }
    }
}

#[async_trait]
impl TileStore for FailingStore {
    async fn read(&self, _key: &TileKey) -> Result<Option<TileRecord>, StoreError> {
        Err(self.error())
    }

    async fn write(&self, _key: &TileKey, _record: &TileRecord) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(self.error())
    }

    async fn clear(&self, _identity: &ImageIdentity) -> Result<usize, StoreError> {
        Err(self.error())
    }

    async fn entries(&self, _identity: &ImageIdentity) -> Result<Vec<IndexEntry>, StoreError> {
        Err(self.error())
    }
}
