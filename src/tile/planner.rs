//! Render request planning.
//!
//! The planner turns "the viewport shows `rect` at `scale`" into the tiles
//! that must be drawn, each with its record and destination rectangle.
//!
//! # Flow
//!
//! ```text
//! plan(viewport, scale)
//!   ├─ scale quantized to the key's milli precision
//!   ├─ tiles_covering(viewport ∩ image bounds, tile_size, scale)   row-major
//!   ├─ destination = footprint ∩ image bounds
//!   ├─ tier = sources.select(scale, tiers)
//!   └─ cache.get_at(key, generation, synthesize on a blocking thread)
//! ```
//!
//! The identity's cache generation is read together with the display
//! session, so work issued for an image that is replaced before it runs is
//! superseded instead of written back.
//!
//! [`RenderRequestPlanner::plan`] awaits every tile and stops at the first
//! failure, so the caller never draws tiles out of order.
//! [`RenderRequestPlanner::request`] returns cached tiles at once and hands
//! out a [`PendingTile`] for every miss; each completed miss bumps the redraw
//! signal.

use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PyramidConfig;
use crate::error::TileError;
use crate::geometry::{Rect, Size, TileSize};
use crate::source::{ImageIdentity, ResolutionTier, SourceSet};

use super::address::{tiles_covering, TileCoord};
use super::cache::{CacheLookup, TileCache};
use super::record::{quantize_scale, TileKey, TileRecord};
use super::store::TileStore;
use super::synth::TileSynthesizer;

// =============================================================================
// Planned Tiles
// =============================================================================

/// A tile ready to be drawn.
#[derive(Debug, Clone)]
pub struct PlannedTile {
    pub coord: TileCoord,
    pub key: TileKey,
    pub record: TileRecord,

    /// Where to draw the record, in image coordinates
    pub destination: Rect,

    /// Whether the record was served without synthesis
    pub cache_hit: bool,
}

/// A tile whose synthesis is running in the background.
#[derive(Debug)]
pub struct PendingTile {
    pub coord: TileCoord,
    pub key: TileKey,
    pub destination: Rect,
    handle: JoinHandle<Result<CacheLookup, TileError>>,
}

impl PendingTile {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the synthesis to finish.
    pub async fn resolve(self) -> Result<PlannedTile, TileError> {
        let lookup = self.handle.await.map_err(|e| TileError::Task {
            message: e.to_string(),
        })??;

        Ok(PlannedTile {
            coord: self.coord,
            key: self.key,
            record: lookup.record,
            destination: self.destination,
            cache_hit: lookup.cache_hit,
        })
    }
}

/// Result of [`RenderRequestPlanner::request`].
#[derive(Debug, Default)]
pub struct RenderPlan {
    /// Tiles served from the cache, row-major
    pub ready: Vec<PlannedTile>,

    /// Tiles still being synthesized, row-major
    pub pending: Vec<PendingTile>,
}

impl RenderPlan {
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    /// Wait for every pending tile.
    ///
    /// Returns all tiles in row-major order. Tiles that failed are logged and
    /// left out; the next request for the viewport retries them.
    pub async fn resolve_all(self) -> Vec<PlannedTile> {
        let mut tiles = self.ready;
        for pending in self.pending {
            let coord = pending.coord;
            match pending.resolve().await {
                Ok(tile) => tiles.push(tile),
                Err(e) => warn!(row = coord.row, col = coord.col, error = %e, "pending tile failed"),
            }
        }
        tiles.sort_by_key(|tile| tile.coord);
        tiles
    }
}

// =============================================================================
// Display Session
// =============================================================================

/// The currently displayed image.
#[derive(Debug)]
struct DisplaySession {
    identity: ImageIdentity,
    sources: SourceSet,

    /// Display size in logical units
    logical: Size,
}

impl DisplaySession {
    fn bounds(&self) -> Rect {
        Rect::from_size(self.logical)
    }
}

/// Tiles of one plan, before any cache access.
struct Layout {
    session: Arc<DisplaySession>,
    /// Cache generation of the identity when the plan was issued
    generation: u64,
    source: ResolutionTier,
    /// Scale as stored in the tile keys
    scale: f64,
    tiles: Vec<(TileCoord, TileKey, Rect)>,
}

// =============================================================================
// Planner
// =============================================================================

/// Plans and produces the tiles for viewport redraws.
///
/// # Thread Safety
///
/// All methods take `&self`; share the planner via `Arc`.
pub struct RenderRequestPlanner<S: TileStore> {
    config: PyramidConfig,
    cache: Arc<TileCache<S>>,
    synthesizer: Arc<TileSynthesizer>,
    session: RwLock<Option<Arc<DisplaySession>>>,
    redraw: Arc<watch::Sender<u64>>,
}

impl<S: TileStore + 'static> RenderRequestPlanner<S> {
    /// Create a planner with a cache over `store`, sized by `config`.
    pub fn new(store: S, config: PyramidConfig) -> Self {
        let cache = Arc::new(TileCache::with_memory_capacity(store, config.memory_capacity));
        Self::with_cache(cache, config)
    }

    /// Create a planner over an existing cache.
    pub fn with_cache(cache: Arc<TileCache<S>>, config: PyramidConfig) -> Self {
        let (redraw, _) = watch::channel(0);
        Self {
            config,
            cache,
            synthesizer: Arc::new(TileSynthesizer::new()),
            session: RwLock::new(None),
            redraw: Arc::new(redraw),
        }
    }

    /// Use a custom synthesizer (e.g. a different resampling filter).
    pub fn with_synthesizer(mut self, synthesizer: TileSynthesizer) -> Self {
        self.synthesizer = Arc::new(synthesizer);
        self
    }

    pub fn config(&self) -> &PyramidConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TileCache<S>> {
        &self.cache
    }

    /// Receiver bumped every time a pending tile completes.
    pub fn redraw_signal(&self) -> watch::Receiver<u64> {
        self.redraw.subscribe()
    }

    /// Identity of the displayed image, if any.
    pub async fn identity(&self) -> Option<ImageIdentity> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|session| session.identity.clone())
    }

    /// Bounds of the displayed image in logical units, if any.
    pub async fn image_bounds(&self) -> Option<Rect> {
        self.session.read().await.as_ref().map(|session| session.bounds())
    }

    /// Display a new image. Its logical size is the lowest tier's size.
    ///
    /// # Errors
    ///
    /// Returns [`TileError::NoSourceTiers`] if `sources` is empty.
    pub async fn display_image(
        &self,
        identity: ImageIdentity,
        sources: SourceSet,
    ) -> Result<(), TileError> {
        let logical = sources
            .logical_size()
            .ok_or_else(|| TileError::NoSourceTiers {
                identity: identity.to_string(),
            })?;
        self.display_image_sized(identity, sources, logical).await
    }

    /// Display a new image with an explicit logical size.
    ///
    /// Tiles of the previously displayed image are cleared. Tiles of
    /// `identity` itself are cleared too unless `retain_on_display` is set.
    /// Storage failures while clearing are logged, never returned.
    pub async fn display_image_sized(
        &self,
        identity: ImageIdentity,
        sources: SourceSet,
        logical: Size,
    ) -> Result<(), TileError> {
        if sources.is_empty() {
            return Err(TileError::NoSourceTiers {
                identity: identity.to_string(),
            });
        }
        if logical.is_empty() || !(logical.width.is_finite() && logical.height.is_finite()) {
            return Err(TileError::InvalidViewport {
                message: format!(
                    "image size must be positive, got {}x{}",
                    logical.width, logical.height
                ),
            });
        }

        // Held across the clears so no plan runs against a half-switched image.
        let mut session = self.session.write().await;

        if let Some(previous) = session.take() {
            if previous.identity != identity {
                self.clear_identity(&previous.identity).await;
            }
        }
        if !self.config.retain_on_display {
            self.clear_identity(&identity).await;
        }

        info!(
            identity = %identity,
            width = logical.width,
            height = logical.height,
            tiers = ?sources.available().map(ResolutionTier::tier).collect::<Vec<_>>(),
            "displaying image"
        );

        *session = Some(Arc::new(DisplaySession {
            identity,
            sources,
            logical,
        }));
        Ok(())
    }

    /// Add a tier that became available after the image was displayed.
    ///
    /// Tiles already synthesized from other tiers stay cached; plans made from
    /// now on select the new tier where it is a better fit.
    pub async fn attach_tier(&self, source: ResolutionTier) -> Result<(), TileError> {
        let mut session = self.session.write().await;
        let current = session.as_ref().ok_or(TileError::NoImage)?;

        let mut sources = current.sources.clone();
        let tier = source.tier();
        sources.insert(source);

        debug!(identity = %current.identity, tier = %tier, "attached source tier");

        *session = Some(Arc::new(DisplaySession {
            identity: current.identity.clone(),
            sources,
            logical: current.logical,
        }));
        Ok(())
    }

    /// Produce every tile needed to draw `viewport` at `scale`.
    ///
    /// Tiles come back in row-major order. Production stops at the first
    /// tile that fails; the tiles before it are returned and the failure is
    /// logged.
    ///
    /// # Errors
    ///
    /// Returns an error if no image is displayed, the scale is not a positive
    /// finite number, or the viewport is not finite.
    pub async fn plan(&self, viewport: Rect, scale: f64) -> Result<Vec<PlannedTile>, TileError> {
        let layout = self.layout(viewport, scale).await?;
        let total = layout.tiles.len();

        let mut planned = Vec::with_capacity(total);
        for (coord, key, destination) in layout.tiles.iter().cloned() {
            let job = self.synthesis_job(&layout, destination);
            match self.cache.get_at(&key, layout.generation, job).await {
                Ok(lookup) => planned.push(PlannedTile {
                    coord,
                    key,
                    record: lookup.record,
                    destination,
                    cache_hit: lookup.cache_hit,
                }),
                Err(e) => {
                    warn!(key = %key, error = %e, "tile production failed, stopping draw");
                    break;
                }
            }
        }

        debug!(
            viewport = %viewport,
            scale,
            tier = %layout.source.tier(),
            total,
            produced = planned.len(),
            "planned viewport"
        );
        Ok(planned)
    }

    /// Split the tiles for `viewport` into cached ones and background work.
    ///
    /// Never synthesizes on the calling task. Every pending tile bumps the
    /// redraw signal once it is cached. Pending tiles of an image that is
    /// replaced before they finish resolve to [`TileError::Superseded`].
    ///
    /// # Errors
    ///
    /// Same as [`plan`](Self::plan).
    pub async fn request(&self, viewport: Rect, scale: f64) -> Result<RenderPlan, TileError> {
        let layout = self.layout(viewport, scale).await?;

        let mut plan = RenderPlan::default();
        let mut misses = Vec::new();
        for (coord, key, destination) in layout.tiles.iter().cloned() {
            match self.cache.cached(&key).await {
                Some(record) => plan.ready.push(PlannedTile {
                    coord,
                    key,
                    record,
                    destination,
                    cache_hit: true,
                }),
                None => misses.push((coord, key, destination)),
            }
        }

        for (coord, key, destination) in misses {
            let cache = Arc::clone(&self.cache);
            let redraw = Arc::clone(&self.redraw);
            let job = self.synthesis_job(&layout, destination);
            let generation = layout.generation;
            let task_key = key.clone();

            let handle = tokio::spawn(async move {
                let result = cache.get_at(&task_key, generation, job).await;
                if result.is_ok() {
                    redraw.send_modify(|generation| *generation = generation.wrapping_add(1));
                }
                result
            });

            plan.pending.push(PendingTile {
                coord,
                key,
                destination,
                handle,
            });
        }

        debug!(
            viewport = %viewport,
            scale,
            ready = plan.ready.len(),
            pending = plan.pending.len(),
            "requested viewport"
        );
        Ok(plan)
    }

    async fn clear_identity(&self, identity: &ImageIdentity) {
        if let Err(e) = self.cache.clear(identity).await {
            warn!(identity = %identity, error = %e, "failed to clear cached tiles");
        }
    }

    /// Validate the request and compute keys and destinations.
    async fn layout(&self, viewport: Rect, scale: f64) -> Result<Layout, TileError> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(TileError::InvalidScale { scale });
        }
        if !viewport.is_finite() {
            return Err(TileError::InvalidViewport {
                message: format!("non-finite viewport {}", viewport),
            });
        }

        // The generation is read under the session lock, which a display
        // switch holds while it clears.
        let (session, generation) = {
            let current = self.session.read().await;
            let session = current.clone().ok_or(TileError::NoImage)?;
            let generation = self.cache.generation(&session.identity).await;
            (session, generation)
        };

        let scale_milli = quantize_scale(scale);
        let scale = f64::from(scale_milli) / 1000.0;

        let source = session
            .sources
            .select(scale, &self.config.tiers)
            .cloned()
            .ok_or_else(|| TileError::NoSourceTiers {
                identity: session.identity.to_string(),
            })?;

        let tile_size = self.config.tile_size;
        let bounds = session.bounds();

        let tiles = match viewport.intersection(&bounds) {
            Some(visible) => tiles_covering(visible, tile_size, scale)
                .into_iter()
                .filter_map(|coord| {
                    let destination = coord.rect(tile_size, scale).intersection(&bounds)?;
                    let key =
                        TileKey::new(session.identity.clone(), scale_milli, source.tier(), coord);
                    Some((coord, key, destination))
                })
                .collect(),
            None => Vec::new(),
        };

        Ok(Layout {
            session,
            generation,
            source,
            scale,
            tiles,
        })
    }

    fn synthesis_job(
        &self,
        layout: &Layout,
        destination: Rect,
    ) -> impl FnOnce() -> SynthesisFuture + Send + 'static {
        let synthesizer = Arc::clone(&self.synthesizer);
        let source = layout.source.clone();
        let scale = layout.scale;
        let tile_size = self.config.tile_size;
        let logical = layout.session.logical;

        move || {
            Box::pin(synthesize_blocking(
                synthesizer,
                source,
                scale,
                tile_size,
                destination,
                logical,
            ))
        }
    }
}

type SynthesisFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<TileRecord, TileError>> + Send>>;

/// Run synthesis on the blocking pool; cropping and PNG encoding are CPU-bound.
async fn synthesize_blocking(
    synthesizer: Arc<TileSynthesizer>,
    source: ResolutionTier,
    scale: f64,
    tile_size: TileSize,
    requested: Rect,
    logical: Size,
) -> Result<TileRecord, TileError> {
    tokio::task::spawn_blocking(move || {
        synthesizer.synthesize(&source, scale, tile_size, requested, logical)
    })
    .await
    .map_err(|e| TileError::Task {
        message: e.to_string(),
    })?
}
