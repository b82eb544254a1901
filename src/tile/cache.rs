//! Two-layer tile cache: a size-bounded in-memory LRU in front of a
//! persistent [`TileStore`].
//!
//! # Lookup
//!
//! ```text
//! get(key, synthesize)
//!   ├─ memory LRU hit ─────────────────────────────► record
//!   ├─ store hit ── promote into memory ───────────► record
//!   └─ miss ── singleflight ── synthesize ── persist ── record
//! ```
//!
//! # Singleflight
//!
//! At most one synthesis runs per key. Concurrent callers for a key that is
//! already being synthesized wait for the leader and share its outcome, the
//! record or the error, even when the record could not be persisted.
//!
//! # Generations
//!
//! Every identity has a generation counter that [`TileCache::clear`] bumps.
//! Callers capture the generation when they issue a request and pass it to
//! [`TileCache::get_at`]. A request issued before a clear, or a synthesis that
//! finishes after one, returns [`TileError::Superseded`] and writes nothing, so
//! tiles of a cleared image never reappear.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use lru::LruCache;
use serde::Serialize;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, warn};

use crate::error::{StoreError, TileError};
use crate::source::ImageIdentity;

use super::record::{TileKey, TileRecord};
use super::store::TileStore;

/// Default in-memory capacity: 64MB of encoded tiles.
pub const DEFAULT_MEMORY_CAPACITY: usize = 64 * 1024 * 1024;

// =============================================================================
// Results and Statistics
// =============================================================================

/// A record returned by the cache.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub record: TileRecord,

    /// Whether the record came from the memory layer or the store
    pub cache_hit: bool,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub syntheses: u64,
    pub write_failures: u64,
    pub read_failures: u64,
    pub superseded: u64,
    pub memory_entries: usize,
    pub memory_bytes: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    syntheses: AtomicU64,
    write_failures: AtomicU64,
    read_failures: AtomicU64,
    superseded: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// =============================================================================
// Singleflight
// =============================================================================

/// One synthesis in progress.
struct InFlight {
    /// Generation the leader persists under
    generation: u64,
    notify: Notify,
    finished: AtomicBool,
    /// Leader's result; `None` if it was cancelled or panicked
    outcome: Mutex<Option<Result<CacheLookup, TileError>>>,
}

impl InFlight {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            notify: Notify::new(),
            finished: AtomicBool::new(false),
            outcome: Mutex::new(None),
        }
    }

    fn publish(&self, outcome: &Result<CacheLookup, TileError>) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome.clone());
    }

    fn outcome(&self) -> Option<Result<CacheLookup, TileError>> {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Removes the in-flight marker and wakes waiters when the leader finishes,
/// including when its future is dropped or panics.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<TileKey, Arc<InFlight>>>,
    key: &'a TileKey,
    flight: Arc<InFlight>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.key);
        self.flight.finished.store(true, Ordering::SeqCst);
        self.flight.notify.notify_waiters();
    }
}

// =============================================================================
// Tile Cache
// =============================================================================

/// Tile cache over a persistent store.
///
/// # Thread Safety
///
/// The cache is thread-safe and can be shared across tasks via `Arc`.
pub struct TileCache<S: TileStore> {
    /// Durable storage
    store: S,

    /// Recently served records
    memory: RwLock<LruCache<TileKey, TileRecord>>,

    /// Maximum total size of the memory layer in bytes
    memory_capacity: usize,

    /// Current total size of the memory layer in bytes
    memory_size: RwLock<usize>,

    /// Keys currently being synthesized
    in_flight: Mutex<HashMap<TileKey, Arc<InFlight>>>,

    /// Write generation per identity
    generations: RwLock<HashMap<ImageIdentity, u64>>,

    counters: Counters,
}

impl<S: TileStore> TileCache<S> {
    /// Create a cache with the default memory capacity (64MB).
    pub fn new(store: S) -> Self {
        Self::with_memory_capacity(store, DEFAULT_MEMORY_CAPACITY)
    }

    /// Create a cache with the given memory capacity in bytes.
    ///
    /// A capacity of zero disables the memory layer.
    pub fn with_memory_capacity(store: S, memory_capacity: usize) -> Self {
        Self {
            store,
            memory: RwLock::new(LruCache::unbounded()),
            memory_capacity,
            memory_size: RwLock::new(0),
            in_flight: Mutex::new(HashMap::new()),
            generations: RwLock::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the record for `key`, synthesizing it on a miss.
    ///
    /// Uses the identity's current generation; see [`get_at`](Self::get_at).
    pub async fn get<F, Fut>(&self, key: &TileKey, synthesize: F) -> Result<CacheLookup, TileError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TileRecord, TileError>>,
    {
        let generation = self.generation(&key.identity).await;
        self.get_at(key, generation, synthesize).await
    }

    /// Get the record for `key` on behalf of a request issued at `generation`.
    ///
    /// `synthesize` is invoked at most once per call, and only when neither
    /// layer holds the key and no other caller is already synthesizing it.
    /// Callers that find a synthesis running share its outcome. A synthesized
    /// record is persisted before it is returned; if the write fails the
    /// record is still returned and the next miss synthesizes again.
    ///
    /// # Errors
    ///
    /// Returns the synthesis error, or [`TileError::Superseded`] if the
    /// identity was cleared after `generation` was read.
    pub async fn get_at<F, Fut>(
        &self,
        key: &TileKey,
        generation: u64,
        synthesize: F,
    ) -> Result<CacheLookup, TileError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TileRecord, TileError>>,
    {
        let flight = loop {
            if self.generation(&key.identity).await != generation {
                return Err(self.superseded(key));
            }

            if let Some(record) = self.lookup(key).await {
                bump(&self.counters.hits);
                return Ok(CacheLookup {
                    record,
                    cache_hit: true,
                });
            }

            let running = {
                let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
                match in_flight.get(key) {
                    Some(existing) => existing.clone(),
                    None => {
                        let flight = Arc::new(InFlight::new(generation));
                        in_flight.insert(key.clone(), flight.clone());
                        break flight;
                    }
                }
            };

            // Another task is synthesizing this key; wait for its outcome.
            let wait = running.notify.notified();
            tokio::pin!(wait);
            wait.as_mut().enable();
            if !running.finished.load(Ordering::SeqCst) {
                wait.await;
            }

            // A leader working for another generation, or one that was
            // cancelled, leaves this caller to try again.
            if running.generation == generation {
                if let Some(outcome) = running.outcome() {
                    return outcome;
                }
            }
        };

        let _guard = InFlightGuard {
            in_flight: &self.in_flight,
            key,
            flight: flight.clone(),
        };

        let outcome = self.lead(key, generation, synthesize).await;
        flight.publish(&outcome);
        outcome
    }

    /// Leader's half of [`get_at`](Self::get_at), run while holding the
    /// in-flight marker.
    async fn lead<F, Fut>(
        &self,
        key: &TileKey,
        generation: u64,
        synthesize: F,
    ) -> Result<CacheLookup, TileError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TileRecord, TileError>>,
    {
        // A leader may have finished between the lookup and taking the marker.
        if let Some(record) = self.lookup(key).await {
            bump(&self.counters.hits);
            return Ok(CacheLookup {
                record,
                cache_hit: true,
            });
        }

        bump(&self.counters.misses);
        bump(&self.counters.syntheses);
        debug!(key = %key, "tile cache miss, synthesizing");

        let record = synthesize().await?;
        self.persist(key, generation, &record).await?;

        Ok(CacheLookup {
            record,
            cache_hit: false,
        })
    }

    /// Look up `key` in both layers without synthesizing.
    pub async fn cached(&self, key: &TileKey) -> Option<TileRecord> {
        let record = self.lookup(key).await;
        if record.is_some() {
            bump(&self.counters.hits);
        }
        record
    }

    /// Remove every record of `identity` from both layers.
    ///
    /// Bumps the identity's generation first so in-flight syntheses for it are
    /// discarded. Returns the number of persisted records removed.
    pub async fn clear(&self, identity: &ImageIdentity) -> Result<usize, StoreError> {
        let mut generations = self.generations.write().await;
        *generations.entry(identity.clone()).or_insert(0) += 1;

        self.evict_identity(identity).await;
        let removed = self.store.clear(identity).await?;

        debug!(identity = %identity, removed, "cleared tile cache");
        Ok(removed)
    }

    /// Snapshot of the cache counters.
    pub async fn stats(&self) -> CacheStats {
        let memory_entries = self.memory.read().await.len();
        let memory_bytes = *self.memory_size.read().await;
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            syntheses: self.counters.syntheses.load(Ordering::Relaxed),
            write_failures: self.counters.write_failures.load(Ordering::Relaxed),
            read_failures: self.counters.read_failures.load(Ordering::Relaxed),
            superseded: self.counters.superseded.load(Ordering::Relaxed),
            memory_entries,
            memory_bytes,
        }
    }

    /// Maximum capacity of the memory layer in bytes.
    pub fn memory_capacity(&self) -> usize {
        self.memory_capacity
    }

    /// Current generation of `identity`. Capture it when a request is issued
    /// and pass it to [`get_at`](Self::get_at).
    pub async fn generation(&self, identity: &ImageIdentity) -> u64 {
        let generations = self.generations.read().await;
        generations.get(identity).copied().unwrap_or(0)
    }

    fn superseded(&self, key: &TileKey) -> TileError {
        bump(&self.counters.superseded);
        debug!(key = %key, "discarding tile requested for a cleared image");
        TileError::Superseded {
            identity: key.identity.to_string(),
        }
    }

    /// Memory layer, then store. Store failures are treated as misses.
    async fn lookup(&self, key: &TileKey) -> Option<TileRecord> {
        {
            let mut memory = self.memory.write().await;
            if let Some(record) = memory.get(key) {
                return Some(record.clone());
            }
        }

        match self.store.read(key).await {
            Ok(Some(record)) => {
                self.remember(key.clone(), record.clone()).await;
                Some(record)
            }
            Ok(None) => None,
            Err(e) => {
                bump(&self.counters.read_failures);
                warn!(key = %key, error = %e, "unreadable cached tile, treating as miss");
                None
            }
        }
    }

    /// Write a synthesized record unless its identity was cleared meanwhile.
    async fn persist(
        &self,
        key: &TileKey,
        generation: u64,
        record: &TileRecord,
    ) -> Result<(), TileError> {
        // Held across the write so a concurrent clear waits for it.
        let generations = self.generations.read().await;
        let current = generations.get(&key.identity).copied().unwrap_or(0);
        if current != generation {
            return Err(self.superseded(key));
        }

        match self.store.write(key, record).await {
            Ok(()) => self.remember(key.clone(), record.clone()).await,
            Err(e) => {
                bump(&self.counters.write_failures);
                warn!(key = %key, error = %e, "failed to persist tile, serving it uncached");
            }
        }
        Ok(())
    }

    /// Insert into the memory layer, evicting least-recently-used records
    /// until the layer fits its capacity.
    async fn remember(&self, key: TileKey, record: TileRecord) {
        let record_size = record.len();
        let mut memory = self.memory.write().await;
        let mut current_size = self.memory_size.write().await;

        if let Some(old) = memory.peek(&key) {
            *current_size = current_size.saturating_sub(old.len());
        }

        memory.put(key, record);
        *current_size += record_size;

        while *current_size > self.memory_capacity {
            if let Some((_, evicted)) = memory.pop_lru() {
                *current_size = current_size.saturating_sub(evicted.len());
            } else {
                break;
            }
        }
    }

    async fn evict_identity(&self, identity: &ImageIdentity) {
        let mut memory = self.memory.write().await;
        let mut current_size = self.memory_size.write().await;

        let stale: Vec<TileKey> = memory
            .iter()
            .filter(|(key, _)| &key.identity == identity)
            .map(|(key, _)| key.clone())
            .collect();

        for key in stale {
            if let Some(record) = memory.pop(&key) {
                *current_size = current_size.saturating_sub(record.len());
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
