//! Tile cache integration tests over the disk store.
//!
//! Tests verify:
//! - Repeated gets return identical bytes and synthesize once
//! - Persisted records decode to the synthesized pixels, across restarts
//! - Clearing one identity never exposes or removes another's records
//! - Concurrent gets for one key synthesize once
//! - An unwritable store degrades to re-synthesis, never to errors
//! - Concurrent gets over an unwritable store still synthesize once

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use tile_pyramid::{
    DiskTileStore, ImageIdentity, PngTileEncoder, Rect, RenderRequestPlanner, SourceSet, Tier,
    TileCache, TileCoord, TileKey, TileStore,
};

use super::test_utils::{
    counted_synthesis, patterned_tier, small_tiles, solid_tier, FailingStore, TrackingStore,
};

fn key(identity: &str, row: i64, col: i64) -> TileKey {
    TileKey::new(ImageIdentity::new(identity), 1000, Tier::Low, TileCoord::new(row, col))
}

// =============================================================================
// Idempotence and Round Trip
// =============================================================================

#[tokio::test]
async fn test_get_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = TrackingStore::open(dir.path()).await;
    let cache = TileCache::new(store.clone());
    let source = patterned_tier(Tier::Low, 128, 128, 3);
    let calls = AtomicUsize::new(0);
    let rect = Rect::new(64.0, 0.0, 64.0, 64.0);

    let first = cache
        .get(&key("galaxy", 0, 1), || counted_synthesis(&calls, &source, rect))
        .await
        .unwrap();
    let second = cache
        .get(&key("galaxy", 0, 1), || counted_synthesis(&calls, &source, rect))
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.record.data, second.record.data);
    assert_eq!(store.write_count(), 1);
}

#[tokio::test]
async fn test_persisted_record_round_trips_pixels() {
    let dir = TempDir::new().unwrap();
    let source = patterned_tier(Tier::Low, 96, 96, 9);
    let rect = Rect::new(32.0, 32.0, 32.0, 32.0);
    let calls = AtomicUsize::new(0);

    let synthesized = {
        let cache = TileCache::new(DiskTileStore::open(dir.path()).await.unwrap());
        cache
            .get(&key("galaxy", 1, 1), || counted_synthesis(&calls, &source, rect))
            .await
            .unwrap()
            .record
    };

    // A fresh store over the same directory stands in for a restart.
    let store = DiskTileStore::open(dir.path()).await.unwrap();
    let stored = store.read(&key("galaxy", 1, 1)).await.unwrap().unwrap();

    let encoder = PngTileEncoder::new();
    let expected = encoder.decode(&synthesized.data).unwrap();
    assert_eq!(encoder.decode(&stored.data).unwrap(), expected);
    assert_eq!(stored.rect, rect);
    assert_eq!(expected.get_pixel(0, 0).0, [32, 32, 9, 255]);
}

#[tokio::test]
async fn test_restart_serves_from_store_without_synthesis() {
    let dir = TempDir::new().unwrap();
    let source = patterned_tier(Tier::Low, 64, 64, 1);
    let rect = Rect::new(0.0, 0.0, 32.0, 32.0);
    let calls = AtomicUsize::new(0);

    {
        let cache = TileCache::new(DiskTileStore::open(dir.path()).await.unwrap());
        cache
            .get(&key("galaxy", 0, 0), || counted_synthesis(&calls, &source, rect))
            .await
            .unwrap();
    }

    let cache = TileCache::new(DiskTileStore::open(dir.path()).await.unwrap());
    let lookup = cache
        .get(&key("galaxy", 0, 0), || counted_synthesis(&calls, &source, rect))
        .await
        .unwrap();

    assert!(lookup.cache_hit);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Identity Isolation
// =============================================================================

#[tokio::test]
async fn test_identity_isolation_with_colliding_coordinates() {
    let dir = TempDir::new().unwrap();
    let cache = TileCache::new(DiskTileStore::open(dir.path()).await.unwrap());
    let dark = solid_tier(Tier::Low, 64, 64, 10);
    let light = solid_tier(Tier::Low, 64, 64, 240);
    let rect = Rect::new(0.0, 0.0, 32.0, 32.0);
    let calls = AtomicUsize::new(0);

    cache
        .get(&key("first", 0, 0), || counted_synthesis(&calls, &dark, rect))
        .await
        .unwrap();
    cache.clear(&ImageIdentity::new("first")).await.unwrap();

    // Same row, col, tier and scale under a different identity.
    let lookup = cache
        .get(&key("second", 0, 0), || counted_synthesis(&calls, &light, rect))
        .await
        .unwrap();

    assert!(!lookup.cache_hit);
    let pixels = PngTileEncoder::new().decode(&lookup.record.data).unwrap();
    assert_eq!(pixels.get_pixel(5, 5).0, [240, 240, 240, 255]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_clear_leaves_other_identities() {
    let dir = TempDir::new().unwrap();
    let cache = TileCache::new(DiskTileStore::open(dir.path()).await.unwrap());
    let source = solid_tier(Tier::Low, 64, 64, 90);
    let rect = Rect::new(0.0, 0.0, 32.0, 32.0);
    let calls = AtomicUsize::new(0);

    for identity in ["first", "second"] {
        for col in 0..2 {
            cache
                .get(&key(identity, 0, col), || counted_synthesis(&calls, &source, rect))
                .await
                .unwrap();
        }
    }

    let removed = cache.clear(&ImageIdentity::new("first")).await.unwrap();
    assert_eq!(removed, 2);

    let store = cache.store();
    assert!(store.entries(&ImageIdentity::new("first")).await.unwrap().is_empty());
    assert_eq!(store.entries(&ImageIdentity::new("second")).await.unwrap().len(), 2);
    assert!(cache.cached(&key("second", 0, 1)).await.is_some());
    assert!(cache.cached(&key("first", 0, 1)).await.is_none());
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_gets_synthesize_once() {
    let dir = TempDir::new().unwrap();
    let store = TrackingStore::open(dir.path()).await;
    let cache = Arc::new(TileCache::new(store.clone()));
    let source = patterned_tier(Tier::Low, 256, 256, 5);
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let cache = Arc::clone(&cache);
        let source = source.clone();
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            cache
                .get(&key("galaxy", 2, 3), || async {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    counted_synthesis(&calls, &source, Rect::new(0.0, 0.0, 128.0, 128.0)).await
                })
                .await
                .unwrap()
                .record
        }));
    }

    let mut records = Vec::new();
    for handle in handles {
        records.push(handle.await.unwrap());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.write_count(), 1);
    assert!(records.windows(2).all(|pair| pair[0] == pair[1]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_gets_for_distinct_keys() {
    let dir = TempDir::new().unwrap();
    let store = TrackingStore::open(dir.path()).await;
    let cache = Arc::new(TileCache::new(store.clone()));
    let source = patterned_tier(Tier::Low, 256, 256, 5);
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for col in 0..8 {
        let cache = Arc::clone(&cache);
        let source = source.clone();
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            let rect = Rect::new(col as f64 * 32.0, 0.0, 32.0, 32.0);
            cache
                .get(&key("galaxy", 0, col), || counted_synthesis(&calls, &source, rect))
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        assert!(!handle.await.unwrap().cache_hit);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 8);
    assert_eq!(store.write_count(), 8);
    assert_eq!(
        store.inner().entries(&ImageIdentity::new("galaxy")).await.unwrap().len(),
        8
    );
    assert!(store.read_count() >= 8);
}

// =============================================================================
// Storage Failures
// =============================================================================

#[tokio::test]
async fn test_unwritable_store_still_serves_tiles() {
    // Memory layer disabled so every get reaches the store.
    let cache = TileCache::with_memory_capacity(FailingStore::default(), 0);
    let source = patterned_tier(Tier::Low, 64, 64, 2);
    let rect = Rect::new(0.0, 0.0, 32.0, 32.0);
    let calls = AtomicUsize::new(0);

    let first = cache
        .get(&key("galaxy", 0, 0), || counted_synthesis(&calls, &source, rect))
        .await
        .unwrap();
    let second = cache
        .get(&key("galaxy", 0, 0), || counted_synthesis(&calls, &source, rect))
        .await
        .unwrap();

    assert!(!first.cache_hit && !second.cache_hit);
    assert_eq!(first.record, second.record);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.store().write_attempts(), 2);

    let stats = cache.stats().await;
    assert_eq!(stats.write_failures, 2);
    assert!(stats.read_failures >= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_gets_over_unwritable_store_synthesize_once() {
    let cache = Arc::new(TileCache::with_memory_capacity(FailingStore::default(), 0));
    let source = patterned_tier(Tier::Low, 64, 64, 6);
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = Arc::clone(&cache);
        let source = source.clone();
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            cache
                .get(&key("galaxy", 0, 0), || async {
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    counted_synthesis(&calls, &source, Rect::new(0.0, 0.0, 32.0, 32.0)).await
                })
                .await
                .unwrap()
                .record
        }));
    }

    let mut records = Vec::new();
    for handle in handles {
        records.push(handle.await.unwrap());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.store().write_attempts(), 1);
    assert!(records.windows(2).all(|pair| pair[0] == pair[1]));
}

#[tokio::test]
async fn test_planner_survives_failing_store() {
    let planner = RenderRequestPlanner::new(FailingStore::default(), small_tiles(50));
    planner
        .display_image(
            ImageIdentity::new("galaxy"),
            SourceSet::new().with(solid_tier(Tier::Low, 100, 100, 5)),
        )
        .await
        .unwrap();

    let tiles = planner
        .plan(Rect::new(0.0, 0.0, 100.0, 100.0), 1.0)
        .await
        .unwrap();
    assert_eq!(tiles.len(), 4);
}
