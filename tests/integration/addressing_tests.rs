//! Tile addressing integration tests.
//!
//! Tests verify:
//! - The reference viewport scenarios at scale 1.0 and 0.5
//! - Covering tiles are exactly those whose footprint intersects the rectangle
//! - Degenerate rectangles cover nothing

use tile_pyramid::{tiles_covering, Rect, TileCoord, TileSize};

fn pairs(coords: &[TileCoord]) -> Vec<(i64, i64)> {
    coords.iter().map(|c| (c.row, c.col)).collect()
}

// =============================================================================
// Reference Scenarios
// =============================================================================

#[test]
fn test_viewport_at_unit_scale() {
    let coords = tiles_covering(
        Rect::new(0.0, 0.0, 1200.0, 800.0),
        TileSize::square(500),
        1.0,
    );

    assert_eq!(
        pairs(&coords),
        vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)]
    );
}

#[test]
fn test_viewport_at_half_scale() {
    let coords = tiles_covering(
        Rect::new(0.0, 0.0, 1200.0, 800.0),
        TileSize::square(500),
        0.5,
    );

    assert_eq!(pairs(&coords), vec![(0, 0), (0, 1)]);
}

// =============================================================================
// Covering Property
// =============================================================================

/// Brute-force reference: every tile in a generous window whose footprint
/// overlaps `rect` with positive area.
fn brute_force(rect: Rect, tile: TileSize, scale: f64) -> Vec<(i64, i64)> {
    let mut expected = Vec::new();
    for row in -50..100 {
        for col in -50..100 {
            let footprint = TileCoord::new(row, col).rect(tile, scale);
            if footprint.intersects(&rect) {
                expected.push((row, col));
            }
        }
    }
    expected
}

#[test]
fn test_covering_matches_brute_force() {
    let rects = [
        Rect::new(0.0, 0.0, 1200.0, 800.0),
        Rect::new(499.0, 499.0, 2.0, 2.0),
        Rect::new(500.0, 500.0, 500.0, 500.0),
        Rect::new(-730.0, -120.0, 900.0, 333.0),
        Rect::new(1234.0, 77.0, 4321.0, 10.0),
    ];
    let tiles = [TileSize::square(500), TileSize::new(256, 128), TileSize::square(333)];
    let scales = [0.25, 0.5, 1.0, 1.5, 2.0];

    for rect in rects {
        for tile in tiles {
            for scale in scales {
                let covering = pairs(&tiles_covering(rect, tile, scale));
                assert_eq!(
                    covering,
                    brute_force(rect, tile, scale),
                    "rect {} tile {:?} scale {}",
                    rect,
                    tile,
                    scale
                );
            }
        }
    }
}

#[test]
fn test_degenerate_rects_cover_nothing() {
    let tile = TileSize::square(500);
    for rect in [
        Rect::new(0.0, 0.0, 0.0, 0.0),
        Rect::new(100.0, 100.0, -50.0, 20.0),
        Rect::new(100.0, 100.0, 20.0, -50.0),
    ] {
        assert!(tiles_covering(rect, tile, 1.0).is_empty(), "rect {}", rect);
    }
}
