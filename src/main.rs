//! Tile Pyramid - plan, inspect and clear tiled renderings of large images.
//!
//! Logs go to stderr; command results are printed to stdout as JSON.

use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tile_pyramid::{
    config::{ClearConfig, Cli, Command, InspectConfig, PlanConfig},
    identity_for_file, load_tier, DiskTileStore, ImageIdentity, PlannedTile, RenderRequestPlanner,
    SourceSet, Tier, TileStore,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Plan(config) => run_plan(config).await,
        Command::Clear(config) => run_clear(config).await,
        Command::Inspect(config) => run_inspect(config).await,
    }
}

// =============================================================================
// Plan Command
// =============================================================================

async fn run_plan(config: PlanConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let pyramid = config.pyramid();

    // Load every configured tier
    let mut sources = SourceSet::new();
    let paths = [
        (Tier::Low, config.low.as_deref()),
        (Tier::Medium, config.medium.as_deref()),
        (Tier::High, config.high.as_deref()),
    ];
    for (tier, path) in paths {
        let Some(path) = path else { continue };
        match load_tier(tier, path).await {
            Ok(source) => {
                info!("  {} tier: {}x{} ({})", tier, source.width(), source.height(), path.display());
                sources.insert(source);
            }
            Err(e) => {
                error!("Failed to load {} tier: {}", tier, e);
                return ExitCode::FAILURE;
            }
        }
    }

    let identity = match resolve_identity(&config).await {
        Ok(identity) => identity,
        Err(e) => {
            error!("Failed to derive image identity: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let store = match DiskTileStore::open(&config.cache_dir).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open tile cache: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let planner = RenderRequestPlanner::new(store, pyramid.clone());
    if let Err(e) = planner.display_image(identity.clone(), sources).await {
        error!("Failed to display image: {}", e);
        return ExitCode::FAILURE;
    }

    // Zoom bounds are fitted to the view when one is given
    let mut zoom = pyramid.zoom;
    let mut scale = config.scale.unwrap_or(1.0);
    if let (Some(view), Some(bounds)) = (config.view_size, planner.image_bounds().await) {
        let fitted = zoom.for_view(view, bounds.size());
        zoom = fitted.bounds;
        scale = config.scale.unwrap_or(fitted.initial);
    }
    let clamped = zoom.clamp(scale);
    if clamped != scale {
        warn!(
            "Scale {} is outside the zoom bounds [{}, {}], using {}",
            scale, zoom.min, zoom.max, clamped
        );
    }

    let tiles = match planner.plan(config.viewport, clamped).await {
        Ok(tiles) => tiles,
        Err(e) => {
            error!("Failed to plan viewport: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(ref dir) = config.export_dir {
        if let Err(e) = export_tiles(dir, &tiles).await {
            error!("Failed to export tiles to {}: {}", dir.display(), e);
            return ExitCode::FAILURE;
        }
        info!("Exported {} tile(s) to {}", tiles.len(), dir.display());
    }

    let stats = planner.cache().stats().await;
    let json = serde_json::json!({
        "identity": identity.name(),
        "viewport": config.viewport,
        "scale": clamped,
        "zoom": { "min": zoom.min, "max": zoom.max },
        "tiles": tiles.iter().map(tile_json).collect::<Vec<_>>(),
        "stats": stats,
    });
    print_json(&json)
}

/// Use the explicit identity, else the content hash of the lowest tier file.
async fn resolve_identity(config: &PlanConfig) -> Result<ImageIdentity, tile_pyramid::TileError> {
    if let Some(ref name) = config.identity {
        return Ok(ImageIdentity::new(name.as_str()));
    }

    let lowest = config
        .low
        .as_ref()
        .or(config.medium.as_ref())
        .or(config.high.as_ref())
        .ok_or(tile_pyramid::TileError::NoImage)?;
    identity_for_file(lowest).await
}

fn tile_json(tile: &PlannedTile) -> serde_json::Value {
    serde_json::json!({
        "row": tile.coord.row,
        "col": tile.coord.col,
        "tier": tile.key.tier,
        "destination": tile.destination,
        "width": tile.record.width,
        "height": tile.record.height,
        "bytes": tile.record.len(),
        "cache_hit": tile.cache_hit,
    })
}

async fn export_tiles(dir: &Path, tiles: &[PlannedTile]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    for tile in tiles {
        let name = format!("r{}_c{}.png", tile.coord.row, tile.coord.col);
        tokio::fs::write(dir.join(name), &tile.record.data).await?;
    }
    Ok(())
}

// =============================================================================
// Clear Command
// =============================================================================

async fn run_clear(config: ClearConfig) -> ExitCode {
    init_logging(config.verbose);

    let identity = ImageIdentity::new(config.identity.as_str());
    let store = match DiskTileStore::open(&config.cache_dir).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open tile cache: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match store.clear(&identity).await {
        Ok(removed) => {
            info!("Removed {} tile(s) for {}", removed, identity);
            print_json(&serde_json::json!({
                "identity": identity.name(),
                "removed": removed,
            }))
        }
        Err(e) => {
            error!("Failed to clear tiles for {}: {}", identity, e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Inspect Command
// =============================================================================

async fn run_inspect(config: InspectConfig) -> ExitCode {
    init_logging(config.verbose);

    let identity = ImageIdentity::new(config.identity.as_str());
    let store = match DiskTileStore::open(&config.cache_dir).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open tile cache: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match store.entries(&identity).await {
        Ok(entries) => {
            let bytes: u64 = entries.iter().map(|entry| entry.size).sum();
            print_json(&serde_json::json!({
                "identity": identity.name(),
                "namespace": store.namespace_dir(&identity),
                "count": entries.len(),
                "bytes": bytes,
                "entries": entries,
            }))
        }
        Err(e) => {
            error!("Failed to read index for {}: {}", identity, e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn print_json(value: &serde_json::Value) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to serialize output: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tile_pyramid=debug"
    } else {
        "tile_pyramid=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
