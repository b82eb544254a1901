//! Loading tier sources from image files.

use std::path::Path;

use tracing::debug;

use crate::error::TileError;

use super::identity::ImageIdentity;
use super::tier::{ResolutionTier, Tier};

/// Decode an image file into a [`ResolutionTier`].
///
/// Decoding runs on the blocking pool.
pub async fn load_tier(tier: Tier, path: impl AsRef<Path>) -> Result<ResolutionTier, TileError> {
    let path = path.as_ref().to_path_buf();
    let shown = path.display().to_string();

    let image = tokio::task::spawn_blocking(move || image::open(&path).map(|img| img.to_rgba8()))
        .await
        .map_err(|e| TileError::Task {
            message: e.to_string(),
        })?
        .map_err(|e| TileError::SourceLoad {
            path: shown.clone(),
            message: e.to_string(),
        })?;

    debug!(
        tier = %tier,
        path = %shown,
        width = image.width(),
        height = image.height(),
        "loaded source tier"
    );

    Ok(ResolutionTier::new(tier, image))
}

/// Content-hash identity of an image file.
pub async fn identity_for_file(path: impl AsRef<Path>) -> Result<ImageIdentity, TileError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| TileError::SourceLoad {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    Ok(ImageIdentity::from_content(&bytes))
}
