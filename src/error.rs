use thiserror::Error;

/// Errors raised by persistent tile storage.
///
/// Storage is best-effort: callers log these and fall back to synthesis,
/// they never end a display session.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Filesystem error while reading or writing a record
    #[error("I/O error at {path}: {message}")]
    Io { path: String, message: String },

    /// The per-identity index could not be read or written
    #[error("Index error at {path}: {message}")]
    Index { path: String, message: String },

    /// A stored record exists but its bytes do not match the index
    #[error("Corrupt tile record {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, err: std::io::Error) -> Self {
        StoreError::Io {
            path: path.as_ref().display().to_string(),
            message: err.to_string(),
        }
    }
}

/// Errors that can occur while producing a tile for a redraw.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// `plan` or `request` was called before any image was displayed
    #[error("No image is currently displayed")]
    NoImage,

    /// Scale factor is zero, negative or not finite
    #[error("Invalid scale: {scale}")]
    InvalidScale { scale: f64 },

    /// Viewport rectangle has non-finite coordinates
    #[error("Invalid viewport: {message}")]
    InvalidViewport { message: String },

    /// A display request carried no decoded source at all
    #[error("No source tiers available for image {identity}")]
    NoSourceTiers { identity: String },

    /// A source image file could not be read or decoded
    #[error("Failed to load source {path}: {message}")]
    SourceLoad { path: String, message: String },

    /// The mapped crop rectangle is empty after clamping to the source
    #[error("Tile region is empty after clamping: {width}x{height} source, region {region}")]
    EmptyRegion {
        width: u32,
        height: u32,
        region: String,
    },

    /// Failed to decode stored tile bytes
    #[error("Failed to decode tile: {message}")]
    Decode { message: String },

    /// Failed to encode tile pixels
    #[error("Failed to encode tile: {message}")]
    Encode { message: String },

    /// The identity was cleared while the tile was being synthesized
    #[error("Tile synthesis superseded: image {identity} was cleared")]
    Superseded { identity: String },

    /// A background synthesis task panicked or was cancelled
    #[error("Tile task failed: {message}")]
    Task { message: String },

    /// Storage error that could not be recovered locally
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}
