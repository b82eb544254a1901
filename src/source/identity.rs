use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// Opaque token for the logical image currently bound to the tile cache.
///
/// Every cached tile is scoped to exactly one identity. The identity name can
/// be anything (a file name, a content hash); [`ImageIdentity::namespace`]
/// turns it into a fixed-length, path-safe storage segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageIdentity {
    name: Arc<str>,
}

impl ImageIdentity {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { name: name.into() }
    }

    /// Identity derived from the SHA-256 of the encoded source bytes.
    pub fn from_content(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        Self::new(format!("sha256:{}", hex::encode(digest)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage namespace for this identity: hex SHA-256 of the name.
    pub fn namespace(&self) -> String {
        hex::encode(Sha256::digest(self.name.as_bytes()))
    }
}

impl fmt::Display for ImageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for ImageIdentity {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}
