//! Persistent tile storage.
//!
//! # Layout
//!
//! ```text
//! <root>/<identity-namespace>/index.json
//! <root>/<identity-namespace>/s<scale_milli>/<tier>/r<row>/c<col>.png
//! ```
//!
//! Each identity owns one namespace directory and one sidecar index listing
//! every record written for it. Clearing an identity deletes exactly the
//! indexed records and then the namespace directory; sibling namespaces are
//! never scanned.
//!
//! Records and indexes are written to a temporary sibling and renamed into
//! place, so a crash never leaves a half-written file under a live name.
//!
//! # Index saves
//!
//! A write updates the in-memory index and takes a numbered compact JSON
//! snapshot under the index lock, then saves it under a per-namespace lock.
//! A snapshot older than the last saved one is dropped, so lookups never wait
//! on index file I/O and a stale snapshot never replaces a newer one.

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::geometry::Rect;
use crate::source::{ImageIdentity, Tier};

use super::encoder::PngTileEncoder;
use super::record::{TileKey, TileRecord};

/// File name of the per-identity index.
pub const INDEX_FILE_NAME: &str = "index.json";

// =============================================================================
// TileStore Trait
// =============================================================================

/// Durable storage for tile records.
///
/// Implementations must be safe to share across tasks. The cache treats every
/// error as recoverable: read errors become misses, write errors are logged.
#[async_trait]
pub trait TileStore: Send + Sync {
    /// Read the record stored for `key`, or `None` if there is none.
    async fn read(&self, key: &TileKey) -> Result<Option<TileRecord>, StoreError>;

    /// Durably store `record` under `key`.
    async fn write(&self, key: &TileKey, record: &TileRecord) -> Result<(), StoreError>;

    /// Remove every record of `identity`. Returns the number of records removed.
    async fn clear(&self, identity: &ImageIdentity) -> Result<usize, StoreError>;

    /// Index entries currently stored for `identity`.
    async fn entries(&self, identity: &ImageIdentity) -> Result<Vec<IndexEntry>, StoreError>;
}

// =============================================================================
// Index
// =============================================================================

/// Metadata for one stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Record path relative to the identity namespace
    pub path: String,
    pub scale_milli: u32,
    pub tier: Tier,
    pub row: i64,
    pub col: i64,
    pub width: u32,
    pub height: u32,
    /// Logical rectangle the record covers
    pub rect: Rect,
    /// Size of the encoded record in bytes
    pub size: u64,
    /// Hex SHA-256 of the encoded record
    pub sha256: String,
}

/// On-disk index of one identity namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityIndex {
    /// Identity name (the namespace is its hash)
    pub identity: String,
    /// Entries keyed by [`TileKey::index_key`]
    pub entries: BTreeMap<String, IndexEntry>,
}

fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

// =============================================================================
// Disk Store
// =============================================================================

/// Filesystem-backed [`TileStore`].
///
/// Indexes are loaded lazily, one identity at a time, so records written by an
/// earlier process are found again after a restart.
pub struct DiskTileStore {
    root: PathBuf,
    encoder: PngTileEncoder,
    /// Loaded indexes keyed by identity namespace
    indexes: Mutex<HashMap<String, IdentityIndex>>,
    /// Last saved snapshot revision per namespace
    saved: Mutex<HashMap<String, Arc<Mutex<u64>>>>,
    /// Source of snapshot revisions, taken under the `indexes` lock
    revision: AtomicU64,
}

impl DiskTileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::io(&root, e))?;

        Ok(Self {
            root,
            encoder: PngTileEncoder::new(),
            indexes: Mutex::new(HashMap::new()),
            saved: Mutex::new(HashMap::new()),
            revision: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Namespace directory of `identity`.
    pub fn namespace_dir(&self, identity: &ImageIdentity) -> PathBuf {
        self.root.join(identity.namespace())
    }

    /// Absolute path of the record for `key`.
    pub fn record_path(&self, key: &TileKey) -> PathBuf {
        self.namespace_dir(&key.identity).join(key.relative_path())
    }

    fn index_path(&self, identity: &ImageIdentity) -> PathBuf {
        self.namespace_dir(identity).join(INDEX_FILE_NAME)
    }

    /// Read an index from disk. A missing index is an empty one; an unreadable
    /// one is logged and replaced.
    async fn load_index(&self, identity: &ImageIdentity) -> Result<IdentityIndex, StoreError> {
        let path = self.index_path(identity);
        let fresh = || IdentityIndex {
            identity: identity.name().to_string(),
            entries: BTreeMap::new(),
        };

        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(fresh()),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        match serde_json::from_slice::<IdentityIndex>(&raw) {
            Ok(index) => {
                debug!(
                    identity = %identity,
                    entries = index.entries.len(),
                    "loaded tile index"
                );
                Ok(index)
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "unreadable tile index, starting a new one"
                );
                Ok(fresh())
            }
        }
    }

    /// Run `f` against the loaded index of `identity`, loading it first if needed.
    async fn with_index<T>(
        &self,
        identity: &ImageIdentity,
        f: impl FnOnce(&mut IdentityIndex) -> T,
    ) -> Result<T, StoreError> {
        let mut indexes = self.indexes.lock().await;
        let namespace = identity.namespace();
        if !indexes.contains_key(&namespace) {
            let index = self.load_index(identity).await?;
            indexes.insert(namespace.clone(), index);
        }
        let index = indexes
            .get_mut(&namespace)
            .ok_or_else(|| StoreError::Index {
                path: self.index_path(identity).display().to_string(),
                message: "index vanished while loading".to_string(),
            })?;
        Ok(f(index))
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn saved_revision(&self, namespace: &str) -> Arc<Mutex<u64>> {
        let mut saved = self.saved.lock().await;
        saved.entry(namespace.to_string()).or_default().clone()
    }

    /// Save an index snapshot unless a newer one is already on disk.
    async fn save_index(
        &self,
        identity: &ImageIdentity,
        revision: u64,
        json: Vec<u8>,
    ) -> Result<(), StoreError> {
        let saved = self.saved_revision(&identity.namespace()).await;
        let mut saved = saved.lock().await;
        if *saved >= revision {
            return Ok(());
        }
        write_atomic(&self.index_path(identity), &json).await?;
        *saved = revision;
        Ok(())
    }
}

/// Write `data` to a temporary sibling of `path`, then rename it into place.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent, e))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, data)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StoreError::io(path, e));
    }
    Ok(())
}

#[async_trait]
impl TileStore for DiskTileStore {
    async fn read(&self, key: &TileKey) -> Result<Option<TileRecord>, StoreError> {
        let index_key = key.index_key();
        let Some(entry) = self
            .with_index(&key.identity, |index| index.entries.get(&index_key).cloned())
            .await?
        else {
            return Ok(None);
        };

        let path = self.namespace_dir(&key.identity).join(&entry.path);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => Bytes::from(data),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        let corrupt = |reason: String| StoreError::Corrupt {
            key: key.to_string(),
            reason,
        };

        if data.len() as u64 != entry.size {
            return Err(corrupt(format!(
                "expected {} bytes, found {}",
                entry.size,
                data.len()
            )));
        }
        let actual = checksum(&data);
        if actual != entry.sha256 {
            return Err(corrupt(format!(
                "checksum mismatch: expected {}, got {}",
                entry.sha256, actual
            )));
        }
        let dimensions = self
            .encoder
            .dimensions(&data)
            .map_err(|e| corrupt(e.to_string()))?;
        if dimensions != (entry.width, entry.height) {
            return Err(corrupt(format!(
                "expected {}x{} pixels, found {}x{}",
                entry.width, entry.height, dimensions.0, dimensions.1
            )));
        }

        Ok(Some(TileRecord {
            data,
            width: entry.width,
            height: entry.height,
            rect: entry.rect,
        }))
    }

    async fn write(&self, key: &TileKey, record: &TileRecord) -> Result<(), StoreError> {
        let relative = key.relative_path();
        let path = self.namespace_dir(&key.identity).join(&relative);
        write_atomic(&path, &record.data).await?;

        let entry = IndexEntry {
            path: relative.to_string_lossy().replace('\\', "/"),
            scale_milli: key.scale_milli,
            tier: key.tier,
            row: key.coord.row,
            col: key.coord.col,
            width: record.width,
            height: record.height,
            rect: record.rect,
            size: record.data.len() as u64,
            sha256: checksum(&record.data),
        };

        let snapshot = self
            .with_index(&key.identity, |index| {
                index.entries.insert(key.index_key(), entry);
                serde_json::to_vec(index).map(|json| (self.next_revision(), json))
            })
            .await?;
        let (revision, json) = snapshot.map_err(|e| StoreError::Index {
            path: self.index_path(&key.identity).display().to_string(),
            message: e.to_string(),
        })?;

        self.save_index(&key.identity, revision, json).await
    }

    async fn clear(&self, identity: &ImageIdentity) -> Result<usize, StoreError> {
        let mut indexes = self.indexes.lock().await;
        let namespace = identity.namespace();
        let index = match indexes.remove(&namespace) {
            Some(index) => index,
            None => self.load_index(identity).await?,
        };

        // Snapshots taken before this point describe deleted records.
        let saved = self.saved_revision(&namespace).await;
        let mut saved = saved.lock().await;
        *saved = self.next_revision();

        let dir = self.namespace_dir(identity);
        let mut removed = 0;
        for entry in index.entries.values() {
            let path = dir.join(&entry.path);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove tile"),
            }
        }

        // Drop the namespace itself, including unindexed leftovers of failed writes.
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&dir, e)),
        }

        debug!(identity = %identity, removed, "cleared tile namespace");
        Ok(removed)
    }

    async fn entries(&self, identity: &ImageIdentity) -> Result<Vec<IndexEntry>, StoreError> {
        self.with_index(identity, |index| index.entries.values().cloned().collect())
            .await
    }
}
