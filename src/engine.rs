//! Contracts the inner LSM engine fulfills for the cloud layer.

use std::{future::Future, path::Path, sync::Arc};

use parking_lot::Mutex;

use crate::{env::CloudEnv, error::Result, options::CloudDbOption};

/// Name of the column family every database carries.
pub const DEFAULT_COLUMN_FAMILY_NAME: &str = "default";

/// Description of a column family handed to the engine at open.
#[derive(Clone, Debug)]
pub struct ColumnFamilyDescriptor {
    /// Column family name.
    pub name: String,
}

impl ColumnFamilyDescriptor {
    /// Describe a column family by name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for ColumnFamilyDescriptor {
    fn default() -> Self {
        Self::new(DEFAULT_COLUMN_FAMILY_NAME)
    }
}

/// A data file referenced by the engine's latest version.
#[derive(Clone, Debug)]
pub struct LiveFileMetadata {
    /// Engine-visible file name.
    pub name: String,
    /// Size of the file in bytes.
    pub size: u64,
    /// Level the file lives on.
    pub level: u32,
}

/// Handle to a disk-backed cache serving table blocks across restarts.
#[derive(Debug)]
pub struct PersistentCache {
    path: std::path::PathBuf,
    capacity_bytes: u64,
}

impl PersistentCache {
    /// Create a cache rooted at `path` with a capacity given in GiB.
    pub async fn new(path: &Path, size_gb: u64) -> Result<Self> {
        tokio::fs::create_dir_all(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            capacity_bytes: size_gb * 1024 * 1024 * 1024,
        })
    }

    /// Directory backing the cache.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cache capacity in bytes.
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }
}

/// Table construction options shared with the engine.
///
/// Holds the optional persistent cache; the open pipeline installs one only
/// when none is present.
#[derive(Default)]
pub struct TableFactory {
    persistent_cache: Mutex<Option<Arc<PersistentCache>>>,
}

impl TableFactory {
    /// Whether a persistent cache is already installed.
    pub fn has_persistent_cache(&self) -> bool {
        self.persistent_cache.lock().is_some()
    }

    /// Install a persistent cache.
    pub fn set_persistent_cache(&self, cache: Arc<PersistentCache>) {
        *self.persistent_cache.lock() = Some(cache);
    }

    /// The installed persistent cache, if any.
    pub fn persistent_cache(&self) -> Option<Arc<PersistentCache>> {
        self.persistent_cache.lock().clone()
    }
}

impl std::fmt::Debug for TableFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableFactory")
            .field("persistent_cache", &self.has_persistent_cache())
            .finish()
    }
}

/// The LSM engine beneath the cloud layer.
///
/// The engine opens against a local directory whose file reads and writes
/// flow through [`CloudEnv::remap_filename`] and the environment's
/// read-through, so the fixed names it believes in resolve to epoch-stamped
/// files.
pub trait LsmEngine: Send + Sync + Sized {
    /// Open the engine at `local_dbname` under `env`'s filename indirection.
    fn open(
        env: Arc<CloudEnv>,
        options: &CloudDbOption,
        local_dbname: &Path,
        column_families: &[ColumnFamilyDescriptor],
        read_only: bool,
    ) -> impl Future<Output = Result<Self>> + Send;

    /// Data files referenced by the engine's latest version.
    fn live_files_metadata(&self) -> Vec<LiveFileMetadata>;

    /// The database identity string.
    fn db_identity(&self) -> Result<String>;

    /// Make the engine's current manifest durable.
    fn flush(&self) -> impl Future<Output = Result<()>> + Send;
}
