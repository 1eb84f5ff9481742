//! Tunables for opening a cloud database.

use std::{path::PathBuf, sync::Arc};

use crate::engine::TableFactory;

/// Manifest size ceiling applied at open time. The manifest is mirrored to
/// the object store on every update, so rolling it early keeps uploads small.
pub(crate) const MAX_MANIFEST_FILE_SIZE: u64 = 4 * 1024 * 1024;

/// Configure the engine-facing parameters of a cloud database open.
#[derive(Clone)]
pub struct CloudDbOption {
    /// Cap on concurrently open files; `-1` opens everything at startup and
    /// is required when no destination bucket is configured.
    pub max_open_files: i32,
    /// Size at which the engine rolls its manifest; forced to a small
    /// internal constant at open time.
    pub max_manifest_file_size: u64,
    /// Parallelism used when opening files and publishing savepoints.
    pub max_file_opening_threads: usize,
    /// Table factory shared with the engine; the open pipeline installs a
    /// persistent cache on it when directed.
    pub table_factory: Arc<TableFactory>,
}

impl Default for CloudDbOption {
    fn default() -> Self {
        Self {
            max_open_files: -1,
            max_manifest_file_size: MAX_MANIFEST_FILE_SIZE,
            max_file_opening_threads: 16,
            table_factory: Arc::new(TableFactory::default()),
        }
    }
}

impl CloudDbOption {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the open-files cap.
    pub fn max_open_files(mut self, max_open_files: i32) -> Self {
        self.max_open_files = max_open_files;
        self
    }

    /// Set the file-opening and savepoint parallelism.
    pub fn max_file_opening_threads(mut self, threads: usize) -> Self {
        self.max_file_opening_threads = threads;
        self
    }

    /// Share a table factory between options instances.
    pub fn table_factory(mut self, table_factory: Arc<TableFactory>) -> Self {
        self.table_factory = table_factory;
        self
    }
}

impl std::fmt::Debug for CloudDbOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudDbOption")
            .field("max_open_files", &self.max_open_files)
            .field("max_manifest_file_size", &self.max_manifest_file_size)
            .field("max_file_opening_threads", &self.max_file_opening_threads)
            .field(
                "persistent_cache",
                &self.table_factory.has_persistent_cache(),
            )
            .finish()
    }
}

/// Directive to install a persistent cache while opening.
#[derive(Clone, Debug)]
pub struct PersistentCacheConfig {
    /// Directory backing the cache.
    pub path: PathBuf,
    /// Capacity in GiB; zero disables installation.
    pub size_gb: u64,
}
