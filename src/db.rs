//! Opening a cloud-backed database and publishing savepoints.
//!
//! The open pipeline treats the local directory as a cache over the
//! configured bucket pair: sanitize, migrate legacy manifests, fetch and
//! load the cloud manifest, roll the epoch, sweep invisible files, then hand
//! control to the engine.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use crate::{
    bootstrap,
    engine::{ColumnFamilyDescriptor, LsmEngine, PersistentCache},
    env::CloudEnv,
    error::{Error, Result},
    filename, fs,
    logging::cirrus_log,
    options::{CloudDbOption, PersistentCacheConfig, MAX_MANIFEST_FILE_SIZE},
    roll,
    store::BucketAddress,
};

/// A cloud-backed database: an open engine plus the environment that keeps
/// its files durable in the object store.
///
/// Dropping the handle flushes the engine so the latest manifest reaches the
/// cloud; prefer [`DbCloud::close`] to observe flush errors.
pub struct DbCloud<E: LsmEngine> {
    engine: Option<E>,
    env: Arc<CloudEnv>,
    options: CloudDbOption,
    local_dbname: PathBuf,
    dbid: String,
}

impl<E: LsmEngine> std::fmt::Debug for DbCloud<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbCloud")
            .field("local_dbname", &self.local_dbname)
            .field("dbid", &self.dbid)
            .finish()
    }
}

impl<E: LsmEngine> DbCloud<E> {
    /// Open a cloud database with the given column families.
    pub async fn open(
        env: Arc<CloudEnv>,
        options: CloudDbOption,
        local_dbname: impl AsRef<Path>,
        column_families: &[ColumnFamilyDescriptor],
        persistent_cache: Option<PersistentCacheConfig>,
        read_only: bool,
    ) -> Result<Self> {
        let local_dbname = local_dbname.as_ref().to_path_buf();
        let mut options = options;
        cirrus_log!(
            log::Level::Info,
            "open",
            "opening cloud db at {} (read_only={read_only})",
            local_dbname.display()
        );

        if !read_only {
            bootstrap::sanitize_directory(&env, &options, &local_dbname, read_only).await?;
            bootstrap::maybe_migrate_manifest_file(&local_dbname).await?;
            bootstrap::fetch_cloud_manifest(&env, &local_dbname).await?;
            env.load_local_cloud_manifest(&local_dbname).await?;
            roll::maybe_roll_new_epoch(&env, &local_dbname).await?;
            // Cleanup, not correctness: log and carry on.
            if let Err(err) = env.delete_invisible_files(&local_dbname).await {
                cirrus_log!(
                    log::Level::Info,
                    "cleanup",
                    "failed to delete invisible files: {err}"
                );
            }
        }

        if let Some(cache) = persistent_cache {
            if cache.size_gb > 0 && !options.table_factory.has_persistent_cache() {
                let installed = PersistentCache::new(&cache.path, cache.size_gb).await?;
                cirrus_log!(
                    log::Level::Info,
                    "open",
                    "created persistent cache {} with size {} GB",
                    cache.path.display(),
                    cache.size_gb
                );
                options.table_factory.set_persistent_cache(Arc::new(installed));
            }
        }

        // The manifest is uploaded on every update; keep it small.
        options.max_manifest_file_size = MAX_MANIFEST_FILE_SIZE;

        let engine = E::open(
            Arc::clone(&env),
            &options,
            &local_dbname,
            column_families,
            read_only,
        )
        .await?;

        // The open path verified every file it touched; further per-file
        // size validation is redundant. Background work may race this store,
        // which is harmless for a latch that only moves one way.
        if env.validate_filesize() {
            env.disable_filesize_validation();
        }

        let dbid = engine.db_identity()?;

        if !read_only {
            if let Some(dest) = env.dest_bucket() {
                let identity_path = local_dbname.join(filename::IDENTITY_FILE);
                if fs::exists(&identity_path).await? {
                    env.store_manager()
                        .put_object(
                            &identity_path,
                            dest.bucket(),
                            &dest.object_key(filename::IDENTITY_FILE),
                        )
                        .await?;
                    env.store_manager()
                        .register_dbid(dest.bucket(), &dbid, dest.object_prefix())
                        .await?;
                }
            }
        }

        cirrus_log!(
            log::Level::Info,
            "open",
            "opened cloud db at {} dbid {dbid}",
            local_dbname.display()
        );
        Ok(Self {
            engine: Some(engine),
            env,
            options,
            local_dbname,
            dbid,
        })
    }

    /// Open with the single default column family.
    pub async fn open_default(
        env: Arc<CloudEnv>,
        options: CloudDbOption,
        local_dbname: impl AsRef<Path>,
        persistent_cache: Option<PersistentCacheConfig>,
        read_only: bool,
    ) -> Result<Self> {
        Self::open(
            env,
            options,
            local_dbname,
            &[ColumnFamilyDescriptor::default()],
            persistent_cache,
            read_only,
        )
        .await
    }

    /// The identity of the opened database.
    pub fn dbid(&self) -> &str {
        &self.dbid
    }

    /// The environment backing this database.
    pub fn env(&self) -> &Arc<CloudEnv> {
        &self.env
    }

    /// The local directory the database is cached in.
    pub fn local_dbname(&self) -> &Path {
        &self.local_dbname
    }

    fn engine_ref(&self) -> &E {
        self.engine
            .as_ref()
            .expect("engine is present until close consumes the handle")
    }

    /// Mirror every live data file into the destination bucket, making the
    /// destination a self-sufficient copy of the database.
    ///
    /// Missing files are copied on `max_file_opening_threads` workers that
    /// drain a shared index; the first failure wins and is returned after
    /// every worker has stopped.
    pub async fn savepoint(&self) -> Result<()> {
        let dbid = self.engine_ref().db_identity()?;
        let Some(dest) = self.env.dest_bucket().cloned() else {
            cirrus_log!(
                log::Level::Info,
                "savepoint",
                "savepoint on dbid {dbid} has no destination bucket, nothing to do"
            );
            return Ok(());
        };
        cirrus_log!(log::Level::Info, "savepoint", "savepoint on dbid {dbid}");

        let live_files = self.engine_ref().live_files_metadata();
        let mut to_copy = Vec::new();
        for file in &live_files {
            let remapped = self.env.remap_filename(&file.name);
            let present = self
                .env
                .store_manager()
                .exists_object(dest.bucket(), &dest.object_key(&remapped))
                .await?;
            if !present {
                to_copy.push(remapped);
            }
        }
        if to_copy.is_empty() {
            return Ok(());
        }

        let to_copy = Arc::new(to_copy);
        let next_file_idx = Arc::new(AtomicUsize::new(0));
        let first_error: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));
        let workers = self.options.max_file_opening_threads;

        if workers <= 1 {
            copy_worker(
                Arc::clone(&self.env),
                dest,
                self.local_dbname.clone(),
                to_copy,
                next_file_idx,
                Arc::clone(&first_error),
            )
            .await;
        } else {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    tokio::spawn(copy_worker(
                        Arc::clone(&self.env),
                        dest.clone(),
                        self.local_dbname.clone(),
                        Arc::clone(&to_copy),
                        Arc::clone(&next_file_idx),
                        Arc::clone(&first_error),
                    ))
                })
                .collect();
            for handle in futures::future::join_all(handles).await {
                handle?;
            }
        }

        let result = match first_error.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        };
        result
    }

    /// Flush the engine and consume the handle, so the latest manifest is
    /// durable in the object store.
    pub async fn close(mut self) -> Result<()> {
        if let Some(engine) = self.engine.take() {
            engine.flush().await?;
        }
        Ok(())
    }
}

impl<E: LsmEngine> std::ops::Deref for DbCloud<E> {
    type Target = E;

    fn deref(&self) -> &Self::Target {
        self.engine_ref()
    }
}

impl<E: LsmEngine> Drop for DbCloud<E> {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            if let Err(err) = futures::executor::block_on(engine.flush()) {
                cirrus_log!(
                    log::Level::Warn,
                    "close",
                    "flush on drop failed for dbid {}: {err}",
                    self.dbid
                );
            }
        }
    }
}

/// Drain the shared file index, copying each claimed file into dest.
///
/// Files are copied from src when one is configured; a dest-only instance
/// uploads its local copy instead. Workers stop at exhaustion or on the
/// first error they observe.
async fn copy_worker(
    env: Arc<CloudEnv>,
    dest: BucketAddress,
    local_dbname: PathBuf,
    files: Arc<Vec<String>>,
    next_file_idx: Arc<AtomicUsize>,
    first_error: Arc<Mutex<Option<Error>>>,
) {
    loop {
        let idx = next_file_idx.fetch_add(1, Ordering::SeqCst);
        if idx >= files.len() {
            break;
        }
        let name = &files[idx];
        let outcome = match env.src_bucket() {
            Some(src) => {
                env.store_manager()
                    .copy_object(
                        src.bucket(),
                        &src.object_key(name),
                        dest.bucket(),
                        &dest.object_key(name),
                    )
                    .await
            }
            None => {
                env.store_manager()
                    .put_object(&local_dbname.join(name), dest.bucket(), &dest.object_key(name))
                    .await
            }
        };
        if let Err(err) = outcome {
            cirrus_log!(
                log::Level::Info,
                "savepoint",
                "error copying {name} into {}: {err}",
                dest.bucket()
            );
            let mut slot = first_error.lock();
            if slot.is_none() {
                *slot = Some(err);
            }
            break;
        }
    }
}
