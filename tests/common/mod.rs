#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use object_store::memory::InMemory;

use cirrusdb::{
    filename, BucketAddress, CloudDbOption, CloudEnv, CloudEnvOptions, ColumnFamilyDescriptor,
    LiveFileMetadata, LsmEngine, Result, StoreManager,
};

pub const SRC_BUCKET: &str = "bucket-src";
pub const DEST_BUCKET: &str = "bucket-dest";

/// Build an environment over in-memory buckets, with src/dest given as
/// `(bucket, object_prefix)` pairs.
pub fn new_env(
    src: Option<(&str, &str)>,
    dest: Option<(&str, &str)>,
) -> Arc<CloudEnv> {
    let mut stores = StoreManager::new();
    stores.register_bucket(SRC_BUCKET, Arc::new(InMemory::new()));
    stores.register_bucket(DEST_BUCKET, Arc::new(InMemory::new()));
    let mut options = CloudEnvOptions::new().keep_local_sst_files(true);
    if let Some((bucket, prefix)) = src {
        options = options.src_bucket(BucketAddress::new(bucket, prefix));
    }
    if let Some((bucket, prefix)) = dest {
        options = options.dest_bucket(BucketAddress::new(bucket, prefix));
    }
    Arc::new(CloudEnv::new(options, stores))
}

/// Minimal engine standing in for the LSM below the cloud layer.
///
/// It adopts or creates an IDENTITY, checks that the active manifest is
/// reachable through the filename indirection, reports local table files as
/// its live set, and uploads its manifest on flush.
pub struct MockEngine {
    env: Arc<CloudEnv>,
    local_dbname: PathBuf,
    dbid: String,
}

impl LsmEngine for MockEngine {
    async fn open(
        env: Arc<CloudEnv>,
        _options: &CloudDbOption,
        local_dbname: &Path,
        _column_families: &[ColumnFamilyDescriptor],
        _read_only: bool,
    ) -> Result<Self> {
        let identity = local_dbname.join(filename::IDENTITY_FILE);
        let dbid = match tokio::fs::read_to_string(&identity).await {
            Ok(contents) => contents.trim().to_string(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let fresh = env.generate_unique_id();
                tokio::fs::create_dir_all(local_dbname).await?;
                tokio::fs::write(&identity, format!("{fresh}\n")).await?;
                fresh
            }
            Err(err) => return Err(err.into()),
        };

        if let Ok(current) =
            tokio::fs::read_to_string(local_dbname.join(filename::CURRENT_FILE)).await
        {
            let remapped = env.remap_filename(current.trim());
            match env.ensure_local_file(local_dbname, &remapped).await {
                Ok(_) => {}
                // A brand-new database has no manifest anywhere yet.
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }

        Ok(Self {
            env,
            local_dbname: local_dbname.to_path_buf(),
            dbid,
        })
    }

    fn live_files_metadata(&self) -> Vec<LiveFileMetadata> {
        let mut files = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.local_dbname) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                let nominal = filename::strip_epoch_suffix(&name).to_string();
                if filename::table_file_number(&nominal).is_some() {
                    let size = entry.metadata().map(|meta| meta.len()).unwrap_or(0);
                    files.push(LiveFileMetadata {
                        name: nominal,
                        size,
                        level: 0,
                    });
                }
            }
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        files.dedup_by(|a, b| a.name == b.name);
        files
    }

    fn db_identity(&self) -> Result<String> {
        Ok(self.dbid.clone())
    }

    async fn flush(&self) -> Result<()> {
        let Some(dest) = self.env.dest_bucket() else {
            return Ok(());
        };
        let manifest_name = self.env.remap_filename(filename::DUMMY_MANIFEST_FILE);
        match tokio::fs::read(self.local_dbname.join(&manifest_name)).await {
            Ok(bytes) => {
                self.env
                    .store_manager()
                    .put_object_bytes(dest.bucket(), &dest.object_key(&manifest_name), bytes)
                    .await
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
