//! The cloud environment: bucket coordinates, filename indirection, and the
//! read-through that lets the engine see cloud-resident files as local ones.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::RwLock;

use crate::{
    error::{Error, Result},
    filename, fs,
    id::UniqueIdGenerator,
    logging::cirrus_log,
    manifest::{self, CloudManifest},
    store::{BucketAddress, StoreManager},
};

/// The cloud backend serving a database.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloudType {
    /// No cloud tier; the database is purely local.
    None,
    /// AWS S3, the supported backend.
    Aws,
    /// Google Cloud Storage; recognized but not supported.
    Gcp,
}

/// Configuration for a [`CloudEnv`].
#[derive(Clone, Debug)]
pub struct CloudEnvOptions {
    pub(crate) cloud_type: CloudType,
    pub(crate) src: Option<BucketAddress>,
    pub(crate) dest: Option<BucketAddress>,
    pub(crate) keep_local_sst_files: bool,
    pub(crate) validate_filesize: bool,
}

impl Default for CloudEnvOptions {
    fn default() -> Self {
        Self {
            cloud_type: CloudType::Aws,
            src: None,
            dest: None,
            keep_local_sst_files: false,
            validate_filesize: true,
        }
    }
}

impl CloudEnvOptions {
    /// Default options: AWS backend, no buckets configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the cloud backend.
    pub fn cloud_type(mut self, cloud_type: CloudType) -> Self {
        self.cloud_type = cloud_type;
        self
    }

    /// Bucket the database is read from.
    pub fn src_bucket(mut self, src: BucketAddress) -> Self {
        self.src = Some(src);
        self
    }

    /// Bucket the database is written to.
    pub fn dest_bucket(mut self, dest: BucketAddress) -> Self {
        self.dest = Some(dest);
        self
    }

    /// Retain table files locally after they are uploaded.
    pub fn keep_local_sst_files(mut self, keep: bool) -> Self {
        self.keep_local_sst_files = keep;
        self
    }

    /// Verify file sizes against the manifest while opening.
    pub fn validate_filesize(mut self, validate: bool) -> Self {
        self.validate_filesize = validate;
        self
    }
}

/// Runtime cloud environment shared by the open pipeline and the engine.
///
/// Owns the loaded cloud manifest for the lifetime of the open database and
/// routes every filename the engine uses through the epoch indirection.
pub struct CloudEnv {
    store_manager: StoreManager,
    cloud_type: CloudType,
    src: Option<BucketAddress>,
    dest: Option<BucketAddress>,
    keep_local_sst_files: bool,
    validate_filesize: AtomicBool,
    id_gen: UniqueIdGenerator,
    cloud_manifest: RwLock<Option<CloudManifest>>,
}

impl CloudEnv {
    /// Separator between a base dbid and the unique suffix of a clone.
    pub const DBID_SEPARATOR: &'static str = "::";

    /// Build an environment from options and a bucket registry.
    pub fn new(options: CloudEnvOptions, store_manager: StoreManager) -> Self {
        Self {
            store_manager,
            cloud_type: options.cloud_type,
            src: options.src,
            dest: options.dest,
            keep_local_sst_files: options.keep_local_sst_files,
            validate_filesize: AtomicBool::new(options.validate_filesize),
            id_gen: UniqueIdGenerator::new(),
            cloud_manifest: RwLock::new(None),
        }
    }

    /// The configured cloud backend.
    pub fn cloud_type(&self) -> CloudType {
        self.cloud_type
    }

    /// The bucket the database is read from, if any.
    pub fn src_bucket(&self) -> Option<&BucketAddress> {
        self.src.as_ref()
    }

    /// The bucket the database is written to, if any.
    pub fn dest_bucket(&self) -> Option<&BucketAddress> {
        self.dest.as_ref()
    }

    /// Whether uploaded table files are kept on local disk.
    pub fn keep_local_sst_files(&self) -> bool {
        self.keep_local_sst_files
    }

    /// Whether per-file size validation is still enabled.
    pub fn validate_filesize(&self) -> bool {
        self.validate_filesize.load(Ordering::Relaxed)
    }

    /// One-shot relaxation of size validation once an open has verified all
    /// files. Racing readers may observe the old value; they only ever see a
    /// late `true`, which is harmless.
    pub fn disable_filesize_validation(&self) {
        self.validate_filesize.store(false, Ordering::Relaxed);
    }

    /// The bucket registry backing this environment.
    pub fn store_manager(&self) -> &StoreManager {
        &self.store_manager
    }

    /// Fresh printable unique id.
    pub fn generate_unique_id(&self) -> String {
        self.id_gen.generate()
    }

    /// True when src and dest address the same database location.
    pub fn dest_equals_src(&self) -> bool {
        match (&self.src, &self.dest) {
            (Some(src), Some(dest)) => {
                src.bucket() == dest.bucket() && src.trimmed_prefix() == dest.trimmed_prefix()
            }
            (None, None) => true,
            _ => false,
        }
    }

    /// Load the local `CLOUDMANIFEST` serialization into this environment,
    /// enabling filename remapping and cloud reads.
    pub async fn load_local_cloud_manifest(&self, local_dbname: &Path) -> Result<()> {
        let path = local_dbname.join(filename::CLOUD_MANIFEST_FILE);
        let loaded = manifest::read_cloud_manifest(&path).await?;
        cirrus_log!(
            log::Level::Info,
            "cloud_manifest",
            "loaded cloud manifest from {} with current epoch '{}'",
            path.display(),
            loaded.current_epoch(),
        );
        *self.cloud_manifest.write() = Some(loaded);
        Ok(())
    }

    /// Snapshot of the loaded cloud manifest, if any.
    pub fn cloud_manifest(&self) -> Option<CloudManifest> {
        self.cloud_manifest.read().clone()
    }

    /// The loaded manifest's current epoch, if a manifest is loaded.
    pub fn current_epoch(&self) -> Option<String> {
        self.cloud_manifest
            .read()
            .as_ref()
            .map(|manifest| manifest.current_epoch().to_string())
    }

    pub(crate) fn add_epoch(&self, file_number: u64, epoch: &str) -> Result<()> {
        let mut guard = self.cloud_manifest.write();
        let manifest = guard
            .as_mut()
            .ok_or_else(|| Error::InvalidArgument("cloud manifest not loaded".to_string()))?;
        manifest.add_epoch(file_number, epoch)
    }

    pub(crate) fn finalize_cloud_manifest(&self) {
        if let Some(manifest) = self.cloud_manifest.write().as_mut() {
            manifest.finalize();
        }
    }

    /// Translate an engine filename into its epoch-stamped physical name.
    ///
    /// Manifest files resolve to the current epoch; table files resolve
    /// through the cut-over table by file number. Before a cloud manifest is
    /// loaded, or without a cloud tier, names pass through unchanged.
    pub fn remap_filename(&self, name: &str) -> String {
        if self.cloud_type == CloudType::None {
            return name.to_string();
        }
        let guard = self.cloud_manifest.read();
        let Some(manifest) = guard.as_ref() else {
            return name.to_string();
        };
        if filename::numbered_manifest(name).is_some() || name == "MANIFEST" {
            return filename::manifest_file_with_epoch(manifest.current_epoch());
        }
        if filename::epoch_suffix(name).is_none() {
            if let Some(number) = filename::table_file_number(name) {
                let epoch = manifest.epoch_for_file_number(number);
                if !epoch.is_empty() {
                    return format!("{name}-{epoch}");
                }
            }
        }
        name.to_string()
    }

    /// Materialize `name` in the local directory, fetching it from dest then
    /// src when it is not already present.
    pub async fn ensure_local_file(&self, local_dbname: &Path, name: &str) -> Result<PathBuf> {
        let path = local_dbname.join(name);
        if fs::exists(&path).await? {
            return Ok(path);
        }
        if let Some(dest) = &self.dest {
            match self
                .store_manager
                .get_object(dest.bucket(), &dest.object_key(name), &path)
                .await
            {
                Ok(()) => return Ok(path),
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        if let Some(src) = &self.src {
            if !self.dest_equals_src() {
                match self
                    .store_manager
                    .get_object(src.bucket(), &src.object_key(name), &path)
                    .await
                {
                    Ok(()) => return Ok(path),
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Err(err),
                }
            }
        }
        Err(Error::NotFound(format!(
            "{name} is not present locally or in the cloud"
        )))
    }

    /// Delete local files and dest objects stamped with an epoch the loaded
    /// cloud manifest no longer references.
    pub async fn delete_invisible_files(&self, local_dbname: &Path) -> Result<()> {
        let Some(manifest) = self.cloud_manifest() else {
            return Ok(());
        };
        let visible: HashSet<String> = manifest
            .known_epochs()
            .map(|epoch| epoch.to_string())
            .collect();

        for name in fs::list_dir(local_dbname).await? {
            if let Some(epoch) = filename::epoch_suffix(&name) {
                if !visible.contains(epoch) {
                    cirrus_log!(
                        log::Level::Info,
                        "cleanup",
                        "deleting invisible local file {name}"
                    );
                    tokio::fs::remove_file(local_dbname.join(&name)).await?;
                }
            }
        }

        if let Some(dest) = &self.dest {
            let names = self
                .store_manager
                .list_objects(dest.bucket(), dest.object_prefix())
                .await?;
            for name in names {
                if let Some(epoch) = filename::epoch_suffix(&name) {
                    if !visible.contains(epoch) {
                        cirrus_log!(
                            log::Level::Info,
                            "cleanup",
                            "deleting invisible object {name} from {}",
                            dest.bucket(),
                        );
                        self.store_manager
                            .delete_object(dest.bucket(), &dest.object_key(&name))
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use object_store::memory::InMemory;
    use tempfile::TempDir;

    use super::*;

    fn env_with_manifest(manifest: CloudManifest) -> CloudEnv {
        let mut stores = StoreManager::new();
        stores.register_bucket("bucket-a", Arc::new(InMemory::new()));
        let env = CloudEnv::new(
            CloudEnvOptions::new().dest_bucket(BucketAddress::new("bucket-a", "db")),
            stores,
        );
        *env.cloud_manifest.write() = Some(manifest);
        env
    }

    #[test]
    fn manifest_requests_resolve_to_the_current_epoch() {
        let mut manifest = CloudManifest::for_empty_database("");
        manifest
            .add_epoch(10, "aaaaaaaaaaaaaaaa")
            .expect("roll epoch");
        let env = env_with_manifest(manifest);
        assert_eq!(
            env.remap_filename("MANIFEST-000001"),
            "MANIFEST-aaaaaaaaaaaaaaaa"
        );
        assert_eq!(env.remap_filename("MANIFEST"), "MANIFEST-aaaaaaaaaaaaaaaa");
    }

    #[test]
    fn table_requests_resolve_through_the_cut_over_table() {
        let mut manifest = CloudManifest::for_empty_database("");
        manifest
            .add_epoch(10, "aaaaaaaaaaaaaaaa")
            .expect("roll epoch");
        let env = env_with_manifest(manifest);
        // Legacy files keep their unstamped names.
        assert_eq!(env.remap_filename("000004.sst"), "000004.sst");
        assert_eq!(
            env.remap_filename("000012.sst"),
            "000012.sst-aaaaaaaaaaaaaaaa"
        );
        // An already-stamped name passes through.
        assert_eq!(
            env.remap_filename("000012.sst-aaaaaaaaaaaaaaaa"),
            "000012.sst-aaaaaaaaaaaaaaaa"
        );
    }

    #[test]
    fn bookkeeping_files_pass_through() {
        let env = env_with_manifest(CloudManifest::for_empty_database("aaaaaaaaaaaaaaaa"));
        assert_eq!(env.remap_filename("CURRENT"), "CURRENT");
        assert_eq!(env.remap_filename("IDENTITY"), "IDENTITY");
        assert_eq!(env.remap_filename("LOG"), "LOG");
    }

    #[test]
    fn without_a_loaded_manifest_names_are_unchanged() {
        let mut stores = StoreManager::new();
        stores.register_bucket("bucket-a", Arc::new(InMemory::new()));
        let env = CloudEnv::new(CloudEnvOptions::new(), stores);
        assert_eq!(env.remap_filename("MANIFEST-000001"), "MANIFEST-000001");
    }

    #[tokio::test]
    async fn invisible_sweep_spares_referenced_epochs() {
        let mut manifest = CloudManifest::for_empty_database("");
        manifest
            .add_epoch(10, "aaaaaaaaaaaaaaaa")
            .expect("roll epoch");
        let env = env_with_manifest(manifest);
        let dir = TempDir::new().expect("temp dir");

        for name in [
            "MANIFEST-aaaaaaaaaaaaaaaa",
            "MANIFEST-0123456789abcdef",
            "000007.sst-0123456789abcdef",
            "CURRENT",
            "LOG",
        ] {
            tokio::fs::write(dir.path().join(name), b"x")
                .await
                .expect("seed");
        }
        env.store_manager()
            .put_object_bytes("bucket-a", "db/MANIFEST-0123456789abcdef", b"x".to_vec())
            .await
            .expect("seed object");

        env.delete_invisible_files(dir.path()).await.expect("sweep");

        assert!(fs::exists(dir.path().join("MANIFEST-aaaaaaaaaaaaaaaa"))
            .await
            .expect("probe"));
        assert!(fs::exists(dir.path().join("CURRENT")).await.expect("probe"));
        assert!(!fs::exists(dir.path().join("MANIFEST-0123456789abcdef"))
            .await
            .expect("probe"));
        assert!(!fs::exists(dir.path().join("000007.sst-0123456789abcdef"))
            .await
            .expect("probe"));
        assert!(!env
            .store_manager()
            .exists_object("bucket-a", "db/MANIFEST-0123456789abcdef")
            .await
            .expect("probe"));
    }
}
