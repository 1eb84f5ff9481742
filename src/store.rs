//! Bucket registry and object operations for the cloud tier.

use std::{collections::HashMap, path::Path as LocalPath, sync::Arc};

use bytes::Bytes;
use futures::StreamExt;
use object_store::{path::Path as ObjectPath, ObjectStore, PutPayload};

use crate::{
    error::{Error, Result},
    filename, fs,
};

/// Bucket-global registry prefix mapping a dbid to its object path.
const DBID_REGISTRY_PREFIX: &str = ".dbid";

/// Location of a logical database in the object store: a bucket plus an
/// object prefix under which its files are mirrored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketAddress {
    bucket: String,
    object_prefix: String,
}

impl BucketAddress {
    /// Address a database at `object_prefix` inside `bucket`.
    pub fn new(bucket: impl Into<String>, object_prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object_prefix: object_prefix.into(),
        }
    }

    /// The bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The configured object prefix, as given.
    pub fn object_prefix(&self) -> &str {
        &self.object_prefix
    }

    /// The object prefix with trailing slashes removed, the form used for
    /// registry comparisons.
    pub fn trimmed_prefix(&self) -> &str {
        filename::trim_object_prefix(&self.object_prefix)
    }

    /// Full object key for a file named `name` under this address.
    pub fn object_key(&self, name: &str) -> String {
        filename::object_key(&self.object_prefix, name)
    }
}

/// Registry of object stores, one per bucket.
///
/// Buckets are registered up front; every cloud operation then names its
/// bucket and key. Tests register in-memory stores, production registers the
/// AWS backend.
#[derive(Default)]
pub struct StoreManager {
    stores: HashMap<String, Arc<dyn ObjectStore>>,
}

impl StoreManager {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `store` to serve all operations against `bucket`.
    pub fn register_bucket(&mut self, bucket: impl Into<String>, store: Arc<dyn ObjectStore>) {
        self.stores.insert(bucket.into(), store);
    }

    /// Register an AWS S3 bucket, with credentials taken from the ambient
    /// environment.
    pub fn register_s3_bucket(&mut self, bucket: &str, region: &str) -> Result<()> {
        let store = object_store::aws::AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_region(region)
            .build()
            .map_err(Error::from)?;
        self.register_bucket(bucket, Arc::new(store));
        Ok(())
    }

    fn store(&self, bucket: &str) -> Result<&Arc<dyn ObjectStore>> {
        self.stores.get(bucket).ok_or_else(|| {
            Error::InvalidArgument(format!("bucket {bucket} is not registered"))
        })
    }

    /// Probe for an object, distinguishing absence from failure.
    pub async fn exists_object(&self, bucket: &str, key: &str) -> Result<bool> {
        match self.store(bucket)?.head(&ObjectPath::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Fetch an object's contents.
    pub async fn get_object_bytes(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let result = self.store(bucket)?.get(&ObjectPath::from(key)).await?;
        Ok(result.bytes().await?)
    }

    /// Download an object to a local file, written atomically.
    pub async fn get_object(&self, bucket: &str, key: &str, local_dst: &LocalPath) -> Result<()> {
        let bytes = self.get_object_bytes(bucket, key).await?;
        fs::write_atomic(local_dst, &bytes).await
    }

    /// Upload raw bytes as an object.
    pub async fn put_object_bytes(
        &self,
        bucket: &str,
        key: &str,
        bytes: impl Into<PutPayload>,
    ) -> Result<()> {
        self.store(bucket)?
            .put(&ObjectPath::from(key), bytes.into())
            .await?;
        Ok(())
    }

    /// Upload a local file as an object.
    pub async fn put_object(&self, local_src: &LocalPath, bucket: &str, key: &str) -> Result<()> {
        let bytes = tokio::fs::read(local_src).await?;
        self.put_object_bytes(bucket, key, bytes).await
    }

    /// Copy an object between locations, server-side within a bucket and by
    /// transfer across buckets.
    pub async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()> {
        if src_bucket == dst_bucket {
            self.store(src_bucket)?
                .copy(&ObjectPath::from(src_key), &ObjectPath::from(dst_key))
                .await?;
            return Ok(());
        }
        let bytes = self.get_object_bytes(src_bucket, src_key).await?;
        self.put_object_bytes(dst_bucket, dst_key, bytes).await
    }

    /// Delete an object.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.store(bucket)?
            .delete(&ObjectPath::from(key))
            .await?;
        Ok(())
    }

    /// Names of all objects directly under `prefix`, relative to it.
    pub async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let store = self.store(bucket)?;
        let trimmed = prefix.trim_matches('/');
        let object_prefix = (!trimmed.is_empty()).then(|| ObjectPath::from(trimmed));
        let mut stream = store.list(object_prefix.as_ref());
        let mut names = Vec::new();
        while let Some(meta) = stream.next().await {
            let meta = meta?;
            if let Some(name) = meta.location.filename() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    /// Resolve the object path registered for `dbid` in `bucket`.
    pub async fn get_path_for_dbid(&self, bucket: &str, dbid: &str) -> Result<String> {
        let key = format!("{DBID_REGISTRY_PREFIX}/{dbid}");
        let bytes = self.get_object_bytes(bucket, &key).await?;
        Ok(String::from_utf8_lossy(&bytes).trim().to_string())
    }

    /// Record `object_path` as the registered location of `dbid` in `bucket`.
    pub async fn register_dbid(&self, bucket: &str, dbid: &str, object_path: &str) -> Result<()> {
        let key = format!("{DBID_REGISTRY_PREFIX}/{dbid}");
        self.put_object_bytes(bucket, &key, object_path.as_bytes().to_vec())
            .await
    }
}

#[cfg(test)]
mod tests {
    use object_store::memory::InMemory;
    use tempfile::TempDir;

    use super::*;

    fn two_bucket_manager() -> StoreManager {
        let mut manager = StoreManager::new();
        manager.register_bucket("bucket-a", Arc::new(InMemory::new()));
        manager.register_bucket("bucket-b", Arc::new(InMemory::new()));
        manager
    }

    #[tokio::test]
    async fn put_get_and_exists_round_trip() {
        let manager = two_bucket_manager();
        let dir = TempDir::new().expect("temp dir");
        let src = dir.path().join("IDENTITY");
        tokio::fs::write(&src, b"db-one\n").await.expect("write");

        manager
            .put_object(&src, "bucket-a", "db/IDENTITY")
            .await
            .expect("put");
        assert!(manager
            .exists_object("bucket-a", "db/IDENTITY")
            .await
            .expect("probe"));
        assert!(!manager
            .exists_object("bucket-a", "db/CURRENT")
            .await
            .expect("probe"));

        let dst = dir.path().join("IDENTITY.copy");
        manager
            .get_object("bucket-a", "db/IDENTITY", &dst)
            .await
            .expect("get");
        assert_eq!(
            tokio::fs::read(&dst).await.expect("read"),
            b"db-one\n".to_vec()
        );
    }

    #[tokio::test]
    async fn copy_works_within_and_across_buckets() {
        let manager = two_bucket_manager();
        manager
            .put_object_bytes("bucket-a", "db/000001.sst", b"table".to_vec())
            .await
            .expect("seed");

        manager
            .copy_object("bucket-a", "db/000001.sst", "bucket-a", "other/000001.sst")
            .await
            .expect("same-bucket copy");
        manager
            .copy_object("bucket-a", "db/000001.sst", "bucket-b", "db/000001.sst")
            .await
            .expect("cross-bucket copy");
        assert!(manager
            .exists_object("bucket-b", "db/000001.sst")
            .await
            .expect("probe"));
    }

    #[tokio::test]
    async fn missing_source_copy_is_not_found() {
        let manager = two_bucket_manager();
        let err = manager
            .copy_object("bucket-a", "db/missing.sst", "bucket-b", "db/missing.sst")
            .await
            .expect_err("copy of a missing object should fail");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn dbid_registry_round_trips() {
        let manager = two_bucket_manager();
        manager
            .register_dbid("bucket-a", "db-one", "clones/db-one")
            .await
            .expect("register");
        let path = manager
            .get_path_for_dbid("bucket-a", "db-one")
            .await
            .expect("lookup");
        assert_eq!(path, "clones/db-one");

        let err = manager
            .get_path_for_dbid("bucket-a", "db-two")
            .await
            .expect_err("unknown dbid should be not-found");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn unregistered_bucket_is_invalid_argument() {
        let manager = two_bucket_manager();
        let err = manager
            .exists_object("bucket-c", "db/IDENTITY")
            .await
            .expect_err("unregistered bucket should be rejected");
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
