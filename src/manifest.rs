//! The durable mapping between engine file numbers and cloud epochs.
//!
//! The engine assumes monotonic, fixed-schema filenames while the object
//! store needs immutable, content-addressed objects. The cloud manifest is
//! the sole mediator: an ordered list of cut-overs assigning a past epoch to
//! every file number below a bound, plus the current epoch for everything
//! newer.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    fs,
};

/// A cut-over entry: file numbers strictly below `file_number` are stored
/// under `epoch`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochSpan {
    /// Exclusive upper bound on the file numbers covered by this span.
    pub file_number: u64,
    /// Epoch the covered files are stored under.
    pub epoch: String,
}

/// Ordered record of epoch cut-overs plus the epoch applied to everything
/// newer, serializable as the `CLOUDMANIFEST` blob.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CloudManifest {
    past_epochs: Vec<EpochSpan>,
    current_epoch: String,
    #[serde(skip)]
    finalized: bool,
}

impl PartialEq for CloudManifest {
    fn eq(&self, other: &Self) -> bool {
        // The finalize latch is runtime state, not part of the durable record.
        self.past_epochs == other.past_epochs && self.current_epoch == other.current_epoch
    }
}

impl Eq for CloudManifest {}

impl CloudManifest {
    /// Manifest with no cut-over entries and the given current epoch; the
    /// empty string denotes a legacy, pre-cloud-manifest database.
    pub fn for_empty_database(current_epoch: impl Into<String>) -> Self {
        Self {
            past_epochs: Vec::new(),
            current_epoch: current_epoch.into(),
            finalized: false,
        }
    }

    /// The epoch applied to all file numbers at or above the largest bound.
    pub fn current_epoch(&self) -> &str {
        &self.current_epoch
    }

    /// The recorded cut-over entries, ordered by increasing bound.
    pub fn past_epochs(&self) -> &[EpochSpan] {
        &self.past_epochs
    }

    /// Whether the manifest has been frozen for the lifetime of the open
    /// instance.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Freeze the manifest; all further mutation is rejected.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    /// Record a cut-over at `file_number` and make `epoch` current.
    ///
    /// File numbers below the bound remain attributed to the previous current
    /// epoch. A bound equal to the previous one would cover no file numbers,
    /// so no entry is appended in that case; a smaller bound is rejected.
    pub fn add_epoch(&mut self, file_number: u64, epoch: impl Into<String>) -> Result<()> {
        if self.finalized {
            return Err(Error::InvalidArgument(
                "cloud manifest is finalized".to_string(),
            ));
        }
        let last_bound = self.past_epochs.last().map(|span| span.file_number);
        if let Some(bound) = last_bound {
            if file_number < bound {
                return Err(Error::InvalidArgument(format!(
                    "epoch cut-over {file_number} precedes recorded bound {bound}"
                )));
            }
        }
        let covers_files = match last_bound {
            Some(bound) => file_number > bound,
            None => file_number > 0,
        };
        if covers_files {
            self.past_epochs.push(EpochSpan {
                file_number,
                epoch: self.current_epoch.clone(),
            });
        }
        self.current_epoch = epoch.into();
        Ok(())
    }

    /// The epoch governing `file_number`: the epoch of the least bound
    /// strictly greater than the number, or the current epoch if none.
    pub fn epoch_for_file_number(&self, file_number: u64) -> &str {
        let idx = self
            .past_epochs
            .partition_point(|span| span.file_number <= file_number);
        self.past_epochs
            .get(idx)
            .map(|span| span.epoch.as_str())
            .unwrap_or(&self.current_epoch)
    }

    /// All epochs the manifest references, past and current.
    pub fn known_epochs(&self) -> impl Iterator<Item = &str> {
        self.past_epochs
            .iter()
            .map(|span| span.epoch.as_str())
            .chain(std::iter::once(self.current_epoch.as_str()))
    }

    /// Self-describing serialization of the manifest.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decode a manifest previously produced by [`CloudManifest::encode`].
    ///
    /// The decoded manifest is mutable again; finalization does not survive
    /// serialization.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Serialize `manifest` to `path` through a temporary file and rename.
pub(crate) async fn write_cloud_manifest(manifest: &CloudManifest, path: &Path) -> Result<()> {
    fs::write_atomic(path, &manifest.encode()?).await
}

/// Load a manifest from its local serialization.
pub(crate) async fn read_cloud_manifest(path: &Path) -> Result<CloudManifest> {
    let bytes = tokio::fs::read(path).await?;
    CloudManifest::decode(&bytes)
}
