//! Epoch rolling: deciding at open time whether this instance must mint a
//! new epoch, and publishing the result so concurrent readers stay
//! consistent.

use std::path::Path;

use crate::{
    engine_manifest,
    env::CloudEnv,
    error::{Error, Result},
    filename, fs,
    id::epoch_from_unique_id,
    logging::cirrus_log,
    manifest,
};

/// Roll the cloud manifest onto a fresh epoch unless the local directory
/// already holds the manifest the current epoch points at.
///
/// Publish order matters: the epoch-stamped manifest object is uploaded
/// before the cloud manifest that references it, so a reader observing the
/// new cloud manifest always finds the manifest object.
pub(crate) async fn maybe_roll_new_epoch(env: &CloudEnv, local_dbname: &Path) -> Result<()> {
    let old_epoch = env
        .current_epoch()
        .ok_or_else(|| Error::InvalidArgument("cloud manifest not loaded".to_string()))?;
    let old_manifest = filename::manifest_file_with_epoch(&old_epoch);

    if fs::exists(&local_dbname.join(&old_manifest)).await? && !old_epoch.is_empty() {
        // The cloud manifest points at the manifest we already hold; nobody
        // wrote to the bucket since our last runtime. A legacy empty epoch
        // still rolls so the database gains its first real epoch.
        env.finalize_cloud_manifest();
        cirrus_log!(
            log::Level::Info,
            "epoch_roll",
            "local {old_manifest} matches epoch '{old_epoch}', no roll needed"
        );
        return Ok(());
    }

    // The dummy name remaps to the current epoch's manifest; pull it from
    // the cloud when it is not local so the cut-over lands at the right
    // file number. Absence everywhere means a brand-new database.
    let dummy = env.remap_filename(filename::DUMMY_MANIFEST_FILE);
    let max_file_number = match env.ensure_local_file(local_dbname, &dummy).await {
        Ok(path) => engine_manifest::max_file_number(&path).await?,
        Err(err) if err.is_not_found() => 0,
        Err(err) => return Err(err),
    };

    let new_epoch = epoch_from_unique_id(&env.generate_unique_id());
    env.add_epoch(max_file_number, &new_epoch)?;
    env.finalize_cloud_manifest();
    let new_manifest = filename::manifest_file_with_epoch(&new_epoch);

    if max_file_number > 0 {
        tokio::fs::rename(
            local_dbname.join(&old_manifest),
            local_dbname.join(&new_manifest),
        )
        .await?;
    }

    if let Some(dest) = env.dest_bucket() {
        if max_file_number > 0 {
            env.store_manager()
                .put_object(
                    &local_dbname.join(&new_manifest),
                    dest.bucket(),
                    &dest.object_key(&new_manifest),
                )
                .await?;
        }
        let snapshot = env
            .cloud_manifest()
            .ok_or_else(|| Error::InvalidArgument("cloud manifest not loaded".to_string()))?;
        let local_cloud_manifest = local_dbname.join(filename::CLOUD_MANIFEST_FILE);
        manifest::write_cloud_manifest(&snapshot, &local_cloud_manifest).await?;
        env.store_manager()
            .put_object(
                &local_cloud_manifest,
                dest.bucket(),
                &dest.object_key(filename::CLOUD_MANIFEST_FILE),
            )
            .await?;
    }

    cirrus_log!(
        log::Level::Info,
        "epoch_roll",
        "rolled epoch '{old_epoch}' -> '{new_epoch}' at file number {max_file_number}"
    );
    Ok(())
}
