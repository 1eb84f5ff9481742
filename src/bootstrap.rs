//! Bootstrap of the local directory: deciding whether it is a usable cache
//! for the configured bucket pair, wiping and re-seeding it when it is not,
//! and fetching or creating the cloud manifest.

use std::path::Path;

use crate::{
    env::{CloudEnv, CloudType},
    error::{Error, Result},
    filename, fs,
    logging::cirrus_log,
    manifest::{self, CloudManifest},
    options::CloudDbOption,
};

/// Decide whether the local directory must be wiped and re-seeded.
///
/// The directory is kept only when it carries a readable identity that the
/// configured buckets recognize. A dest registry entry pointing at a
/// different object prefix means the directory belongs to another clone and
/// fails the open outright.
pub(crate) async fn needs_reinitialization(env: &CloudEnv, local_dbname: &Path) -> Result<bool> {
    cirrus_log!(
        log::Level::Info,
        "needs_reinit",
        "checking local dir {} src {:?} dest {:?}",
        local_dbname.display(),
        env.src_bucket().map(|b| b.bucket()),
        env.dest_bucket().map(|b| b.bucket()),
    );

    // Without buckets there is nothing to reinitialize from.
    if env.src_bucket().is_none() && env.dest_bucket().is_none() {
        return Ok(false);
    }

    if !fs::exists(local_dbname).await? {
        return Ok(true);
    }
    if !fs::exists(local_dbname.join(filename::CURRENT_FILE)).await? {
        cirrus_log!(
            log::Level::Info,
            "needs_reinit",
            "no CURRENT file in {}",
            local_dbname.display()
        );
        return Ok(true);
    }

    let local_dbid = match fs::read_trimmed(&local_dbname.join(filename::IDENTITY_FILE)).await {
        Ok(dbid) => dbid,
        Err(err) if err.is_not_found() => return Ok(true),
        Err(err) => return Err(err),
    };
    if local_dbid.is_empty() {
        return Ok(true);
    }

    let mut src_registered_path = None;
    if let Some(src) = env.src_bucket() {
        match env
            .store_manager()
            .get_path_for_dbid(src.bucket(), &local_dbid)
            .await
        {
            Ok(path) => {
                cirrus_log!(
                    log::Level::Info,
                    "needs_reinit",
                    "local dbid {local_dbid} maps to '{path}' in src bucket {}",
                    src.bucket(),
                );
                src_registered_path = Some(path);
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                cirrus_log!(
                    log::Level::Error,
                    "needs_reinit",
                    "unable to look up dbid {local_dbid} in src bucket: {err}"
                );
                return Err(err);
            }
        }
    }

    let mut dest_registered_path = None;
    if let Some(dest) = env.dest_bucket() {
        match env
            .store_manager()
            .get_path_for_dbid(dest.bucket(), &local_dbid)
            .await
        {
            Ok(path) => {
                let registered = filename::trim_object_prefix(&path);
                if registered != dest.trimmed_prefix() {
                    cirrus_log!(
                        log::Level::Error,
                        "needs_reinit",
                        "local dbid {local_dbid} is registered at '{registered}' \
                         but the configured dest path is '{}'",
                        dest.trimmed_prefix(),
                    );
                    return Err(Error::InvalidArgument(format!(
                        "local dbid {local_dbid} belongs to dest path {registered}, \
                         not the configured {}",
                        dest.trimmed_prefix()
                    )));
                }
                dest_registered_path = Some(path);
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                cirrus_log!(
                    log::Level::Error,
                    "needs_reinit",
                    "unable to look up dbid {local_dbid} in dest bucket: {err}"
                );
                return Err(err);
            }
        }
    }

    // A local dbid no bucket recognizes is stale.
    if src_registered_path.is_none() && dest_registered_path.is_none() {
        cirrus_log!(
            log::Level::Info,
            "needs_reinit",
            "local dbid {local_dbid} has no mapping in src or dest"
        );
        return Ok(true);
    }

    Ok(false)
}

/// Prepare the local directory for the configured buckets, wiping and
/// re-seeding it when [`needs_reinitialization`] says so.
pub(crate) async fn sanitize_directory(
    env: &CloudEnv,
    options: &CloudDbOption,
    local_dbname: &Path,
    read_only: bool,
) -> Result<()> {
    match env.cloud_type() {
        CloudType::None => return Ok(()),
        CloudType::Aws => {}
        other => {
            return Err(Error::NotSupported(format!(
                "cloud type {other:?} is not supported; only AWS is"
            )))
        }
    }

    let do_reinit = needs_reinitialization(env, local_dbname).await?;

    // Without a destination every table file must live locally; enforce the
    // options that guarantee it before touching anything.
    if env.dest_bucket().is_none() {
        if options.max_open_files != -1 {
            return Err(Error::InvalidArgument(
                "no destination bucket; set max_open_files = -1 so all table \
                 files are opened at startup"
                    .to_string(),
            ));
        }
        if !env.keep_local_sst_files() {
            return Err(Error::InvalidArgument(
                "no destination bucket; enable keep_local_sst_files so table \
                 files are retained locally"
                    .to_string(),
            ));
        }
    }

    if !do_reinit {
        cirrus_log!(
            log::Level::Info,
            "sanitize",
            "local directory {} is usable",
            local_dbname.display()
        );
        return Ok(());
    }
    cirrus_log!(
        log::Level::Info,
        "sanitize",
        "local directory {} needs cleanup",
        local_dbname.display()
    );

    match fs::list_dir(local_dbname).await {
        Ok(children) => {
            for name in children {
                if filename::is_log_file(&name) {
                    continue;
                }
                let path = local_dbname.join(&name);
                tokio::fs::remove_file(&path).await?;
                cirrus_log!(
                    log::Level::Info,
                    "sanitize",
                    "cleaned up {}",
                    path.display()
                );
            }
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            if read_only {
                return Err(err.into());
            }
            fs::create_dir_if_missing(local_dbname).await?;
        }
        Err(err) => return Err(err.into()),
    }

    // Seed IDENTITY, preferring dest over src.
    let mut got_identity_from_dest = false;
    let mut got_identity_from_src = false;
    let identity_path = local_dbname.join(filename::IDENTITY_FILE);

    if let Some(dest) = env.dest_bucket() {
        match env
            .store_manager()
            .get_object(
                dest.bucket(),
                &dest.object_key(filename::IDENTITY_FILE),
                &identity_path,
            )
            .await
        {
            Ok(()) => got_identity_from_dest = true,
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
    }
    if let Some(src) = env.src_bucket() {
        if !env.dest_equals_src() && !got_identity_from_dest {
            match env
                .store_manager()
                .get_object(
                    src.bucket(),
                    &src.object_key(filename::IDENTITY_FILE),
                    &identity_path,
                )
                .await
            {
                Ok(()) => got_identity_from_src = true,
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
    }

    if !got_identity_from_dest && !got_identity_from_src {
        // Neither bucket holds a database yet; the engine will create a
        // fresh identity when it opens.
        cirrus_log!(
            log::Level::Info,
            "sanitize",
            "no database found in src or dest; treating {} as brand new",
            local_dbname.display()
        );
        return Ok(());
    }

    if got_identity_from_src && !env.dest_equals_src() && env.dest_bucket().is_some() {
        // A dest distinct from src with no identity of its own means this
        // open creates a clone; mint its dbid from the source's.
        let src_dbid = fs::read_trimmed(&identity_path).await?;
        let clone_dbid = format!(
            "{src_dbid}{}{}",
            CloudEnv::DBID_SEPARATOR,
            env.generate_unique_id()
        );
        create_new_identity_file(local_dbname, &clone_dbid).await?;
        cirrus_log!(
            log::Level::Info,
            "sanitize",
            "created clone dbid {clone_dbid} from source dbid {src_dbid}"
        );
    }

    // Dummy CURRENT pointing at the fixed manifest name; the cloud manifest
    // remaps every read of it.
    tokio::fs::write(
        local_dbname.join(filename::CURRENT_FILE),
        format!("{}\n", filename::DUMMY_MANIFEST_FILE),
    )
    .await?;
    Ok(())
}

/// Write a fresh IDENTITY through a temporary file and rename.
pub(crate) async fn create_new_identity_file(local_dbname: &Path, dbid: &str) -> Result<()> {
    fs::write_atomic(
        &local_dbname.join(filename::IDENTITY_FILE),
        format!("{dbid}\n").as_bytes(),
    )
    .await
}

/// Bring a cloud manifest into the local directory: keep the local copy for
/// dest-less databases, otherwise prefer dest, fall back to a distinct src,
/// and create an empty legacy manifest when neither bucket has one.
pub(crate) async fn fetch_cloud_manifest(env: &CloudEnv, local_dbname: &Path) -> Result<()> {
    let local_path = local_dbname.join(filename::CLOUD_MANIFEST_FILE);
    if env.dest_bucket().is_none() && fs::exists(&local_path).await? {
        return Ok(());
    }
    if let Some(dest) = env.dest_bucket() {
        match env
            .store_manager()
            .get_object(
                dest.bucket(),
                &dest.object_key(filename::CLOUD_MANIFEST_FILE),
                &local_path,
            )
            .await
        {
            Ok(()) => return Ok(()),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
    }
    if let Some(src) = env.src_bucket() {
        if !env.dest_equals_src() {
            match env
                .store_manager()
                .get_object(
                    src.bucket(),
                    &src.object_key(filename::CLOUD_MANIFEST_FILE),
                    &local_path,
                )
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
    }
    // No cloud manifest anywhere: start from the legacy empty one.
    manifest::write_cloud_manifest(&CloudManifest::for_empty_database(""), &local_path).await
}

/// Rename a numbered manifest left behind by a pre-cloud database to the
/// epoch-less `MANIFEST` name the remapping scheme expects. Idempotent; a
/// no-op when CURRENT or the referenced manifest is absent.
pub(crate) async fn maybe_migrate_manifest_file(local_dbname: &Path) -> Result<()> {
    let manifest_name = match fs::read_trimmed(&local_dbname.join(filename::CURRENT_FILE)).await {
        Ok(name) => name,
        Err(err) if err.is_not_found() => return Ok(()),
        Err(err) => return Err(err),
    };
    if !filename::is_manifest_file(&manifest_name) {
        return Ok(());
    }
    let manifest_path = local_dbname.join(&manifest_name);
    if !fs::exists(&manifest_path).await? {
        return Ok(());
    }
    tokio::fs::rename(
        &manifest_path,
        local_dbname.join(filename::manifest_file_with_epoch("")),
    )
    .await?;
    Ok(())
}
