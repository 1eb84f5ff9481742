//! Thin asynchronous adapters over the local filesystem.

use std::{io, path::Path};

use tokio::fs;

use crate::error::Result;

/// Existence probe that distinguishes absence from other failures.
pub(crate) async fn exists(path: impl AsRef<Path>) -> io::Result<bool> {
    match fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Read a small text file with surrounding whitespace removed.
pub(crate) async fn read_trimmed(path: impl AsRef<Path>) -> Result<String> {
    let contents = fs::read_to_string(path).await?;
    Ok(contents.trim().to_string())
}

/// Write a file through a temporary sibling and an atomic rename, so readers
/// never observe a torn write.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    fs::write(&tmp, contents).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Names of all entries directly under `path`.
pub(crate) async fn list_dir(path: impl AsRef<Path>) -> io::Result<Vec<String>> {
    let mut entries = fs::read_dir(path).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

/// Create `path` and any missing parents.
pub(crate) async fn create_dir_if_missing(path: impl AsRef<Path>) -> io::Result<()> {
    fs::create_dir_all(path).await
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn atomic_write_then_trimmed_read() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("IDENTITY");
        write_atomic(&path, b"db-one\n").await.expect("write");
        assert_eq!(read_trimmed(&path).await.expect("read"), "db-one");
        assert!(!exists(dir.path().join("IDENTITY.tmp"))
            .await
            .expect("probe"));
    }

    #[tokio::test]
    async fn exists_distinguishes_absence() {
        let dir = TempDir::new().expect("temp dir");
        assert!(!exists(dir.path().join("CURRENT")).await.expect("probe"));
        fs::write(dir.path().join("CURRENT"), b"MANIFEST-000001\n")
            .await
            .expect("write");
        assert!(exists(dir.path().join("CURRENT")).await.expect("probe"));
    }
}
