//! Wait-flag file primitives.
//!
//! A flag is a zero-byte `<identity>.w8` file in the signal directory. Only
//! its presence matters; its modification time doubles as the lease issue
//! time for the stale sweep.

use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tokio::fs;
use tracing::{debug, warn};

use crate::error::CoordinationError;

/// Extension of wait-flag files.
pub const FLAG_EXTENSION: &str = ".w8";

/// List the wait flags currently present, sorted by name.
///
/// With a `ttl`, flags whose lease has expired are removed and left out of
/// the result.
pub async fn list_flags(
    dir: &Path,
    ttl: Option<Duration>,
) -> Result<Vec<String>, CoordinationError> {
    let list_err = |source| CoordinationError::ListFlags {
        path: dir.to_path_buf(),
        source,
    };

    let mut flags = Vec::new();
    let mut read_dir = fs::read_dir(dir).await.map_err(list_err)?;
    while let Some(entry) = read_dir.next_entry().await.map_err(list_err)? {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.ends_with(FLAG_EXTENSION) {
            continue;
        }

        if let Some(ttl) = ttl {
            match lease_age(&entry.path()).await {
                Some(age) if age > ttl => {
                    warn!(flag = %name, age_secs = age.as_secs(), "Sweeping expired wait flag");
                    remove_flag(&entry.path()).await?;
                    continue;
                }
                Some(_) => {}
                // Vanished between listing and stat; a peer released it.
                None => continue,
            }
        }

        flags.push(name);
    }
    flags.sort();
    Ok(flags)
}

/// Create (or refresh) a zero-byte flag file.
pub async fn write_flag(path: &Path) -> Result<(), CoordinationError> {
    fs::write(path, b"")
        .await
        .map_err(|source| CoordinationError::WriteFlag {
            path: path.to_path_buf(),
            source,
        })
}

/// Bump a held flag's modification time so the stale sweep keeps seeing a
/// live lease. Returns `false` when the flag is gone; it is not recreated.
pub async fn refresh_flag(path: &Path) -> Result<bool, CoordinationError> {
    // Truncating an open file marks its mtime even when it is already empty.
    match fs::OpenOptions::new().write(true).truncate(true).open(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(source) => Err(CoordinationError::WriteFlag {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Remove a flag file. Returns `false` when it was already gone.
pub async fn remove_flag(path: &Path) -> Result<bool, CoordinationError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "Wait flag already removed");
            Ok(false)
        }
        Err(source) => Err(CoordinationError::RemoveFlag {
            path: path.to_path_buf(),
            source,
        }),
    }
}

async fn lease_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).await.ok()?.modified().ok()?;
    // Clock skew on a shared filesystem can put mtime in the future.
    Some(SystemTime::now().duration_since(modified).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn lists_only_flag_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.w8"), "").unwrap();
        std::fs::write(dir.path().join("a.w8"), "").unwrap();
        std::fs::write(dir.path().join("job1.claim"), "x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let flags = list_flags(dir.path(), None).await.unwrap();
        assert_eq!(flags, vec!["a.w8".to_string(), "b.w8".to_string()]);
    }

    #[tokio::test]
    async fn write_creates_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("me.w8");
        write_flag(&path).await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn remove_missing_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.w8");
        assert!(!remove_flag(&path).await.unwrap());

        write_flag(&path).await.unwrap();
        assert!(remove_flag(&path).await.unwrap());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn expired_flags_are_swept() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("old.w8"), "").unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        std::fs::write(dir.path().join("fresh.w8"), "").unwrap();

        let flags = list_flags(dir.path(), Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert_eq!(flags, vec!["fresh.w8".to_string()]);
        assert!(!dir.path().join("old.w8").exists());
    }

    #[tokio::test]
    async fn refreshed_flag_survives_the_sweep() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("holder.w8");
        std::fs::write(&path, "").unwrap();
        let hour_ago = SystemTime::now() - Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(hour_ago)
            .unwrap();

        assert!(refresh_flag(&path).await.unwrap());
        let flags = list_flags(dir.path(), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(flags, vec!["holder.w8".to_string()]);
    }

    #[tokio::test]
    async fn refresh_does_not_recreate_a_removed_flag() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.w8");
        assert!(!refresh_flag(&path).await.unwrap());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_dir_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = list_flags(&dir.path().join("absent"), None).await;
        assert!(matches!(result, Err(CoordinationError::ListFlags { .. })));
    }
}
