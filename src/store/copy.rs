//! Recursive directory copy with durable writes.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::fs;
use tracing::{debug, warn};

/// Copy the tree at `src` into `dest` (which must not exist yet), syncing
/// every file and directory before returning. Returns the number of files.
///
/// Symlinks are followed, so linked data directories arrive as real copies.
/// A dangling link is recreated as a link, and a link back into a directory
/// already being copied is skipped.
pub async fn copy_tree_synced(src: &Path, dest: &Path) -> std::io::Result<usize> {
    let mut state = TreeCopy::default();
    copy_dir(src, dest, &mut state).await?;
    Ok(state.copied)
}

#[derive(Default)]
struct TreeCopy {
    copied: usize,
    /// Canonical paths of the directories currently being copied.
    ancestors: Vec<PathBuf>,
}

fn copy_dir<'a>(
    src: &'a Path,
    dest: &'a Path,
    state: &'a mut TreeCopy,
) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        fs::create_dir(dest).await?;
        state.ancestors.push(fs::canonicalize(src).await?);

        let mut read_dir = fs::read_dir(src).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let from = entry.path();
            let to = dest.join(entry.file_name());
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                copy_dir(&from, &to, state).await?;
            } else if file_type.is_symlink() {
                copy_link(&from, &to, state).await?;
            } else {
                copy_file(&from, &to).await?;
                state.copied += 1;
            }
        }

        state.ancestors.pop();
        sync_dir(dest).await;
        Ok(())
    })
}

async fn copy_link(from: &Path, to: &Path, state: &mut TreeCopy) -> std::io::Result<()> {
    let target = match fs::metadata(from).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let link = fs::read_link(from).await?;
            debug!(path = %from.display(), target = %link.display(), "Recreating dangling symlink");
            return fs::symlink(link, to).await;
        }
        Err(e) => return Err(e),
    };

    if target.is_dir() {
        let resolved = fs::canonicalize(from).await?;
        if state.ancestors.contains(&resolved) {
            warn!(path = %from.display(), "Skipping symlink that loops back into the job");
            return Ok(());
        }
        copy_dir(from, to, state).await
    } else {
        copy_file(from, to).await?;
        state.copied += 1;
        Ok(())
    }
}

async fn copy_file(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::copy(from, to).await?;
    fs::File::open(to).await?.sync_all().await
}

/// Flush directory entries. Not every platform can open a directory for
/// syncing, so failures are only logged.
async fn sync_dir(dir: &Path) {
    let result = match fs::File::open(dir).await {
        Ok(handle) => handle.sync_all().await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        debug!(dir = %dir.display(), error = %e, "Directory sync skipped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn copies_nested_tree() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("data/raw")).unwrap();
        std::fs::write(src.join("train.py"), "print('hi')").unwrap();
        std::fs::write(src.join("data/raw/a.csv"), "1,2").unwrap();
        std::fs::create_dir(src.join("empty")).unwrap();

        let dest = dir.path().join("dest");
        let n = copy_tree_synced(&src, &dest).await.unwrap();

        assert_eq!(n, 2);
        assert_eq!(
            std::fs::read_to_string(dest.join("train.py")).unwrap(),
            "print('hi')"
        );
        assert_eq!(
            std::fs::read_to_string(dest.join("data/raw/a.csv")).unwrap(),
            "1,2"
        );
        assert!(dest.join("empty").is_dir());
    }

    #[tokio::test]
    async fn refuses_existing_destination() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir(&src).unwrap();
        let dest = dir.path().join("dest");
        std::fs::create_dir(&dest).unwrap();

        assert!(copy_tree_synced(&src, &dest).await.is_err());
    }

    #[tokio::test]
    async fn follows_symlinked_directories_and_files() {
        let dir = TempDir::new().unwrap();
        let shared = dir.path().join("shared_data");
        std::fs::create_dir(&shared).unwrap();
        std::fs::write(shared.join("a.csv"), "1,2").unwrap();
        std::fs::write(dir.path().join("weights.bin"), "w").unwrap();

        let src = dir.path().join("src");
        std::fs::create_dir(&src).unwrap();
        std::os::unix::fs::symlink("../shared_data", src.join("data")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("weights.bin"), src.join("weights.bin"))
            .unwrap();

        let dest = dir.path().join("dest");
        let n = copy_tree_synced(&src, &dest).await.unwrap();

        assert_eq!(n, 2);
        let data = std::fs::symlink_metadata(dest.join("data")).unwrap();
        assert!(data.is_dir());
        assert_eq!(std::fs::read_to_string(dest.join("data/a.csv")).unwrap(), "1,2");
        let weights = std::fs::symlink_metadata(dest.join("weights.bin")).unwrap();
        assert!(weights.is_file());
    }

    #[tokio::test]
    async fn dangling_symlink_is_recreated() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir(&src).unwrap();
        std::os::unix::fs::symlink("missing.bin", src.join("weights.bin")).unwrap();

        let dest = dir.path().join("dest");
        assert_eq!(copy_tree_synced(&src, &dest).await.unwrap(), 0);
        assert_eq!(
            std::fs::read_link(dest.join("weights.bin")).unwrap(),
            PathBuf::from("missing.bin")
        );
    }

    #[tokio::test]
    async fn symlink_cycle_is_skipped() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("nested")).unwrap();
        std::fs::write(src.join("nested/run.py"), "pass").unwrap();
        std::os::unix::fs::symlink("..", src.join("nested/up")).unwrap();

        let dest = dir.path().join("dest");
        assert_eq!(copy_tree_synced(&src, &dest).await.unwrap(), 1);
        assert!(dest.join("nested/run.py").is_file());
        assert!(!dest.join("nested/up").exists());
    }
}
