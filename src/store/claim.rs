//! Claim markers closing the list-then-claim race.
//!
//! A marker `<job>.claim` in the signal directory records which identity
//! took a job. Markers are written only while holding the election and stay
//! after the job runs. A marker is dropped again only when the claim could
//! not start: the job left the queue, or the old working copy was stuck.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::StoreError;
use crate::identity::WorkerIdentity;
use crate::store::job::JobId;

/// Extension of claim-marker files.
pub const CLAIM_EXTENSION: &str = ".claim";

pub fn marker_path(signal_dir: &Path, job: &JobId) -> PathBuf {
    signal_dir.join(format!("{}{}", job.as_str(), CLAIM_EXTENSION))
}

pub async fn is_claimed(signal_dir: &Path, job: &JobId) -> bool {
    fs::try_exists(marker_path(signal_dir, job))
        .await
        .unwrap_or(false)
}

/// Create the marker exclusively. Fails with `AlreadyClaimed` if any worker
/// got there first.
pub async fn create_marker(
    signal_dir: &Path,
    job: &JobId,
    identity: &WorkerIdentity,
) -> Result<PathBuf, StoreError> {
    let path = marker_path(signal_dir, job);
    let mut file = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await
    {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(StoreError::AlreadyClaimed {
                job: job.to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };
    file.write_all(identity.as_str().as_bytes()).await?;
    file.sync_all().await?;
    Ok(path)
}

/// Identity recorded in a job's marker, if any.
pub async fn claimed_by(signal_dir: &Path, job: &JobId) -> Option<String> {
    fs::read_to_string(marker_path(signal_dir, job))
        .await
        .ok()
        .map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn second_claim_is_rejected() {
        let dir = TempDir::new().unwrap();
        let job = JobId::from("exp1");
        let a = WorkerIdentity::from_seed("a");
        let b = WorkerIdentity::from_seed("b");

        assert!(!is_claimed(dir.path(), &job).await);
        create_marker(dir.path(), &job, &a).await.unwrap();
        assert!(is_claimed(dir.path(), &job).await);

        let err = create_marker(dir.path(), &job, &b).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyClaimed { .. }));
        assert_eq!(claimed_by(dir.path(), &job).await.as_deref(), Some(a.as_str()));
    }
}
