//! Job store: queue scanning, claiming and per-job bookkeeping.
//!
//! - `job`: job ids, the per-claim state machine and finished records
//! - `claim`: claim markers so a queued job is taken at most once
//! - `copy`: synced recursive copy used to isolate a working copy
//!
//! Claiming never touches the queue source. The working copy lives at
//! `work/<identity>_<job>`, so two workers selecting jobs with the same name
//! never share a directory.

pub mod claim;
pub mod copy;
pub mod job;

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::seq::SliceRandom;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::identity::WorkerIdentity;
use crate::workspace::Workspace;

pub use job::{ClaimedJob, JobId, JobOutcome, JobRecord, JobState};

/// File written into an archived working copy.
pub const OUTCOME_FILE: &str = "outcome.json";

/// Scans the shared queue and owns the working copies this worker claims.
#[derive(Debug)]
pub struct JobStore {
    workspace: Workspace,
    identity: WorkerIdentity,
    claim_markers: bool,
    archive_finished: bool,
    active: HashMap<JobId, ClaimedJob>,
}

impl JobStore {
    pub fn new(workspace: Workspace, identity: WorkerIdentity) -> Self {
        Self {
            workspace,
            identity,
            claim_markers: true,
            archive_finished: true,
            active: HashMap::new(),
        }
    }

    pub fn with_claim_markers(mut self, enabled: bool) -> Self {
        self.claim_markers = enabled;
        self
    }

    pub fn with_archive(mut self, enabled: bool) -> Self {
        self.archive_finished = enabled;
        self
    }

    /// Job directories currently waiting in the queue, minus claimed ones.
    pub async fn list_queued(&self) -> Result<Vec<JobId>, StoreError> {
        let queue = self.workspace.queue_dir();
        let list_err = |source| StoreError::ListQueue {
            path: queue.clone(),
            source,
        };

        let mut jobs = Vec::new();
        let mut read_dir = fs::read_dir(&queue).await.map_err(list_err)?;
        while let Some(entry) = read_dir.next_entry().await.map_err(list_err)? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            // Entries can disappear between listing and stat.
            let is_dir = match entry.file_type().await {
                Ok(t) => t.is_dir(),
                Err(_) => false,
            };
            if !is_dir {
                continue;
            }

            let id = JobId::new(name);
            if self.claim_markers && claim::is_claimed(&self.workspace.signal_dir(), &id).await {
                continue;
            }
            jobs.push(id);
        }
        jobs.sort();

        debug!(count = jobs.len(), "Scanned queue");
        Ok(jobs)
    }

    /// Pick one candidate uniformly at random.
    pub fn select_one(&self, candidates: &[JobId]) -> Option<JobId> {
        match candidates {
            [] => None,
            [only] => Some(only.clone()),
            many => many.choose(&mut rand::thread_rng()).cloned(),
        }
    }

    /// Working-copy path this worker uses for `job`.
    pub fn working_path(&self, job: &JobId) -> PathBuf {
        self.workspace
            .work_dir()
            .join(format!("{}_{}", self.identity.as_str(), job.as_str()))
    }

    /// Copy a queued job into this worker's private working directory.
    ///
    /// When the copy fails while the job is still queued, its claim marker
    /// is kept so no worker retries a job that cannot be copied. A job that
    /// vanished from the queue, or a leftover working copy that could not be
    /// cleared, releases the marker.
    pub async fn claim(&mut self, job: &JobId) -> Result<PathBuf, StoreError> {
        let source = self.workspace.queue_dir().join(job.as_str());
        let dest = self.working_path(job);

        let marker = if self.claim_markers {
            Some(claim::create_marker(&self.workspace.signal_dir(), job, &self.identity).await?)
        } else {
            None
        };
        let copy_err = |source| StoreError::Copy {
            job: job.to_string(),
            dest: dest.clone(),
            source,
        };

        // Same identity means the same logical worker restarting.
        if fs::try_exists(&dest).await.unwrap_or(false) {
            warn!(job = %job, path = %dest.display(), "Removing leftover working copy");
            if let Err(e) = fs::remove_dir_all(&dest).await {
                release_marker(marker.as_deref()).await;
                return Err(copy_err(e));
            }
        }

        match copy::copy_tree_synced(&source, &dest).await {
            Ok(files) => {
                info!(job = %job, files, path = %dest.display(), "Job claimed");
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&dest).await;
                if fs::try_exists(&source).await.unwrap_or(false) {
                    if let Some(marker) = &marker {
                        warn!(
                            job = %job,
                            marker = %marker.display(),
                            "Job could not be copied; leaving it claimed"
                        );
                    }
                } else {
                    release_marker(marker.as_deref()).await;
                }
                return Err(copy_err(e));
            }
        }

        self.active
            .insert(job.clone(), ClaimedJob::new(job.clone(), dest.clone()));
        Ok(dest)
    }

    pub fn job(&self, job: &JobId) -> Option<&ClaimedJob> {
        self.active.get(job)
    }

    /// Number of jobs claimed and not yet finished.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Record that the job's entry point is about to be invoked.
    pub fn mark_running(&mut self, job: &JobId) -> Result<(), StoreError> {
        self.tracked_mut(job)?.transition_to(JobState::Running, None)
    }

    /// Close out a job: record its outcome, drop its bookkeeping and, when
    /// enabled, move the working copy into `done/`.
    pub async fn finish(
        &mut self,
        job: &JobId,
        outcome: JobOutcome,
    ) -> Result<JobRecord, StoreError> {
        let mut claimed = self.active.remove(job).ok_or_else(|| StoreError::NotTracked {
            job: job.to_string(),
        })?;

        let (target, reason) = match &outcome {
            JobOutcome::Succeeded => (JobState::Finished, None),
            JobOutcome::Failed { reason } => (JobState::Failed, Some(reason.clone())),
        };
        claimed.transition_to(target, reason)?;

        let mut record = JobRecord {
            job: claimed.id,
            worker: self.identity.to_string(),
            working_path: claimed.working_path,
            archived_path: None,
            outcome,
            claimed_at: claimed.claimed_at,
            started_at: claimed.started_at,
            finished_at: Utc::now(),
            transitions: claimed.transitions,
        };

        if self.archive_finished {
            match self.archive(&record).await {
                Ok(path) => record.archived_path = Some(path),
                Err(e) => warn!(job = %record.job, error = %e, "Failed to archive working copy"),
            }
        }

        info!(job = %record.job, success = record.outcome.is_success(), "Job finished");
        Ok(record)
    }

    fn tracked_mut(&mut self, job: &JobId) -> Result<&mut ClaimedJob, StoreError> {
        self.active.get_mut(job).ok_or_else(|| StoreError::NotTracked {
            job: job.to_string(),
        })
    }

    async fn archive(&self, record: &JobRecord) -> Result<PathBuf, StoreError> {
        let name = record
            .working_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| record.job.to_string());

        let mut dest = self.workspace.done_dir().join(&name);
        if fs::try_exists(&dest).await.unwrap_or(false) {
            let stamp = record.finished_at.format("%Y%m%d%H%M%S%3f");
            dest = self.workspace.done_dir().join(format!("{name}_{stamp}"));
        }

        match fs::rename(&record.working_path, &dest).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::Archive {
                    job: record.job.to_string(),
                    reason: "working copy is gone".to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        let json = serde_json::to_vec_pretty(record).map_err(|e| StoreError::Archive {
            job: record.job.to_string(),
            reason: e.to_string(),
        })?;
        fs::write(dest.join(OUTCOME_FILE), json).await?;

        debug!(job = %record.job, path = %dest.display(), "Working copy archived");
        Ok(dest)
    }
}

async fn release_marker(marker: Option<&Path>) {
    if let Some(marker) = marker {
        if let Err(e) = fs::remove_file(marker).await {
            debug!(marker = %marker.display(), error = %e, "Claim marker not removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store(seed: &str) -> (JobStore, Workspace, TempDir) {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        ws.ensure_dirs().await.unwrap();
        let store = JobStore::new(ws.clone(), WorkerIdentity::from_seed(seed));
        (store, ws, dir)
    }

    fn queue_job(ws: &Workspace, name: &str) {
        let job = ws.queue_dir().join(name);
        std::fs::create_dir_all(&job).unwrap();
        std::fs::write(job.join("run.py"), "print('run')").unwrap();
    }

    #[tokio::test]
    async fn empty_queue_lists_nothing() {
        let (store, _ws, _dir) = test_store("w").await;
        assert!(store.list_queued().await.unwrap().is_empty());
        assert_eq!(store.select_one(&[]), None);
    }

    #[tokio::test]
    async fn lists_directories_only() {
        let (store, ws, _dir) = test_store("w").await;
        queue_job(&ws, "b");
        queue_job(&ws, "a");
        std::fs::write(ws.queue_dir().join("stray.txt"), "x").unwrap();
        std::fs::create_dir(ws.queue_dir().join(".hidden")).unwrap();

        let jobs = store.list_queued().await.unwrap();
        assert_eq!(jobs, vec![JobId::from("a"), JobId::from("b")]);
    }

    #[tokio::test]
    async fn select_one_picks_a_candidate() {
        let (store, _ws, _dir) = test_store("w").await;
        let only = vec![JobId::from("x")];
        assert_eq!(store.select_one(&only), Some(JobId::from("x")));

        let many = vec![JobId::from("a"), JobId::from("b"), JobId::from("c")];
        for _ in 0..20 {
            let picked = store.select_one(&many).unwrap();
            assert!(many.contains(&picked));
        }
    }

    #[tokio::test]
    async fn claim_copies_and_tags_with_identity() {
        let (mut store, ws, _dir) = test_store("w").await;
        queue_job(&ws, "exp1");
        let id = JobId::from("exp1");

        let path = store.claim(&id).await.unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(WorkerIdentity::from_seed("w").as_str()));
        assert!(name.ends_with("_exp1"));
        assert!(path.join("run.py").is_file());
        // Source stays in the queue.
        assert!(ws.queue_dir().join("exp1/run.py").is_file());
        assert_eq!(store.job(&id).unwrap().state, JobState::Claimed);
    }

    #[tokio::test]
    async fn claimed_job_is_hidden_from_listing() {
        let (mut store, ws, _dir) = test_store("w").await;
        queue_job(&ws, "exp1");
        queue_job(&ws, "exp2");
        store.claim(&JobId::from("exp1")).await.unwrap();

        assert_eq!(store.list_queued().await.unwrap(), vec![JobId::from("exp2")]);
        assert!(matches!(
            store.claim(&JobId::from("exp1")).await,
            Err(StoreError::AlreadyClaimed { .. })
        ));
    }

    #[tokio::test]
    async fn markers_disabled_allows_reclaim() {
        let (store, ws, _dir) = test_store("w").await;
        let mut store = store.with_claim_markers(false).with_archive(false);
        queue_job(&ws, "exp1");
        let id = JobId::from("exp1");

        store.claim(&id).await.unwrap();
        assert_eq!(store.list_queued().await.unwrap(), vec![id.clone()]);
        store.finish(&id, JobOutcome::Succeeded).await.unwrap();
        // Leftover working copy from the first run is replaced.
        store.claim(&id).await.unwrap();
    }

    #[tokio::test]
    async fn claim_missing_job_releases_marker() {
        let (mut store, ws, _dir) = test_store("w").await;
        let id = JobId::from("ghost");
        assert!(matches!(store.claim(&id).await, Err(StoreError::Copy { .. })));
        assert!(!claim::is_claimed(&ws.signal_dir(), &id).await);
        assert_eq!(store.active_count(), 0);
    }

    #[tokio::test]
    async fn job_removed_after_listing_releases_marker() {
        let (mut store, ws, _dir) = test_store("w").await;
        queue_job(&ws, "exp1");
        let listed = store.list_queued().await.unwrap();
        std::fs::remove_dir_all(ws.queue_dir().join("exp1")).unwrap();

        let result = store.claim(&listed[0]).await;
        assert!(matches!(result, Err(StoreError::Copy { .. })));
        assert!(!claim::is_claimed(&ws.signal_dir(), &listed[0]).await);
        assert!(!store.working_path(&listed[0]).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn uncopyable_job_stays_claimed() {
        let (mut store, ws, _dir) = test_store("w").await;
        queue_job(&ws, "sock");
        let _listener =
            std::os::unix::net::UnixListener::bind(ws.queue_dir().join("sock/ipc.sock")).unwrap();
        let id = JobId::from("sock");

        assert!(matches!(store.claim(&id).await, Err(StoreError::Copy { .. })));
        assert!(claim::is_claimed(&ws.signal_dir(), &id).await);
        assert!(!store.working_path(&id).exists());
        assert!(store.list_queued().await.unwrap().is_empty());
        assert_eq!(store.active_count(), 0);
    }

    #[tokio::test]
    async fn stuck_leftover_working_copy_releases_marker() {
        let (mut store, ws, _dir) = test_store("w").await;
        queue_job(&ws, "exp1");
        let id = JobId::from("exp1");
        // A plain file where the working directory should be cannot be
        // cleared with a directory removal.
        std::fs::write(store.working_path(&id), "stale").unwrap();

        assert!(matches!(store.claim(&id).await, Err(StoreError::Copy { .. })));
        assert!(!claim::is_claimed(&ws.signal_dir(), &id).await);
        assert_eq!(store.list_queued().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn finish_archives_and_clears_state() {
        let (mut store, ws, _dir) = test_store("w").await;
        queue_job(&ws, "exp1");
        let id = JobId::from("exp1");
        let working = store.claim(&id).await.unwrap();
        store.mark_running(&id).unwrap();

        let record = store.finish(&id, JobOutcome::Succeeded).await.unwrap();
        assert_eq!(store.active_count(), 0);
        assert!(!working.exists());

        let archived = record.archived_path.unwrap();
        assert!(archived.starts_with(ws.done_dir()));
        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(archived.join(OUTCOME_FILE)).unwrap()).unwrap();
        assert_eq!(json["job"], "exp1");
        assert_eq!(json["outcome"]["status"], "succeeded");
        assert_eq!(record.transitions.len(), 3);
    }

    #[tokio::test]
    async fn finish_failed_from_claimed() {
        let (store, ws, _dir) = test_store("w").await;
        let mut store = store.with_archive(false);
        queue_job(&ws, "exp1");
        let id = JobId::from("exp1");
        let working = store.claim(&id).await.unwrap();

        let record = store
            .finish(&id, JobOutcome::Failed { reason: "no entry".into() })
            .await
            .unwrap();
        assert!(!record.outcome.is_success());
        assert!(record.archived_path.is_none());
        assert!(working.exists());
    }

    #[tokio::test]
    async fn finish_untracked_job_errors() {
        let (mut store, _ws, _dir) = test_store("w").await;
        let result = store.finish(&JobId::from("nope"), JobOutcome::Succeeded).await;
        assert!(matches!(result, Err(StoreError::NotTracked { .. })));
    }
}
