//! The worker loop: elect, claim, release, execute, finish, repeat.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{RunPolicy, RunnerConfig};
use crate::coordinator::{Coordinator, Election};
use crate::environment::{EntryLoader, JobEnvironment};
use crate::error::{Result, StoreError};
use crate::identity::WorkerIdentity;
use crate::store::{JobId, JobOutcome, JobRecord, JobStore};
use crate::worker::state::LoopState;
use crate::workspace::Workspace;

/// Result of one loop iteration.
#[derive(Debug)]
pub enum StepOutcome {
    /// Another worker's flag was seen; backed off.
    Contested,
    /// Held the election but found nothing to claim; backed off.
    NoWork,
    /// A job was claimed and executed (successfully or not).
    Executed(JobRecord),
}

/// Composes the coordinator, job store and job environment.
pub struct WorkerLoop {
    policy: RunPolicy,
    coordinator: Coordinator,
    store: JobStore,
    env: JobEnvironment,
    state: LoopState,
    shutdown: CancellationToken,
    executed: usize,
}

impl WorkerLoop {
    /// Validate the configuration, create the shared directories and settle
    /// this worker's identity.
    pub async fn provision(config: &RunnerConfig) -> Result<(Workspace, WorkerIdentity)> {
        config.validate()?;

        let workspace = Workspace::new(&config.root);
        workspace.ensure_dirs().await?;

        let identity = match &config.identity {
            Some(id) => id.clone(),
            None => WorkerIdentity::from_machine().await?,
        };
        Ok((workspace, identity))
    }

    pub async fn new(
        config: &RunnerConfig,
        workspace: Workspace,
        identity: WorkerIdentity,
        loader: Arc<dyn EntryLoader>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let coordinator = Coordinator::new(
            identity.clone(),
            workspace.signal_dir(),
            config.backoff,
            config.flag_ttl,
        )
        .await?;

        let store = JobStore::new(workspace, identity)
            .with_claim_markers(config.claim_markers)
            .with_archive(config.archive_finished);

        Ok(Self {
            policy: config.policy,
            coordinator,
            store,
            env: JobEnvironment::new(config.entry.clone(), loader),
            state: LoopState::Idle,
            shutdown,
            executed: 0,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn identity(&self) -> &WorkerIdentity {
        self.coordinator.identity()
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Jobs executed since start.
    pub fn executed(&self) -> usize {
        self.executed
    }

    /// Loop until stopped, or until one job ran under [`RunPolicy::Once`].
    ///
    /// Returns the number of executed jobs. A fatal error (unresolvable entry
    /// point, unreadable shared directories) ends the loop with the flag
    /// released.
    pub async fn run(&mut self) -> Result<usize> {
        info!(identity = %self.identity(), policy = ?self.policy, "Started...");

        while !self.shutdown.is_cancelled() {
            match self.step().await {
                Ok(StepOutcome::Executed(_)) if self.policy == RunPolicy::Once => break,
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Worker stopping on fatal error");
                    if let Err(release_err) = self.coordinator.release().await {
                        warn!(error = %release_err, "Failed to release wait flag");
                    }
                    return Err(e);
                }
            }
        }

        self.coordinator.release().await?;
        info!(executed = self.executed, "Stopped");
        Ok(self.executed)
    }

    /// Run one iteration of the state machine.
    pub async fn step(&mut self) -> Result<StepOutcome> {
        if self.state != LoopState::Electing {
            self.enter(LoopState::Electing);
        }

        match self.coordinator.attempt_election().await? {
            Election::Contested => {
                self.enter(LoopState::Contested);
                self.pause().await;
                self.enter(LoopState::Electing);
                return Ok(StepOutcome::Contested);
            }
            Election::Holding => self.enter(LoopState::Holding),
        }

        self.enter(LoopState::Searching);
        let claimed = self
            .coordinator
            .hold_during(search_and_claim(&mut self.store))
            .await;
        // Released before execution so peers can claim other jobs meanwhile.
        let released = self.coordinator.release().await;
        let claimed = claimed?;
        released?;

        match claimed {
            None => {
                self.enter(LoopState::NoneFound);
                self.pause().await;
                self.enter(LoopState::Idle);
                Ok(StepOutcome::NoWork)
            }
            Some((job, working_path)) => {
                self.enter(LoopState::Claimed);
                let record = self.execute(job, working_path).await?;
                self.executed += 1;
                self.enter(LoopState::Done);
                self.enter(LoopState::Idle);
                Ok(StepOutcome::Executed(record))
            }
        }
    }

    async fn execute(&mut self, job: JobId, working_path: PathBuf) -> Result<JobRecord> {
        self.enter(LoopState::Executing);

        let setup = self.env.setup(&working_path).await.map(|_| ());
        if let Err(e) = setup {
            self.env.reset();
            let reason = e.to_string();
            if let Err(finish_err) = self.store.finish(&job, JobOutcome::Failed { reason }).await {
                warn!(job = %job, error = %finish_err, "Failed to finish job");
            }
            return Err(e.into());
        }

        if let Err(e) = self.store.mark_running(&job) {
            self.env.reset();
            return Err(e.into());
        }

        info!(job = %job, "Starting job");
        let outcome = match self.env.run().await {
            Ok(()) => JobOutcome::Succeeded,
            Err(e) => {
                warn!(job = %job, error = %e, "Job failed");
                JobOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };
        self.env.reset();

        info!(job = %job, "Finishing job");
        Ok(self.store.finish(&job, outcome).await?)
    }

    /// Sleep the current backoff interval unless a stop is requested.
    async fn pause(&mut self) {
        let wait = self.coordinator.take_backoff();
        debug!(wait_ms = wait.as_millis() as u64, "Backing off");
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = self.shutdown.cancelled() => {}
        }
    }

    fn enter(&mut self, next: LoopState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid loop transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "Loop state");
        self.state = next;
    }
}

/// Select one queued job and copy it into a working directory.
///
/// A job that cannot be copied is skipped so one bad queue entry never
/// stops the worker.
async fn search_and_claim(store: &mut JobStore) -> Result<Option<(JobId, PathBuf)>> {
    let candidates = store.list_queued().await?;
    let Some(job) = store.select_one(&candidates) else {
        debug!("No queued jobs");
        return Ok(None);
    };

    info!(job = %job, candidates = candidates.len(), "Getting new job");
    match store.claim(&job).await {
        Ok(path) => Ok(Some((job, path))),
        Err(StoreError::AlreadyClaimed { .. }) => {
            debug!(job = %job, "Job claimed by a peer first");
            Ok(None)
        }
        Err(e @ StoreError::Copy { .. }) => {
            warn!(job = %job, error = %e, "Skipping job that could not be copied");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

impl std::fmt::Debug for WorkerLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLoop")
            .field("identity", self.identity())
            .field("state", &self.state)
            .field("policy", &self.policy)
            .field("executed", &self.executed)
            .finish_non_exhaustive()
    }
}
