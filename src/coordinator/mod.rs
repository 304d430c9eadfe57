//! Flag-file election among workers sharing one signal directory.
//!
//! There is no create-if-absent primitive the shared filesystem is trusted
//! with, so exclusivity is approximated by write, wait, recount:
//!
//! 1. Any flag present means contention; back off.
//! 2. Otherwise write our flag and sleep the current interval (grace sleep).
//! 3. More than one flag after the grace sleep means a race; drop our flag.
//! 4. Exactly our flag means we hold the election.
//!
//! A flag written by a true peer during the grace window is visible at the
//! recount, so most races are caught at the cost of one interval per attempt.
//!
//! With a lease TTL, a holder refreshes its flag while it searches and
//! claims, so a slow copy never looks like a dead peer.

pub mod flags;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::BackoffRange;
use crate::error::CoordinationError;
use crate::identity::WorkerIdentity;

/// Outcome of one election attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Election {
    /// Sole flag holder; free to look for work.
    Holding,
    /// Other flags seen; back off and retry.
    Contested,
}

/// Owns this worker's wait flag and runs the election protocol.
#[derive(Debug)]
pub struct Coordinator {
    identity: WorkerIdentity,
    signal_dir: PathBuf,
    flag_path: PathBuf,
    backoff: BackoffRange,
    flag_ttl: Option<Duration>,
    /// Interval used for the next grace sleep and backoff.
    interval: Duration,
}

impl Coordinator {
    /// Create a coordinator and clear this identity's crash remnant.
    ///
    /// When the only flag present is our own, a previous run of this same
    /// identity died while holding it; it is removed instead of counted as
    /// contention.
    pub async fn new(
        identity: WorkerIdentity,
        signal_dir: impl Into<PathBuf>,
        backoff: BackoffRange,
        flag_ttl: Option<Duration>,
    ) -> Result<Self, CoordinationError> {
        let signal_dir = signal_dir.into();
        let flag_path = signal_dir.join(identity.flag_name());
        let coordinator = Self {
            identity,
            signal_dir,
            flag_path,
            backoff,
            flag_ttl,
            interval: backoff.draw(),
        };

        let present = coordinator.flags().await?;
        if present.len() == 1 && present[0] == coordinator.identity.flag_name() {
            debug!(
                flag = %present[0],
                "Found this worker's old wait flag; previous instance crashed?"
            );
            flags::remove_flag(&coordinator.flag_path).await?;
        }

        Ok(coordinator)
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    pub fn flag_path(&self) -> &Path {
        &self.flag_path
    }

    /// Interval the next grace sleep or backoff will use.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Flags currently present in the signal directory.
    pub async fn flags(&self) -> Result<Vec<String>, CoordinationError> {
        flags::list_flags(&self.signal_dir, self.flag_ttl).await
    }

    /// Run one election attempt.
    pub async fn attempt_election(&mut self) -> Result<Election, CoordinationError> {
        let present = self.flags().await?;
        if !present.is_empty() {
            debug!(flags = present.len(), "Wait flags present, backing off");
            return Ok(Election::Contested);
        }

        flags::write_flag(&self.flag_path).await?;
        debug!(grace_ms = self.interval.as_millis() as u64, "Wait flag set, grace sleep");
        tokio::time::sleep(self.interval).await;

        let present = self.flags().await?;
        let own = self.identity.flag_name();
        if present.len() == 1 && present[0] == own {
            info!("Holding the election");
            return Ok(Election::Holding);
        }

        debug!(
            flags = present.len(),
            "Flag race detected after grace sleep, yielding"
        );
        flags::remove_flag(&self.flag_path).await?;
        Ok(Election::Contested)
    }

    /// Drive `work` to completion while holding, refreshing the flag's lease
    /// every third of the TTL so peers do not sweep it.
    pub async fn hold_during<F: Future>(&self, work: F) -> F::Output {
        let Some(ttl) = self.flag_ttl else {
            return work.await;
        };
        let period = (ttl / 3).max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(work);
        loop {
            tokio::select! {
                output = &mut work => return output,
                _ = ticker.tick() => match flags::refresh_flag(&self.flag_path).await {
                    Ok(true) => debug!("Wait flag lease refreshed"),
                    Ok(false) => warn!("Wait flag vanished while holding"),
                    Err(e) => warn!(error = %e, "Failed to refresh wait flag"),
                },
            }
        }
    }

    /// Remove this worker's flag. A flag that is already gone is fine.
    pub async fn release(&mut self) -> Result<(), CoordinationError> {
        if flags::remove_flag(&self.flag_path).await? {
            debug!("Wait flag released");
        }
        Ok(())
    }

    /// Return the interval to back off for and draw a fresh one for the next cycle.
    pub fn take_backoff(&mut self) -> Duration {
        std::mem::replace(&mut self.interval, self.backoff.draw())
    }
}
