//! Job identity and per-claim state machine.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// A job is named by its directory inside `queue/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Lifecycle of a job as seen by the worker that claimed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Present in the queue, untouched.
    Queued,
    /// Copied into a working directory tagged with the claiming identity.
    Claimed,
    /// Entry point loaded and invoked.
    Running,
    /// Payload completed.
    Finished,
    /// Entry point or payload failed.
    Failed,
}

impl JobState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        use JobState::*;

        matches!(
            (self, target),
            (Queued, Claimed) |
            (Claimed, Running) | (Claimed, Failed) |
            (Running, Finished) | (Running, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Claimed => "claimed",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A state transition event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: JobState,
    pub to: JobState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// How a job's execution ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    Failed { reason: String },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// In-memory bookkeeping for a job this worker has claimed.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: JobId,
    pub working_path: PathBuf,
    pub state: JobState,
    pub claimed_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub transitions: Vec<StateTransition>,
}

impl ClaimedJob {
    /// Bookkeeping for a freshly isolated working copy.
    pub fn new(id: JobId, working_path: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id,
            working_path,
            state: JobState::Claimed,
            claimed_at: now,
            started_at: None,
            transitions: vec![StateTransition {
                from: JobState::Queued,
                to: JobState::Claimed,
                timestamp: now,
                reason: None,
            }],
        }
    }

    pub fn transition_to(
        &mut self,
        new_state: JobState,
        reason: Option<String>,
    ) -> Result<(), StoreError> {
        if !self.state.can_transition_to(new_state) {
            return Err(StoreError::InvalidTransition {
                job: self.id.to_string(),
                from: self.state.to_string(),
                to: new_state.to_string(),
            });
        }

        let now = Utc::now();
        self.transitions.push(StateTransition {
            from: self.state,
            to: new_state,
            timestamp: now,
            reason,
        });
        self.state = new_state;

        if new_state == JobState::Running {
            self.started_at = Some(now);
        }
        Ok(())
    }
}

/// What is left of a job once its worker is done with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job: JobId,
    pub worker: String,
    pub working_path: PathBuf,
    pub archived_path: Option<PathBuf>,
    pub outcome: JobOutcome,
    pub claimed_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    pub transitions: Vec<StateTransition>,
}
