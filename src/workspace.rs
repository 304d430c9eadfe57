//! Shared root layout used by every worker.
//!
//! The root is a directory on a filesystem all workers can see:
//! - `queue/`: pending job directories
//! - `work/`: isolated per-claim working copies
//! - `done/`: archived working copies
//! - `temp/`: wait flags and claim markers
//! - `<identity>.log`: one log file per worker

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::ConfigError;
use crate::identity::WorkerIdentity;

/// Well-known directory names under the shared root.
pub mod dirs {
    pub const QUEUE: &str = "queue";
    pub const WORK: &str = "work";
    pub const DONE: &str = "done";
    pub const SIGNAL: &str = "temp";
}

/// Resolved paths of the shared root.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create a workspace rooted at `root`. Nothing is touched on disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.root.join(dirs::QUEUE)
    }

    pub fn work_dir(&self) -> PathBuf {
        self.root.join(dirs::WORK)
    }

    pub fn done_dir(&self) -> PathBuf {
        self.root.join(dirs::DONE)
    }

    /// Directory holding `.w8` wait flags.
    pub fn signal_dir(&self) -> PathBuf {
        self.root.join(dirs::SIGNAL)
    }

    /// Log file of the given worker.
    pub fn log_path(&self, identity: &WorkerIdentity) -> PathBuf {
        self.root.join(identity.log_name())
    }

    /// Ensure the root and all its subdirectories exist.
    pub async fn ensure_dirs(&self) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.root).await?;
        for dir in [
            self.queue_dir(),
            self.work_dir(),
            self.done_dir(),
            self.signal_dir(),
        ] {
            fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }
}
