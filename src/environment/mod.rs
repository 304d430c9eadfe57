//! Per-job execution environment.
//!
//! - `entry`: picks the entry point inside a working copy
//! - `loader`: `Executable` / `EntryLoader` seam and the interpreter-backed loader
//! - `search_path`: scoped registration of the job directory on the search path
//!
//! `setup` resolves the entry point and registers the working copy on the
//! search path, `run` loads and awaits the payload, `reset` drops the
//! registration. Dropping the environment also drops the registration.

pub mod entry;
pub mod loader;
pub mod search_path;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::config::EntryConfig;
use crate::error::{EntryError, JobError};

pub use entry::resolve_entry_point;
pub use loader::{EntryLoader, Executable, ScriptLoader};
pub use search_path::SearchPathGuard;

/// Loads and runs one job at a time.
pub struct JobEnvironment {
    config: EntryConfig,
    loader: Arc<dyn EntryLoader>,
    working_path: Option<PathBuf>,
    entry: Option<PathBuf>,
    registration: Option<SearchPathGuard>,
}

impl JobEnvironment {
    pub fn new(config: EntryConfig, loader: Arc<dyn EntryLoader>) -> Self {
        Self {
            config,
            loader,
            working_path: None,
            entry: None,
            registration: None,
        }
    }

    /// Resolve the entry point of `working_path` and register it on the
    /// search path. Nothing is registered when resolution fails.
    pub async fn setup(&mut self, working_path: &Path) -> Result<&Path, EntryError> {
        self.reset();

        let entry = resolve_entry_point(working_path, &self.config).await?;
        debug!(entry = %entry.display(), "Entry point resolved");

        self.registration = Some(search_path::register(working_path));
        self.working_path = Some(working_path.to_path_buf());
        let entry = self.entry.insert(entry);
        Ok(entry.as_path())
    }

    /// Load the entry point and run it to completion.
    pub async fn run(&self) -> Result<(), JobError> {
        let (Some(entry), Some(working_path)) = (&self.entry, &self.working_path) else {
            return Err(JobError::NotSetUp);
        };
        let executable = self.loader.load(entry, working_path)?;
        executable.invoke().await
    }

    /// Undo `setup`. Safe to call at any time, any number of times.
    pub fn reset(&mut self) {
        if let Some(guard) = self.registration.take() {
            debug!(path = %guard.path().display(), "Search path entry removed");
        }
        self.working_path = None;
        self.entry = None;
    }

    pub fn entry_point(&self) -> Option<&Path> {
        self.entry.as_deref()
    }

    pub fn is_set_up(&self) -> bool {
        self.registration.is_some()
    }
}

impl std::fmt::Debug for JobEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEnvironment")
            .field("config", &self.config)
            .field("working_path", &self.working_path)
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}
