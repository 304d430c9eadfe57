//! Loading a resolved entry point into something that can be invoked.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::EntryConfig;
use crate::environment::search_path;
use crate::error::JobError;

/// Maximum captured output kept in a failure message.
const MAX_STDERR_TAIL: usize = 4 * 1024;

/// A loaded job payload.
#[async_trait]
pub trait Executable: Send + Sync {
    /// Run the payload to completion.
    async fn invoke(&self) -> Result<(), JobError>;
}

/// Turns an entry-point file into an [`Executable`].
///
/// Called from async code with an entry that setup already resolved, so
/// implementations should not touch the filesystem here.
pub trait EntryLoader: Send + Sync {
    fn load(&self, entry: &Path, working_dir: &Path) -> Result<Box<dyn Executable>, JobError>;
}

/// Runs entry points with an external interpreter.
#[derive(Debug, Clone)]
pub struct ScriptLoader {
    interpreter: String,
    search_path_var: String,
}

impl ScriptLoader {
    pub fn new(config: &EntryConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            search_path_var: config.search_path_var.clone(),
        }
    }
}

impl EntryLoader for ScriptLoader {
    fn load(&self, entry: &Path, working_dir: &Path) -> Result<Box<dyn Executable>, JobError> {
        Ok(Box::new(ScriptExecutable {
            interpreter: self.interpreter.clone(),
            search_path_var: self.search_path_var.clone(),
            entry: entry.to_path_buf(),
            working_dir: working_dir.to_path_buf(),
        }))
    }
}

/// One interpreter invocation of a job's entry point.
#[derive(Debug)]
pub struct ScriptExecutable {
    interpreter: String,
    search_path_var: String,
    entry: PathBuf,
    working_dir: PathBuf,
}

#[async_trait]
impl Executable for ScriptExecutable {
    async fn invoke(&self) -> Result<(), JobError> {
        tracing::info!(
            entry = %self.entry.display(),
            interpreter = %self.interpreter,
            "Invoking job entry point"
        );

        let mut command = Command::new(&self.interpreter);
        command
            .arg(&self.entry)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = search_path::joined() {
            command.env(&self.search_path_var, path);
        }

        let output = command.output().await.map_err(|source| JobError::Spawn {
            program: self.interpreter.clone(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.is_empty() {
            tracing::debug!(entry = %self.entry.display(), "stdout:\n{}", stdout.trim_end());
        }
        if !stderr.is_empty() {
            tracing::debug!(entry = %self.entry.display(), "stderr:\n{}", stderr.trim_end());
        }

        if output.status.success() {
            Ok(())
        } else {
            Err(JobError::Exited {
                code: output.status.code(),
                stderr: tail(&stderr, MAX_STDERR_TAIL).to_string(),
            })
        }
    }
}

/// Last `max` bytes of `s`, cut on a char boundary.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s.trim_end();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].trim_end()
}
