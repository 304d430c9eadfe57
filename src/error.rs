//! Error types for the queue runner.

use std::path::PathBuf;

/// Exit code for a clean stop.
pub const EXIT_OK: i32 = 0;

/// Exit code for any fatal error without a dedicated code.
pub const EXIT_FAILURE: i32 = 1;

/// Exit code when a job has no single entry point to run.
pub const EXIT_AMBIGUOUS_ENTRY: i32 = 40;

/// Top-level error type for the runner.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Entry point error: {0}")]
    Entry(#[from] EntryError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

impl Error {
    /// Process exit code this error should terminate the worker with.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Entry(EntryError::AmbiguousEntryPoint { .. }) => EXIT_AMBIGUOUS_ENTRY,
            _ => EXIT_FAILURE,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid worker identity {value:?}: expected 32 hex characters")]
    InvalidIdentity { value: String },

    #[error("Could not determine a machine identifier")]
    NoMachineId,

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the flag-file election protocol.
#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    #[error("Signal directory {path} unreadable: {source}")]
    ListFlags {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write wait flag {path}: {source}")]
    WriteFlag {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to remove wait flag {path}: {source}")]
    RemoveFlag {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors from scanning, claiming and archiving jobs.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Queue directory {path} unreadable: {source}")]
    ListQueue {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to copy job {job} into {dest}: {source}")]
    Copy {
        job: String,
        dest: PathBuf,
        source: std::io::Error,
    },

    #[error("Job {job} is already claimed by another worker")]
    AlreadyClaimed { job: String },

    #[error("Job {job} is not tracked by this worker")]
    NotTracked { job: String },

    #[error("Job {job} cannot transition from {from} to {to}")]
    InvalidTransition { job: String, from: String, to: String },

    #[error("Failed to archive job {job}: {reason}")]
    Archive { job: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Entry-point resolution errors. All of them are fatal for the worker.
#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error(
        "No unambiguous entry point in {dir}: {} candidate source file(s) {candidates:?}",
        .candidates.len()
    )]
    AmbiguousEntryPoint {
        dir: PathBuf,
        candidates: Vec<String>,
    },

    #[error("Job directory {dir} unreadable: {source}")]
    Unreadable {
        dir: PathBuf,
        source: std::io::Error,
    },
}

/// Job payload errors. Recorded against the job, never fatal for the worker.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Failed to load entry point {entry}: {reason}")]
    Load { entry: PathBuf, reason: String },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Job exited with code {code:?}: {stderr}")]
    Exited { code: Option<i32>, stderr: String },

    #[error("Job failed: {0}")]
    Failed(String),

    #[error("Environment not set up: call setup() before run()")]
    NotSetUp,
}

/// Result type alias for the runner.
pub type Result<T> = std::result::Result<T, Error>;
