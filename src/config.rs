//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;

use crate::error::ConfigError;
use crate::identity::WorkerIdentity;

/// Inclusive range the randomized backoff interval is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffRange {
    pub min: Duration,
    pub max: Duration,
}

impl BackoffRange {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn from_secs(min: u64, max: u64) -> Self {
        Self::new(Duration::from_secs(min), Duration::from_secs(max))
    }

    pub fn from_millis(min: u64, max: u64) -> Self {
        Self::new(Duration::from_millis(min), Duration::from_millis(max))
    }

    /// Draw an interval uniformly from `[min, max]` at millisecond resolution.
    pub fn draw(&self) -> Duration {
        let lo = self.min.as_millis() as u64;
        let hi = (self.max.as_millis() as u64).max(lo);
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

impl Default for BackoffRange {
    fn default() -> Self {
        Self::from_secs(25, 90)
    }
}

/// Log verbosity tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Verbosity {
    /// Nothing is written to the log file.
    #[value(alias = "0")]
    Silent,
    #[value(alias = "1")]
    Debug,
    #[default]
    #[value(alias = "2")]
    Info,
}

/// Whether the worker keeps looping after executing a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPolicy {
    #[default]
    Forever,
    /// Exit normally after the first executed job.
    Once,
}

/// How a job's entry point is found and launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryConfig {
    /// Extension (without dot) marking a file as job source.
    pub extension: String,
    /// A source file whose name ends with this suffix always wins.
    pub entry_suffix: String,
    /// Program the entry point is handed to.
    pub interpreter: String,
    /// Environment variable the registered search path is exported in.
    pub search_path_var: String,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            extension: "py".to_string(),
            entry_suffix: "run.py".to_string(),
            interpreter: "python3".to_string(),
            search_path_var: "PYTHONPATH".to_string(),
        }
    }
}

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Shared root holding queue/, work/, done/ and temp/.
    pub root: PathBuf,
    /// Randomized backoff for contention, grace sleep and empty queues.
    pub backoff: BackoffRange,
    /// Log file verbosity.
    pub verbosity: Verbosity,
    /// Loop forever or stop after one job.
    pub policy: RunPolicy,
    /// Flags older than this are swept as stale. `None` disables the sweep.
    pub flag_ttl: Option<Duration>,
    /// Mark claimed jobs so no other worker picks them again.
    pub claim_markers: bool,
    /// Move finished working copies into done/.
    pub archive_finished: bool,
    /// Entry-point resolution and launch.
    pub entry: EntryConfig,
    /// Explicit identity; derived from the machine when absent.
    pub identity: Option<WorkerIdentity>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("xpdata"),
            backoff: BackoffRange::default(),
            verbosity: Verbosity::default(),
            policy: RunPolicy::default(),
            flag_ttl: Some(Duration::from_secs(900)), // 15 minutes
            claim_markers: true,
            archive_finished: true,
            entry: EntryConfig::default(),
            identity: None,
        }
    }
}

impl RunnerConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffRange) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_policy(mut self, policy: RunPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_flag_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.flag_ttl = ttl;
        self
    }

    pub fn with_claim_markers(mut self, enabled: bool) -> Self {
        self.claim_markers = enabled;
        self
    }

    pub fn with_archive(mut self, enabled: bool) -> Self {
        self.archive_finished = enabled;
        self
    }

    pub fn with_entry(mut self, entry: EntryConfig) -> Self {
        self.entry = entry;
        self
    }

    pub fn with_identity(mut self, identity: WorkerIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Reject settings the election protocol cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backoff.max.is_zero() {
            return Err(invalid("backoff.max", "must be greater than zero"));
        }
        if self.backoff.min > self.backoff.max {
            return Err(invalid(
                "backoff",
                format!(
                    "min {:?} is greater than max {:?}",
                    self.backoff.min, self.backoff.max
                ),
            ));
        }
        // A flag is only unrefreshed during its grace sleep; once held, the
        // coordinator refreshes it every third of the TTL.
        match self.flag_ttl {
            Some(ttl) if ttl <= self.backoff.max => {
                return Err(invalid(
                    "flag_ttl",
                    format!("{ttl:?} must exceed backoff.max {:?}", self.backoff.max),
                ));
            }
            _ => {}
        }
        for (key, value) in [
            ("entry.extension", &self.entry.extension),
            ("entry.entry_suffix", &self.entry.entry_suffix),
            ("entry.interpreter", &self.entry.interpreter),
            ("entry.search_path_var", &self.entry.search_path_var),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(key, "must not be empty"));
            }
        }
        Ok(())
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}
