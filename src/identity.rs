//! Stable worker identity derived from the machine.
//!
//! The same machine always yields the same identity, so a restarted worker
//! recognizes its own leftover wait flag and working copies.

use std::fmt;
use std::path::Path;

use uuid::Uuid;

use crate::error::ConfigError;

/// Files consulted, in order, for a machine-level identifier.
const MACHINE_ID_FILES: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// Length of the hex token.
pub const IDENTITY_LEN: usize = 32;

/// A 32-character lowercase hex token naming one logical worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerIdentity(String);

impl WorkerIdentity {
    /// Derive the identity of this machine.
    pub async fn from_machine() -> Result<Self, ConfigError> {
        for path in MACHINE_ID_FILES {
            if let Some(id) = read_trimmed(Path::new(path)).await {
                return Ok(Self::from_seed(&id));
            }
        }

        let host = match std::env::var("HOSTNAME") {
            Ok(h) if !h.trim().is_empty() => Some(h.trim().to_string()),
            _ => read_trimmed(Path::new("/etc/hostname")).await,
        };
        host.map(|h| Self::from_seed(&h))
            .ok_or(ConfigError::NoMachineId)
    }

    /// Derive an identity deterministically from arbitrary text.
    pub fn from_seed(seed: &str) -> Self {
        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes());
        Self(id.simple().to_string())
    }

    /// Accept an explicit token. Uppercase hex is normalized.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let trimmed = value.trim();
        if trimmed.len() != IDENTITY_LEN || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ConfigError::InvalidIdentity {
                value: value.to_string(),
            });
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of this worker's wait flag.
    pub fn flag_name(&self) -> String {
        format!("{}.w8", self.0)
    }

    /// File name of this worker's log.
    pub fn log_name(&self) -> String {
        format!("{}.log", self.0)
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

async fn read_trimmed(path: &Path) -> Option<String> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
