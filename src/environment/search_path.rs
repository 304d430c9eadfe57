//! Process-global search path for job code.
//!
//! Entries are only added through [`register`], which hands back a guard;
//! dropping the guard removes the entry again, so a job's directory never
//! leaks into the next job's search path whatever way the job ended.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, MutexGuard};

static SEARCH_PATH: LazyLock<Mutex<Vec<PathBuf>>> = LazyLock::new(|| Mutex::new(Vec::new()));

fn entries() -> MutexGuard<'static, Vec<PathBuf>> {
    // A panic while holding the lock leaves the Vec itself intact.
    SEARCH_PATH.lock().unwrap_or_else(|e| e.into_inner())
}

/// Registration of one search-path entry; unregisters on drop.
#[derive(Debug)]
#[must_use = "the entry is removed as soon as the guard is dropped"]
pub struct SearchPathGuard {
    path: PathBuf,
}

impl SearchPathGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SearchPathGuard {
    fn drop(&mut self) {
        let mut entries = entries();
        if let Some(pos) = entries.iter().rposition(|p| p == &self.path) {
            entries.remove(pos);
        }
    }
}

/// Append `path` to the search path for as long as the guard lives.
pub fn register(path: impl Into<PathBuf>) -> SearchPathGuard {
    let path = path.into();
    entries().push(path.clone());
    SearchPathGuard { path }
}

/// Current entries, in registration order.
pub fn snapshot() -> Vec<PathBuf> {
    entries().clone()
}

pub fn contains(path: &Path) -> bool {
    entries().iter().any(|p| p == path)
}

/// The search path joined with the platform separator, for exporting in an
/// environment variable.
pub fn joined() -> Option<OsString> {
    std::env::join_paths(snapshot()).ok()
}
