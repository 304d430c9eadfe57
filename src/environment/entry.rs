//! Entry-point resolution for a job's working copy.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::config::EntryConfig;
use crate::error::EntryError;

/// Pick the file to run among the source files directly inside `dir`.
///
/// A file whose name ends with the designated suffix always wins. Otherwise
/// a lone source file is the entry point. Anything else is ambiguous.
pub async fn resolve_entry_point(dir: &Path, config: &EntryConfig) -> Result<PathBuf, EntryError> {
    let unreadable = |source| EntryError::Unreadable {
        dir: dir.to_path_buf(),
        source,
    };

    let dotted = format!(".{}", config.extension.trim_start_matches('.'));
    let mut sources = Vec::new();
    let mut read_dir = fs::read_dir(dir).await.map_err(unreadable)?;
    while let Some(entry) = read_dir.next_entry().await.map_err(unreadable)? {
        if !entry.file_type().await.map_err(unreadable)?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(&dotted) {
            sources.push(name);
        }
    }
    sources.sort();

    if let Some(designated) = sources.iter().find(|n| n.ends_with(&config.entry_suffix)) {
        return Ok(dir.join(designated));
    }

    match sources.as_slice() {
        [only] => Ok(dir.join(only)),
        _ => Err(EntryError::AmbiguousEntryPoint {
            dir: dir.to_path_buf(),
            candidates: sources,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn job_with(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for f in files {
            std::fs::write(dir.path().join(f), "").unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn single_source_file_is_entry() {
        let dir = job_with(&["train.py", "README.md", "data.csv"]);
        let entry = resolve_entry_point(dir.path(), &EntryConfig::default())
            .await
            .unwrap();
        assert_eq!(entry, dir.path().join("train.py"));
    }

    #[tokio::test]
    async fn designated_suffix_wins() {
        let dir = job_with(&["model.py", "utils.py", "xprun.py"]);
        let entry = resolve_entry_point(dir.path(), &EntryConfig::default())
            .await
            .unwrap();
        assert_eq!(entry, dir.path().join("xprun.py"));
    }

    #[tokio::test]
    async fn two_plain_sources_are_ambiguous() {
        let dir = job_with(&["a.py", "b.py"]);
        let err = resolve_entry_point(dir.path(), &EntryConfig::default())
            .await
            .unwrap_err();
        match err {
            EntryError::AmbiguousEntryPoint { candidates, .. } => {
                assert_eq!(candidates, vec!["a.py".to_string(), "b.py".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn no_sources_is_ambiguous() {
        let dir = job_with(&["notes.txt"]);
        let err = resolve_entry_point(dir.path(), &EntryConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EntryError::AmbiguousEntryPoint { ref candidates, .. } if candidates.is_empty()
        ));
    }

    #[tokio::test]
    async fn nested_sources_are_ignored() {
        let dir = job_with(&["main.py"]);
        std::fs::create_dir(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib/helper.py"), "").unwrap();
        std::fs::create_dir(dir.path().join("pkg.py")).unwrap();

        let entry = resolve_entry_point(dir.path(), &EntryConfig::default())
            .await
            .unwrap();
        assert_eq!(entry, dir.path().join("main.py"));
    }

    #[tokio::test]
    async fn custom_extension() {
        let dir = job_with(&["job.sh", "other.py"]);
        let config = EntryConfig {
            extension: "sh".into(),
            entry_suffix: "run.sh".into(),
            interpreter: "sh".into(),
            ..Default::default()
        };
        let entry = resolve_entry_point(dir.path(), &config).await.unwrap();
        assert_eq!(entry, dir.path().join("job.sh"));
    }
}
