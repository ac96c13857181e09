//! Artifact discovery and content-addressed handles.
//!
//! Phase executors write outputs into a session-scoped directory. After a
//! phase succeeds, each declared output with an artifact pattern is
//! resolved to the most recently modified match in that directory and
//! recorded as an `ArtifactHandle`.

use crate::phase::PhaseDescriptor;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// A recorded output file produced by a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHandle {
    pub output: String,
    pub phase: u32,
    pub path: PathBuf,
    pub sha256: String,
}

impl ArtifactHandle {
    /// Whether the recorded file is still on disk.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}

/// Glob for `pattern` under `dir`. Metacharacters in `dir` match literally.
pub(crate) fn glob_under(dir: &Path, pattern: &str) -> String {
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    format!("{}/{}", escaped.trim_end_matches('/'), pattern)
}

/// Most recently modified file in `dir` matching `pattern`.
pub fn find_latest(dir: &Path, pattern: &str) -> Result<Option<PathBuf>> {
    let full = glob_under(dir, pattern);
    let mut newest: Option<(SystemTime, PathBuf)> = None;

    for entry in glob::glob(&full).with_context(|| format!("Invalid artifact pattern: {pattern}"))? {
        let Ok(path) = entry else { continue };
        if !path.is_file() {
            continue;
        }
        let modified = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if newest.as_ref().is_none_or(|(t, _)| modified >= *t) {
            newest = Some((modified, path));
        }
    }

    Ok(newest.map(|(_, path)| path))
}

/// Hex-encoded SHA-256 of a file's contents.
pub fn hash_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read artifact: {}", path.display()))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Resolve every patterned output of `phase` inside `dir`.
///
/// Outputs whose pattern has no match are skipped; input validation of the
/// downstream phase reports them.
pub fn collect(phase: &PhaseDescriptor, dir: &Path) -> Result<Vec<ArtifactHandle>> {
    let mut handles = Vec::new();
    for (output, pattern) in &phase.artifacts {
        let Some(path) = find_latest(dir, pattern)? else {
            debug!(ordinal = phase.ordinal, %output, %pattern, "no artifact matched");
            continue;
        };
        let sha256 = hash_file(&path)?;
        handles.push(ArtifactHandle {
            output: output.clone(),
            phase: phase.ordinal,
            path,
            sha256,
        });
    }
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_find_latest_picks_newest_match() {
        let dir = tempdir().unwrap();
        let older = dir.path().join("phase2_analysis_a.json");
        let newer = dir.path().join("phase2_analysis_b.json");
        std::fs::write(&older, "{}").unwrap();
        std::fs::write(&newer, "{}").unwrap();
        File::options()
            .write(true)
            .open(&older)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(60))
            .unwrap();

        let found = find_latest(dir.path(), "phase2_analysis_*.json").unwrap();
        assert_eq!(found, Some(newer));
    }

    #[test]
    fn test_find_latest_in_directory_with_glob_characters() {
        let root = tempdir().unwrap();
        let dir = root.path().join("proj[1]");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("agent_issue_1.json"), "{}").unwrap();

        let found = find_latest(&dir, "agent_issue_*.json").unwrap();
        assert_eq!(found, Some(dir.join("agent_issue_1.json")));
    }

    #[test]
    fn test_collect_in_directory_with_glob_characters() {
        let root = tempdir().unwrap();
        let dir = root.path().join("run*?");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("agent_issue_9.json"), "{}").unwrap();
        let phase = PhaseDescriptor::new(1, "Discover", "d.sh")
            .with_outputs(&["issue_data"])
            .with_artifact("issue_data", "agent_issue_*.json");

        let handles = collect(&phase, &dir).unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].path, dir.join("agent_issue_9.json"));
    }

    #[test]
    fn test_find_latest_no_match() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("other.json"), "{}").unwrap();
        assert_eq!(find_latest(dir.path(), "phase2_*.json").unwrap(), None);
    }

    #[test]
    fn test_hash_file_is_sha256_hex() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "abc").unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_collect_records_patterned_outputs_only() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("agent_issue_42.json"), r#"{"issue_data":{}}"#).unwrap();
        let phase = PhaseDescriptor::new(1, "Discover", "d.sh")
            .with_outputs(&["issue_data", "project_path"])
            .with_artifact("issue_data", "agent_issue_*.json");

        let handles = collect(&phase, dir.path()).unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].output, "issue_data");
        assert_eq!(handles[0].phase, 1);
        assert!(handles[0].exists());
        assert_eq!(handles[0].sha256.len(), 64);
    }

    #[test]
    fn test_collect_skips_missing() {
        let dir = tempdir().unwrap();
        let phase = PhaseDescriptor::new(2, "Analyse", "a.sh")
            .with_outputs(&["project_analysis"])
            .with_artifact("project_analysis", "phase2_analysis_*.json");
        assert!(collect(&phase, dir.path()).unwrap().is_empty());
    }
}
