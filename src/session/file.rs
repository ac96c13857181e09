//! JSON-file session store.
//!
//! Layout:
//! - `<sessions_dir>/<session_id>.json` - the full `WorkflowState`
//! - `<sessions_dir>/<session_id>.lock` - held while the file is replaced
//! - `<artifacts_dir>/<session_id>/` - files written by phase executors

use super::{PruneReport, SessionStore, SessionSummary, session_id, unique_id};
use crate::errors::StoreError;
use crate::orchestrator::state::WorkflowState;
use chrono::Utc;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

pub struct FileSessionStore {
    sessions_dir: PathBuf,
    artifacts_dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(sessions_dir: impl Into<PathBuf>, artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
            artifacts_dir: artifacts_dir.into(),
        }
    }

    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{session_id}.json"))
    }

    fn lock_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{session_id}.lock"))
    }

    fn ensure_dir(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.sessions_dir).map_err(|e| StoreError::io(&self.sessions_dir, e))
    }

    /// Session files with their modification times.
    fn session_files(&self) -> Result<Vec<(String, PathBuf, SystemTime)>, StoreError> {
        if !self.sessions_dir.exists() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(&self.sessions_dir).map_err(|e| StoreError::io(&self.sessions_dir, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.sessions_dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .map_err(|e| StoreError::io(&path, e))?;
            files.push((id, path, modified));
        }
        Ok(files)
    }

    fn write_locked(&self, path: &Path, lock_path: &Path, content: &[u8]) -> Result<(), StoreError> {
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(lock_path)
            .map_err(|e| StoreError::Lock {
                path: lock_path.to_path_buf(),
                source: e,
            })?;
        lock.lock_exclusive().map_err(|e| StoreError::Lock {
            path: lock_path.to_path_buf(),
            source: e,
        })?;

        let tmp = path.with_extension("json.tmp");
        let result = (|| {
            let mut file = File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
            file.write_all(content).map_err(|e| StoreError::io(&tmp, e))?;
            file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
            fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        let _ = FileExt::unlock(&lock);
        result
    }
}

impl SessionStore for FileSessionStore {
    fn create(&self, task_id: &str) -> Result<String, StoreError> {
        self.ensure_dir()?;
        let id = unique_id(session_id(task_id, Utc::now()), |candidate| {
            self.session_path(candidate).exists()
        });
        self.save(&WorkflowState::new(id.clone(), task_id.to_string()))?;
        info!(session_id = %id, task_id, "Created session");
        Ok(id)
    }

    fn save(&self, state: &WorkflowState) -> Result<(), StoreError> {
        self.ensure_dir()?;
        let path = self.session_path(&state.session_id);
        let content = serde_json::to_vec_pretty(state).map_err(|e| StoreError::Serialization {
            path: path.clone(),
            source: e,
        })?;
        self.write_locked(&path, &self.lock_path(&state.session_id), &content)?;
        debug!(session_id = %state.session_id, current_phase = state.current_phase, "Saved session");
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<WorkflowState, StoreError> {
        let path = self.session_path(session_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(session_id.to_string()));
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        serde_json::from_str(&content).map_err(|e| StoreError::Serialization { path, source: e })
    }

    fn latest(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .session_files()?
            .into_iter()
            .max_by_key(|(_, _, modified)| *modified)
            .map(|(id, _, _)| id))
    }

    fn prune(&self, max_age_days: u32) -> Result<PruneReport, StoreError> {
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(u64::from(max_age_days) * 86_400))
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut report = PruneReport::default();

        for (id, path, modified) in self.session_files()? {
            if modified >= cutoff {
                continue;
            }
            fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
            let lock = self.lock_path(&id);
            if lock.exists() {
                fs::remove_file(&lock).map_err(|e| StoreError::io(&lock, e))?;
            }
            let artifacts = self.artifact_dir(&id);
            if artifacts.is_dir() {
                fs::remove_dir_all(&artifacts).map_err(|e| StoreError::io(&artifacts, e))?;
                report.removed_artifact_dirs += 1;
            }
            report.removed_sessions.push(id);
        }

        if !report.removed_sessions.is_empty() {
            info!(
                removed = report.removed_sessions.len(),
                max_age_days, "Pruned old sessions"
            );
        }
        Ok(report)
    }

    fn list(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let mut summaries = Vec::new();
        for (id, path, _) in self.session_files()? {
            match self.load(&id) {
                Ok(state) => summaries.push(SessionSummary::from(&state)),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable session file"),
            }
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    fn artifact_dir(&self, session_id: &str) -> PathBuf {
        self.artifacts_dir.join(session_id)
    }
}
