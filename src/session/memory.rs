//! In-process session store.
//!
//! Keeps states in a map behind an `RwLock`. Used by tests and by callers
//! embedding the coordinator without touching the filesystem (artifact
//! directories still resolve under `artifacts_root`).

use super::{PruneReport, SessionStore, SessionSummary, session_id, unique_id};
use crate::errors::StoreError;
use crate::orchestrator::state::WorkflowState;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, WorkflowState>>,
    artifacts_root: PathBuf,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("conductor-artifacts"))
    }
}

impl MemorySessionStore {
    pub fn new(artifacts_root: impl Into<PathBuf>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            artifacts_root: artifacts_root.into(),
        }
    }

    fn poisoned(session_id: &str) -> StoreError {
        StoreError::io(
            session_id,
            std::io::Error::other("session map lock poisoned"),
        )
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self, task_id: &str) -> Result<String, StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| Self::poisoned(task_id))?;
        let id = unique_id(session_id(task_id, Utc::now()), |candidate| {
            sessions.contains_key(candidate)
        });
        sessions.insert(id.clone(), WorkflowState::new(id.clone(), task_id.to_string()));
        Ok(id)
    }

    fn save(&self, state: &WorkflowState) -> Result<(), StoreError> {
        self.sessions
            .write()
            .map_err(|_| Self::poisoned(&state.session_id))?
            .insert(state.session_id.clone(), state.clone());
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<WorkflowState, StoreError> {
        self.sessions
            .read()
            .map_err(|_| Self::poisoned(session_id))?
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }

    fn latest(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .sessions
            .read()
            .map_err(|_| Self::poisoned("latest"))?
            .values()
            .max_by_key(|s| s.updated_at)
            .map(|s| s.session_id.clone()))
    }

    fn prune(&self, max_age_days: u32) -> Result<PruneReport, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(max_age_days));
        let mut sessions = self.sessions.write().map_err(|_| Self::poisoned("prune"))?;
        let mut removed: Vec<String> = sessions
            .values()
            .filter(|s| s.updated_at < cutoff)
            .map(|s| s.session_id.clone())
            .collect();
        removed.sort();

        let mut report = PruneReport::default();
        for id in removed {
            sessions.remove(&id);
            let dir = self.artifact_dir(&id);
            if dir.is_dir() && std::fs::remove_dir_all(&dir).is_ok() {
                report.removed_artifact_dirs += 1;
            }
            report.removed_sessions.push(id);
        }
        Ok(report)
    }

    fn list(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let mut list: Vec<SessionSummary> = self
            .sessions
            .read()
            .map_err(|_| Self::poisoned("list"))?
            .values()
            .map(SessionSummary::from)
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    fn artifact_dir(&self, session_id: &str) -> PathBuf {
        self.artifacts_root.join(session_id)
    }
}
