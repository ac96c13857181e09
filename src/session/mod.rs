//! Session persistence.
//!
//! A session is one `WorkflowState`, keyed by its session id and rewritten
//! in full on every save. Stores assume a single writer per session id:
//! two coordinators driving the same session concurrently can lose each
//! other's updates.

pub mod file;
pub mod memory;

pub use file::FileSessionStore;
pub use memory::MemorySessionStore;

use crate::errors::StoreError;
use crate::orchestrator::state::{WorkflowState, WorkflowStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Listing entry for a persisted session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub task_id: String,
    pub status: WorkflowStatus,
    pub current_phase: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&WorkflowState> for SessionSummary {
    fn from(state: &WorkflowState) -> Self {
        Self {
            session_id: state.session_id.clone(),
            task_id: state.task_id.clone(),
            status: state.status,
            current_phase: state.current_phase,
            created_at: state.created_at,
            updated_at: state.updated_at,
        }
    }
}

/// What a prune removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PruneReport {
    pub removed_sessions: Vec<String>,
    pub removed_artifact_dirs: usize,
}

pub trait SessionStore: Send + Sync {
    /// Reserve a new session id for `task_id` and persist an empty state.
    fn create(&self, task_id: &str) -> Result<String, StoreError>;

    /// Overwrite the persisted state for `state.session_id`.
    fn save(&self, state: &WorkflowState) -> Result<(), StoreError>;

    fn load(&self, session_id: &str) -> Result<WorkflowState, StoreError>;

    /// Most recently modified session, if any.
    fn latest(&self) -> Result<Option<String>, StoreError>;

    /// Delete sessions (and their artifacts) not modified for `max_age_days`.
    fn prune(&self, max_age_days: u32) -> Result<PruneReport, StoreError>;

    /// All sessions, newest first.
    fn list(&self) -> Result<Vec<SessionSummary>, StoreError>;

    /// Directory where executors of this session write artifacts.
    fn artifact_dir(&self, session_id: &str) -> PathBuf;
}

/// Session id for `task_id` created at `now`: `<task>_<YYYYmmdd_HHMMSS_mmm>`.
pub fn session_id(task_id: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}_{}",
        sanitize_task_id(task_id),
        now.format("%Y%m%d_%H%M%S_%3f")
    )
}

/// First id derived from `base` for which `taken` is false.
pub(crate) fn unique_id(base: String, taken: impl Fn(&str) -> bool) -> String {
    if !taken(&base) {
        return base;
    }
    (2..)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or(base)
}

fn sanitize_task_id(task_id: &str) -> String {
    let cleaned: String = task_id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "task".to_string()
    } else {
        cleaned
    }
}
