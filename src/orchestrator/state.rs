//! Persistent per-session workflow state.
//!
//! `WorkflowState` is the single record a session store persists. It is
//! mutated only by the coordinator, after every phase attempt and every
//! quality-gate evaluation.

use crate::artifacts::ArtifactHandle;
use crate::errors::ErrorKind;
use crate::gates::QualityGateResult;
use crate::phase::TASK_ID_KEY;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Created,
    Running,
    Completed,
    Failed,
    /// An unexpected error escaped the phase loop.
    Exception,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Exception)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Created => write!(f, "created"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
            WorkflowStatus::Exception => write!(f, "exception"),
        }
    }
}

/// Final result of one phase invocation (the last attempt wins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub success: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Invocations made, including the original one.
    #[serde(default = "one")]
    pub attempts: u32,
    pub finished_at: DateTime<Utc>,
}

fn one() -> u32 {
    1
}

impl PhaseOutcome {
    pub fn succeeded(duration: Duration) -> Self {
        Self {
            success: true,
            stdout: String::new(),
            stderr: String::new(),
            duration,
            error: None,
            error_kind: None,
            exit_code: Some(0),
            attempts: 1,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(kind: ErrorKind, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            duration,
            error: Some(error.into()),
            error_kind: Some(kind),
            exit_code: None,
            attempts: 1,
            finished_at: Utc::now(),
        }
    }

    pub fn with_output(mut self, stdout: String, stderr: String) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }
}

/// Append-only error log entry. `phase` is `None` for session-level errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub phase: Option<u32>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub session_id: String,
    pub task_id: String,
    #[serde(default)]
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// 0 before any phase has been attempted. Never decreases.
    #[serde(default)]
    pub current_phase: u32,
    #[serde(default)]
    pub outcomes: BTreeMap<u32, PhaseOutcome>,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    #[serde(default)]
    pub quality_gates: BTreeMap<u32, QualityGateResult>,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    #[serde(default)]
    pub artifacts: BTreeMap<String, ArtifactHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<u32>,
}

impl WorkflowState {
    pub fn new(session_id: String, task_id: String) -> Self {
        let now = Utc::now();
        let mut context = BTreeMap::new();
        context.insert(TASK_ID_KEY.to_string(), Value::String(task_id.clone()));
        Self {
            session_id,
            task_id,
            status: WorkflowStatus::Created,
            created_at: now,
            updated_at: now,
            ended_at: None,
            current_phase: 0,
            outcomes: BTreeMap::new(),
            errors: Vec::new(),
            quality_gates: BTreeMap::new(),
            context,
            artifacts: BTreeMap::new(),
            failed_phase: None,
        }
    }

    /// String value of a context key, if present and a non-empty string.
    pub fn context_str(&self, key: &str) -> Option<&str> {
        match self.context.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    /// Merge caller-supplied context; existing keys are overwritten.
    pub fn merge_context(&mut self, extra: &BTreeMap<String, Value>) {
        for (key, value) in extra {
            self.context.insert(key.clone(), value.clone());
        }
    }

    /// Store the outcome of an attempt and advance the current ordinal.
    pub fn record_outcome(&mut self, ordinal: u32, outcome: PhaseOutcome) {
        self.current_phase = self.current_phase.max(ordinal);
        self.outcomes.insert(ordinal, outcome);
        self.touch();
    }

    pub fn record_quality(&mut self, result: QualityGateResult) {
        self.quality_gates.insert(result.ordinal, result);
        self.touch();
    }

    pub fn record_error(&mut self, phase: Option<u32>, message: impl Into<String>) {
        self.errors.push(ErrorRecord {
            phase,
            message: message.into(),
            timestamp: Utc::now(),
        });
        self.touch();
    }

    pub fn set_status(&mut self, status: WorkflowStatus) {
        self.status = status;
        if status.is_terminal() {
            self.ended_at = Some(Utc::now());
        } else {
            self.ended_at = None;
        }
        self.touch();
    }

    pub fn succeeded(&self, ordinal: u32) -> bool {
        self.outcomes.get(&ordinal).is_some_and(|o| o.success)
    }

    /// Ordinal a resume starts from: one past the highest successful phase.
    pub fn resume_point(&self) -> u32 {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.success)
            .map(|(ordinal, _)| *ordinal)
            .max()
            .map_or(1, |max| max + 1)
    }

    pub fn successful_phases(&self) -> usize {
        self.outcomes.values().filter(|o| o.success).count()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Durations are stored losslessly as `{secs, nanos}`. Plain integers are
/// read as milliseconds so older session files still load.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Stored {
        Exact(Duration),
        Millis(u64),
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Stored::deserialize(deserializer)? {
            Stored::Exact(duration) => duration,
            Stored::Millis(millis) => Duration::from_millis(millis),
        })
    }
}
