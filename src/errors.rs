//! Typed error hierarchy for the conductor.
//!
//! Three top-level enums cover the three subsystems:
//! - `PhaseError` - failures of a single phase attempt
//! - `StoreError` - session persistence failures
//! - `WorkflowError` - coordinator-level failures surfaced to callers
//!
//! `ErrorKind` is the serializable classification recorded on failed
//! outcomes and workflow results.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Classification of a failure, persisted alongside outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A required dependency is missing or has not succeeded. Never retried.
    InputValidation,
    /// The external executor exited non-zero or could not be spawned.
    ExecutionFailure,
    /// The external executor exceeded its time budget.
    Timeout,
    /// Anything else, e.g. an I/O failure in the session store.
    UnexpectedException,
}

impl ErrorKind {
    /// Whether the recovery manager may retry a failure of this kind.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::ExecutionFailure | Self::Timeout)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::InputValidation => write!(f, "input_validation"),
            ErrorKind::ExecutionFailure => write!(f, "execution_failure"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::UnexpectedException => write!(f, "unexpected_exception"),
        }
    }
}

/// Errors from a single phase attempt.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("Phase {ordinal} input validation failed: missing {missing:?}")]
    InputValidation { ordinal: u32, missing: Vec<String> },

    #[error("Phase {ordinal} executor exited with code {exit_code:?}: {message}")]
    ExecutionFailure {
        ordinal: u32,
        exit_code: Option<i32>,
        message: String,
    },

    #[error("Phase {ordinal} timed out after {timeout_secs} seconds")]
    Timeout { ordinal: u32, timeout_secs: u64 },

    #[error("Failed to spawn executor for phase {ordinal}: {source}")]
    Spawn {
        ordinal: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Phase {ordinal} recovery exhausted after {attempts} attempts: {last_error}")]
    RecoveryExhausted {
        ordinal: u32,
        attempts: u32,
        last_error: String,
    },
}

impl PhaseError {
    /// Classification recorded on the phase outcome.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PhaseError::InputValidation { .. } => ErrorKind::InputValidation,
            PhaseError::ExecutionFailure { .. }
            | PhaseError::Spawn { .. }
            | PhaseError::RecoveryExhausted { .. } => ErrorKind::ExecutionFailure,
            PhaseError::Timeout { .. } => ErrorKind::Timeout,
        }
    }
}

/// Errors from the session store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session {0} not found")]
    NotFound(String),

    #[error("Session store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to (de)serialize session file {path}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to lock session file {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors surfaced by the workflow coordinator.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Session {0} not found")]
    SessionNotFound(String),

    #[error("Invalid phase range {start}..={end} (pipeline has {phases} phases)")]
    InvalidRange { start: u32, end: u32, phases: u32 },

    #[error("Unknown phase ordinal {0}")]
    UnknownPhase(u32),

    #[error("No sessions found")]
    NoSessions,

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => WorkflowError::SessionNotFound(id),
            other => WorkflowError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_retryable_only_for_execution_and_timeout() {
        assert!(ErrorKind::ExecutionFailure.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::InputValidation.is_retryable());
        assert!(!ErrorKind::UnexpectedException.is_retryable());
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::InputValidation).unwrap();
        assert_eq!(json, "\"input_validation\"");
        let parsed: ErrorKind = serde_json::from_str("\"timeout\"").unwrap();
        assert_eq!(parsed, ErrorKind::Timeout);
        assert_eq!(ErrorKind::UnexpectedException.to_string(), "unexpected_exception");
    }

    #[test]
    fn test_phase_error_input_validation_lists_missing() {
        let err = PhaseError::InputValidation {
            ordinal: 2,
            missing: vec!["issue_data".into()],
        };
        assert_eq!(err.kind(), ErrorKind::InputValidation);
        assert!(err.to_string().contains("issue_data"));
    }

    #[test]
    fn test_phase_error_timeout_is_classified_as_timeout() {
        let err = PhaseError::Timeout {
            ordinal: 3,
            timeout_secs: 1800,
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().contains("1800"));
    }

    #[test]
    fn test_phase_error_spawn_is_execution_failure() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "python not found");
        let err = PhaseError::Spawn {
            ordinal: 1,
            source: io_err,
        };
        assert_eq!(err.kind(), ErrorKind::ExecutionFailure);
    }

    #[test]
    fn test_store_not_found_converts_to_session_not_found() {
        let err: WorkflowError = StoreError::NotFound("T-1_20260101".into()).into();
        match err {
            WorkflowError::SessionNotFound(id) => assert_eq!(id, "T-1_20260101"),
            other => panic!("Expected SessionNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_store_io_converts_to_store_variant() {
        let err: WorkflowError = StoreError::io(
            "/tmp/x.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        )
        .into();
        assert!(matches!(err, WorkflowError::Store(StoreError::Io { .. })));
    }

    #[test]
    fn test_all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&PhaseError::Timeout {
            ordinal: 1,
            timeout_secs: 1,
        });
        assert_std_error(&StoreError::NotFound("x".into()));
        assert_std_error(&WorkflowError::UnknownPhase(9));
    }
}
