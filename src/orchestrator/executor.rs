//! External phase executors.
//!
//! An executor runs one phase and reports how it ended. Success is decided
//! by exit status alone; stdout and stderr are captured verbatim for the
//! session record and never parsed.

use crate::errors::{ErrorKind, PhaseError};
use crate::orchestrator::state::PhaseOutcome;
use crate::phase::PhaseDescriptor;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Per-invocation inputs handed to an executor.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub session_id: String,
    pub task_id: String,
    /// Positional argument: task id or project path, per the phase.
    pub argument: String,
    pub project_path: Option<String>,
    /// Session-scoped directory the executor writes artifacts into.
    pub artifact_dir: PathBuf,
    pub timeout: Duration,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    /// `None` on success.
    pub failure: Option<ErrorKind>,
    pub message: Option<String>,
}

impl ExecutionReport {
    pub fn success(duration: Duration) -> Self {
        Self {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            duration,
            failure: None,
            message: None,
        }
    }

    pub fn from_error(err: &PhaseError, duration: Duration) -> Self {
        let exit_code = match err {
            PhaseError::ExecutionFailure { exit_code, .. } => *exit_code,
            _ => None,
        };
        Self {
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            duration,
            failure: Some(err.kind()),
            message: Some(err.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn into_outcome(self) -> PhaseOutcome {
        let outcome = match self.failure {
            None => PhaseOutcome::succeeded(self.duration),
            Some(kind) => PhaseOutcome::failed(
                kind,
                self.message.unwrap_or_else(|| kind.to_string()),
                self.duration,
            ),
        };
        outcome
            .with_output(self.stdout, self.stderr)
            .with_exit_code(self.exit_code)
    }
}

#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    async fn invoke(&self, phase: &PhaseDescriptor, invocation: &Invocation) -> ExecutionReport;
}

/// Runs each phase as `<program> <workflows_dir>/<executor> <argument>`.
pub struct ProcessExecutor {
    program: String,
    workflows_dir: PathBuf,
    working_dir: PathBuf,
}

impl ProcessExecutor {
    pub fn new(
        program: impl Into<String>,
        workflows_dir: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            workflows_dir: workflows_dir.into(),
            working_dir: working_dir.into(),
        }
    }

    pub fn script_path(&self, phase: &PhaseDescriptor) -> PathBuf {
        self.workflows_dir.join(&phase.executor)
    }
}

#[async_trait]
impl PhaseExecutor for ProcessExecutor {
    async fn invoke(&self, phase: &PhaseDescriptor, invocation: &Invocation) -> ExecutionReport {
        let started = Instant::now();
        let script = self.script_path(phase);
        debug!(
            ordinal = phase.ordinal,
            program = %self.program,
            script = %script.display(),
            attempt = invocation.attempt,
            "Spawning phase executor"
        );

        let child = Command::new(&self.program)
            .arg(&script)
            .arg(&invocation.argument)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("CONDUCTOR_SESSION_ID", &invocation.session_id)
            .env("CONDUCTOR_TASK_ID", &invocation.task_id)
            .env("CONDUCTOR_PHASE", phase.ordinal.to_string())
            .env("CONDUCTOR_ARTIFACT_DIR", &invocation.artifact_dir)
            .env(
                "CONDUCTOR_PROJECT_PATH",
                invocation.project_path.as_deref().unwrap_or(""),
            )
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(source) => {
                let err = PhaseError::Spawn {
                    ordinal: phase.ordinal,
                    source,
                };
                warn!(ordinal = phase.ordinal, error = %err, "Failed to spawn executor");
                return ExecutionReport::from_error(&err, started.elapsed());
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match timeout(invocation.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                let err = PhaseError::ExecutionFailure {
                    ordinal: phase.ordinal,
                    exit_code: None,
                    message: format!("Failed to wait for executor: {e}"),
                };
                return ExecutionReport::from_error(&err, started.elapsed());
            }
            Err(_) => {
                let err = PhaseError::Timeout {
                    ordinal: phase.ordinal,
                    timeout_secs: invocation.timeout.as_secs(),
                };
                warn!(ordinal = phase.ordinal, error = %err, "Phase executor timed out");
                return ExecutionReport::from_error(&err, started.elapsed());
            }
        };

        let duration = started.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        let mut report = if output.status.success() {
            ExecutionReport::success(duration)
        } else {
            let message = match stderr.trim() {
                "" => "executor reported failure".to_string(),
                tail => tail.lines().last().unwrap_or(tail).to_string(),
            };
            ExecutionReport::from_error(
                &PhaseError::ExecutionFailure {
                    ordinal: phase.ordinal,
                    exit_code: output.status.code(),
                    message,
                },
                duration,
            )
        };
        report.stdout = stdout;
        report.stderr = stderr;
        report
    }
}
