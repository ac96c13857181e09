//! Workflow coordinator: sequences phases, validates their inputs, runs
//! them through the executor (with recovery), evaluates quality gates and
//! persists the session after every mutation.
//!
//! The coordinator holds no session state of its own. Every operation
//! loads or receives a `WorkflowState` and hands it back through the store,
//! so one coordinator can serve several sessions.

use crate::artifacts;
use crate::errors::{ErrorKind, WorkflowError};
use crate::gates::{QualityGateEvaluator, QualitySummary};
use crate::orchestrator::executor::{Invocation, PhaseExecutor};
use crate::orchestrator::recovery::RecoveryManager;
use crate::orchestrator::state::{PhaseOutcome, WorkflowState, WorkflowStatus};
use crate::phase::{
    PROJECT_PATH_KEY, PhaseArgument, PhaseDescriptor, PhaseRegistry, TASK_ID_KEY,
    is_well_known_input,
};
use crate::session::SessionStore;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

/// Knobs the coordinator runs with, resolved from configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub auto_recovery: bool,
    /// Used as `project_path` when the caller does not supply one.
    pub project_dir: PathBuf,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(30 * 60),
            auto_recovery: true,
            project_dir: PathBuf::from("."),
        }
    }
}

/// How to pick a failed session back up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryHint {
    pub session_id: String,
    pub from_ordinal: u32,
    pub command: String,
}

impl RecoveryHint {
    fn new(session_id: &str, from_ordinal: u32) -> Self {
        Self {
            session_id: session_id.to_string(),
            from_ordinal,
            command: format!("conductor resume {session_id} {from_ordinal}"),
        }
    }
}

/// Terminal summary of `execute` / `resume`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub status: WorkflowStatus,
    pub session_id: String,
    pub task_id: String,
    pub phases_completed: usize,
    pub total_phases: u32,
    pub total_duration_secs: f64,
    pub quality_summary: QualitySummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryHint>,
}

impl WorkflowResult {
    pub fn is_success(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }
}

/// Result of running a contiguous ordinal sub-range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialResult {
    pub session_id: String,
    pub start: u32,
    pub end: u32,
    pub success: bool,
    pub status: WorkflowStatus,
    /// Ordinals that succeeded during this call.
    pub completed: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub duration_secs: f64,
}

/// Snapshot of a persisted session for `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub session_id: String,
    pub task_id: String,
    pub status: WorkflowStatus,
    pub current_phase: u32,
    pub phases_completed: usize,
    pub total_phases: u32,
    pub resume_point: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub quality_summary: QualitySummary,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub next_steps: Vec<String>,
}

pub struct WorkflowCoordinator<E, S> {
    registry: PhaseRegistry,
    executor: E,
    store: S,
    evaluator: QualityGateEvaluator,
    settings: CoordinatorSettings,
}

impl<E: PhaseExecutor, S: SessionStore> WorkflowCoordinator<E, S> {
    pub fn new(registry: PhaseRegistry, executor: E, store: S, settings: CoordinatorSettings) -> Self {
        Self {
            registry,
            executor,
            store,
            evaluator: QualityGateEvaluator::default(),
            settings,
        }
    }

    pub fn with_evaluator(mut self, evaluator: QualityGateEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn registry(&self) -> &PhaseRegistry {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Start a new session for `task_id` and run every phase.
    pub async fn execute(
        &self,
        task_id: &str,
        context: BTreeMap<String, Value>,
    ) -> Result<WorkflowResult, WorkflowError> {
        let started = Instant::now();
        let mut state = self.open_session(task_id, &context)?;
        let span = info_span!("workflow", run_id = %Uuid::new_v4(), session_id = %state.session_id);

        let result = async {
            info!(task_id, phases = self.registry.len(), "Starting workflow");
            let end = self.registry.len();
            let outcome = self.execute_range(&mut state, 1, end).await;
            self.finish(&mut state, outcome.map(|_| ()), started)
        }
        .instrument(span)
        .await;
        Ok(result)
    }

    /// Continue a persisted session from `from` (or its resume point).
    pub async fn resume(
        &self,
        session_id: &str,
        from: Option<u32>,
    ) -> Result<WorkflowResult, WorkflowError> {
        let started = Instant::now();
        let mut state = self.store.load(session_id)?;
        let from = from.unwrap_or_else(|| self.resume_point(&state));
        let end = self.registry.len();
        if from != end + 1 {
            self.check_range(from, end)?;
        }
        let span = info_span!("workflow", run_id = %Uuid::new_v4(), session_id = %session_id);

        let result = async {
            info!(from, "Resuming workflow");
            let outcome = if from > end {
                self.settle(&mut state)
            } else {
                self.execute_range(&mut state, from, end).await.map(|_| ())
            };
            self.finish(&mut state, outcome, started)
        }
        .instrument(span)
        .await;
        Ok(result)
    }

    /// Run phases `start..=end` against a new session, or an existing one
    /// when `session_id` is given.
    pub async fn run_phases(
        &self,
        session_id: Option<&str>,
        task_id: &str,
        start: u32,
        end: u32,
        context: BTreeMap<String, Value>,
    ) -> Result<PartialResult, WorkflowError> {
        self.check_range(start, end)?;
        let mut state = match session_id {
            Some(id) => {
                let mut state = self.store.load(id)?;
                state.merge_context(&context);
                state
            }
            None => self.open_session(task_id, &context)?,
        };
        let started = Instant::now();
        let span = info_span!("workflow", run_id = %Uuid::new_v4(), session_id = %state.session_id);

        let partial = async {
            match self.execute_range(&mut state, start, end).await {
                Ok(partial) => partial,
                Err(err) => {
                    let result = self.finish(&mut state, Err(err), started);
                    PartialResult {
                        session_id: result.session_id,
                        start,
                        end,
                        success: false,
                        status: result.status,
                        completed: Vec::new(),
                        failed_phase: result.failed_phase,
                        error: result.error,
                        error_kind: result.error_kind,
                        duration_secs: started.elapsed().as_secs_f64(),
                    }
                }
            }
        }
        .instrument(span)
        .await;
        Ok(partial)
    }

    /// Run a contiguous range of phases, stopping at the first failure.
    ///
    /// Phase failures are reported in the `PartialResult`; `Err` means the
    /// range was invalid or the session could not be persisted.
    pub async fn execute_range(
        &self,
        state: &mut WorkflowState,
        start: u32,
        end: u32,
    ) -> Result<PartialResult, WorkflowError> {
        self.check_range(start, end)?;
        let started = Instant::now();

        state.failed_phase = None;
        state.set_status(WorkflowStatus::Running);
        self.store.save(state)?;

        let mut completed = Vec::new();
        let mut failure: Option<(u32, PhaseOutcome)> = None;

        for phase in self.registry.range(start, end) {
            let outcome = self.run_phase(state, phase).await?;
            if outcome.success {
                completed.push(phase.ordinal);
            } else {
                failure = Some((phase.ordinal, outcome));
                break;
            }
        }

        let (failed_phase, error, error_kind) = match failure {
            Some((ordinal, outcome)) => {
                state.failed_phase = Some(ordinal);
                state.set_status(WorkflowStatus::Failed);
                self.store.save(state)?;
                (Some(ordinal), outcome.error, outcome.error_kind)
            }
            None => {
                self.settle(state)?;
                (None, None, None)
            }
        };

        Ok(PartialResult {
            session_id: state.session_id.clone(),
            start,
            end,
            success: failed_phase.is_none(),
            status: state.status,
            completed,
            failed_phase,
            error,
            error_kind,
            duration_secs: started.elapsed().as_secs_f64(),
        })
    }

    /// Report on `session_id`, or on the most recently modified session.
    pub fn status(&self, session_id: Option<&str>) -> Result<StatusReport, WorkflowError> {
        let session_id = match session_id {
            Some(id) => id.to_string(),
            None => self.store.latest()?.ok_or(WorkflowError::NoSessions)?,
        };
        let state = self.store.load(&session_id)?;
        let resume_point = self.resume_point(&state);

        Ok(StatusReport {
            next_steps: self.next_steps(&state, resume_point),
            session_id: state.session_id.clone(),
            task_id: state.task_id.clone(),
            status: state.status,
            current_phase: state.current_phase,
            phases_completed: state.successful_phases(),
            total_phases: self.registry.len(),
            resume_point,
            failed_phase: state.failed_phase,
            last_error: state.errors.last().map(|e| e.message.clone()),
            quality_summary: QualitySummary::from_gates(&state.quality_gates),
            created_at: state.created_at,
            updated_at: state.updated_at,
        })
    }

    /// One past the highest successful ordinal, or 1.
    pub fn resume_point(&self, state: &WorkflowState) -> u32 {
        state.resume_point()
    }

    fn check_range(&self, start: u32, end: u32) -> Result<(), WorkflowError> {
        let phases = self.registry.len();
        if start == 0 || start > end || end > phases {
            return Err(WorkflowError::InvalidRange { start, end, phases });
        }
        Ok(())
    }

    fn open_session(
        &self,
        task_id: &str,
        context: &BTreeMap<String, Value>,
    ) -> Result<WorkflowState, WorkflowError> {
        let session_id = self.store.create(task_id)?;
        let mut state = self.store.load(&session_id)?;
        state.merge_context(context);
        state
            .context
            .insert(TASK_ID_KEY.to_string(), Value::String(task_id.to_string()));
        if state.context_str(PROJECT_PATH_KEY).is_none() {
            state.context.insert(
                PROJECT_PATH_KEY.to_string(),
                Value::String(self.settings.project_dir.display().to_string()),
            );
        }
        self.store.save(&state)?;
        Ok(state)
    }

    /// Mark the session completed when every phase has succeeded; otherwise
    /// leave it resumable.
    fn settle(&self, state: &mut WorkflowState) -> Result<(), WorkflowError> {
        let all_done = self
            .registry
            .phases()
            .iter()
            .all(|p| state.succeeded(p.ordinal));
        state.set_status(if all_done {
            WorkflowStatus::Completed
        } else {
            WorkflowStatus::Running
        });
        self.store.save(state)?;
        Ok(())
    }

    /// Validate, invoke (with recovery), record and gate a single phase.
    async fn run_phase(
        &self,
        state: &mut WorkflowState,
        phase: &PhaseDescriptor,
    ) -> Result<PhaseOutcome, WorkflowError> {
        let missing = self.missing_inputs(state, phase);
        if !missing.is_empty() {
            let err = crate::errors::PhaseError::InputValidation {
                ordinal: phase.ordinal,
                missing,
            };
            warn!(ordinal = phase.ordinal, error = %err, "Input validation failed");
            let outcome = PhaseOutcome::failed(ErrorKind::InputValidation, err.to_string(), Duration::ZERO);
            state.record_error(Some(phase.ordinal), err.to_string());
            state.record_outcome(phase.ordinal, outcome.clone());
            self.store.save(state)?;
            return Ok(outcome);
        }

        let artifact_dir = self.store.artifact_dir(&state.session_id);
        std::fs::create_dir_all(&artifact_dir).with_context(|| {
            format!("Failed to create artifact directory: {}", artifact_dir.display())
        })?;

        let invocation = Invocation {
            session_id: state.session_id.clone(),
            task_id: state.task_id.clone(),
            argument: self.argument_for(state, phase),
            project_path: state.context_str(PROJECT_PATH_KEY).map(String::from),
            artifact_dir: artifact_dir.clone(),
            timeout: self.settings.timeout,
            attempt: 1,
        };

        info!(ordinal = phase.ordinal, phase = %phase.name, "Running phase");
        let invoke = |attempt: u32| {
            let invocation = Invocation {
                attempt,
                ..invocation.clone()
            };
            async move { self.executor.invoke(phase, &invocation).await.into_outcome() }
        };

        let outcome = if self.settings.auto_recovery {
            RecoveryManager::new(self.settings.max_retries, self.settings.retry_delay)
                .attempt(phase, invoke)
                .await
        } else {
            invoke(1).await
        };

        if !outcome.success {
            let message = outcome.error.clone().unwrap_or_else(|| "phase failed".into());
            error!(ordinal = phase.ordinal, attempts = outcome.attempts, error = %message, "Phase failed");
            state.record_error(Some(phase.ordinal), message);
            state.record_outcome(phase.ordinal, outcome.clone());
            self.store.save(state)?;
            return Ok(outcome);
        }

        state.record_outcome(phase.ordinal, outcome.clone());
        match artifacts::collect(phase, &artifact_dir) {
            Ok(handles) => {
                for handle in handles {
                    state.artifacts.insert(handle.output.clone(), handle);
                }
            }
            Err(e) => warn!(ordinal = phase.ordinal, error = %e, "Failed to record artifacts"),
        }
        self.store.save(state)?;

        let gate = self.evaluator.evaluate(phase, &outcome, state);
        if gate.passed {
            info!(ordinal = phase.ordinal, score = gate.score, "Quality gate passed");
        } else {
            warn!(
                ordinal = phase.ordinal,
                score = gate.score,
                threshold = gate.threshold,
                recommendations = ?gate.recommendations,
                "Quality gate failed, continuing"
            );
        }
        state.record_quality(gate);
        self.store.save(state)?;

        Ok(outcome)
    }

    /// Inputs of `phase` that are not yet satisfied.
    ///
    /// Well-known names are looked up in the context. Any other name must be
    /// declared by a phase that has succeeded; patterned outputs also need a
    /// recorded artifact whose file still exists.
    fn missing_inputs(&self, state: &WorkflowState, phase: &PhaseDescriptor) -> Vec<String> {
        phase
            .required_inputs
            .iter()
            .filter(|input| {
                if is_well_known_input(input) {
                    return state.context_str(input).is_none();
                }
                let Some(owner) = self.registry.owner_of_output(input) else {
                    return true;
                };
                if !state.succeeded(owner.ordinal) {
                    return true;
                }
                if owner.artifact_pattern(input).is_some() {
                    return !state.artifacts.get(input.as_str()).is_some_and(|h| h.exists());
                }
                false
            })
            .cloned()
            .collect()
    }

    fn argument_for(&self, state: &WorkflowState, phase: &PhaseDescriptor) -> String {
        match phase.argument {
            PhaseArgument::TaskId => state.task_id.clone(),
            PhaseArgument::ProjectPath => state
                .context_str(PROJECT_PATH_KEY)
                .map(String::from)
                .unwrap_or_else(|| self.settings.project_dir.display().to_string()),
        }
    }

    /// Turn the outcome of a run into the terminal result, recording
    /// unexpected errors as a session-level exception.
    fn finish(
        &self,
        state: &mut WorkflowState,
        outcome: Result<(), WorkflowError>,
        started: Instant,
    ) -> WorkflowResult {
        let mut error = None;
        let mut error_kind = None;

        if let Err(err) = outcome {
            error!(session_id = %state.session_id, error = %err, "Workflow raised an unexpected error");
            state.record_error(None, err.to_string());
            state.set_status(WorkflowStatus::Exception);
            if let Err(save_err) = self.store.save(state) {
                error!(session_id = %state.session_id, error = %save_err, "Failed to persist exception state");
            }
            error = Some(err.to_string());
            error_kind = Some(ErrorKind::UnexpectedException);
        } else if let Some(ordinal) = state.failed_phase {
            let outcome = state.outcomes.get(&ordinal);
            error = outcome.and_then(|o| o.error.clone());
            error_kind = outcome.and_then(|o| o.error_kind);
        }

        let recovery = match state.status {
            WorkflowStatus::Failed | WorkflowStatus::Exception => Some(RecoveryHint::new(
                &state.session_id,
                state.failed_phase.unwrap_or_else(|| state.resume_point()),
            )),
            _ => None,
        };

        let result = WorkflowResult {
            status: state.status,
            session_id: state.session_id.clone(),
            task_id: state.task_id.clone(),
            phases_completed: state.successful_phases(),
            total_phases: self.registry.len(),
            total_duration_secs: started.elapsed().as_secs_f64(),
            quality_summary: QualitySummary::from_gates(&state.quality_gates),
            failed_phase: state.failed_phase,
            error,
            error_kind,
            recovery,
        };
        info!(
            status = %result.status,
            phases_completed = result.phases_completed,
            duration_secs = result.total_duration_secs,
            "Workflow finished"
        );
        result
    }

    fn next_steps(&self, state: &WorkflowState, resume_point: u32) -> Vec<String> {
        match state.status {
            WorkflowStatus::Completed => vec![
                "Review the final report".to_string(),
                "Move on to the next task".to_string(),
            ],
            WorkflowStatus::Failed | WorkflowStatus::Exception => {
                let from = state.failed_phase.unwrap_or(resume_point);
                vec![
                    "Resolve the recorded error".to_string(),
                    format!("Resume with: conductor resume {} {}", state.session_id, from),
                ]
            }
            WorkflowStatus::Created | WorkflowStatus::Running => match self.registry.get(resume_point) {
                Some(phase) => vec![
                    format!("Run phase {} ({})", phase.ordinal, phase.name),
                    format!("Resume with: conductor resume {}", state.session_id),
                ],
                None => vec!["All phases finished".to_string()],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreError;
    use crate::orchestrator::executor::ExecutionReport;
    use crate::session::{MemorySessionStore, PruneReport, SessionSummary};
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Executor that fails the listed ordinals and counts invocations.
    #[derive(Default)]
    struct ScriptedExecutor {
        failing: HashSet<u32>,
        calls: Mutex<HashMap<u32, u32>>,
        /// Files to write into the artifact dir on success, keyed by ordinal.
        writes: HashMap<u32, (&'static str, &'static str)>,
    }

    impl ScriptedExecutor {
        fn failing(ordinals: &[u32]) -> Self {
            Self {
                failing: ordinals.iter().copied().collect(),
                ..Default::default()
            }
        }

        fn writing(mut self, ordinal: u32, file: &'static str, content: &'static str) -> Self {
            self.writes.insert(ordinal, (file, content));
            self
        }

        fn calls(&self, ordinal: u32) -> u32 {
            self.calls.lock().unwrap().get(&ordinal).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl PhaseExecutor for ScriptedExecutor {
        async fn invoke(&self, phase: &PhaseDescriptor, invocation: &Invocation) -> ExecutionReport {
            *self.calls.lock().unwrap().entry(phase.ordinal).or_default() += 1;
            if self.failing.contains(&phase.ordinal) {
                return ExecutionReport::from_error(
                    &crate::errors::PhaseError::ExecutionFailure {
                        ordinal: phase.ordinal,
                        exit_code: Some(1),
                        message: "scripted failure".into(),
                    },
                    Duration::ZERO,
                );
            }
            if let Some((file, content)) = self.writes.get(&phase.ordinal) {
                std::fs::write(invocation.artifact_dir.join(file), content).unwrap();
            }
            ExecutionReport::success(Duration::ZERO)
        }
    }

    /// Store that starts failing saves after `budget` successful ones.
    struct FlakyStore {
        inner: MemorySessionStore,
        budget: AtomicUsize,
    }

    impl SessionStore for FlakyStore {
        fn create(&self, task_id: &str) -> Result<String, StoreError> {
            self.inner.create(task_id)
        }
        fn save(&self, state: &WorkflowState) -> Result<(), StoreError> {
            if self.budget.load(Ordering::SeqCst) == 0 {
                return Err(StoreError::io(
                    "sessions",
                    std::io::Error::other("disk full"),
                ));
            }
            self.budget.fetch_sub(1, Ordering::SeqCst);
            self.inner.save(state)
        }
        fn load(&self, session_id: &str) -> Result<WorkflowState, StoreError> {
            self.inner.load(session_id)
        }
        fn latest(&self) -> Result<Option<String>, StoreError> {
            self.inner.latest()
        }
        fn prune(&self, max_age_days: u32) -> Result<PruneReport, StoreError> {
            self.inner.prune(max_age_days)
        }
        fn list(&self) -> Result<Vec<SessionSummary>, StoreError> {
            self.inner.list()
        }
        fn artifact_dir(&self, session_id: &str) -> PathBuf {
            self.inner.artifact_dir(session_id)
        }
    }

    fn three_phases() -> PhaseRegistry {
        PhaseRegistry::new(vec![
            PhaseDescriptor::new(1, "Discover", "one.sh").with_outputs(&["issue_data"]),
            PhaseDescriptor::new(2, "Analyse", "two.sh")
                .with_inputs(&["issue_data"])
                .with_outputs(&["analysis"]),
            PhaseDescriptor::new(3, "Plan", "three.sh")
                .with_inputs(&["analysis"])
                .with_outputs(&["plan"]),
        ])
        .unwrap()
    }

    fn settings(max_retries: u32, project_dir: &std::path::Path) -> CoordinatorSettings {
        CoordinatorSettings {
            max_retries,
            retry_delay: Duration::ZERO,
            timeout: Duration::from_secs(5),
            auto_recovery: true,
            project_dir: project_dir.to_path_buf(),
        }
    }

    fn coordinator<E: PhaseExecutor>(
        executor: E,
        root: &std::path::Path,
        max_retries: u32,
    ) -> WorkflowCoordinator<E, MemorySessionStore> {
        WorkflowCoordinator::new(
            three_phases(),
            executor,
            MemorySessionStore::new(root.join("artifacts")),
            settings(max_retries, root),
        )
    }

    // =========================================
    // End-to-end scenarios
    // =========================================

    #[tokio::test]
    async fn test_execute_all_phases_complete() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator(ScriptedExecutor::default(), dir.path(), 3);

        let result = coordinator.execute("T-1", BTreeMap::new()).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.phases_completed, 3);
        assert_eq!(result.total_phases, 3);
        assert!(result.recovery.is_none());
        assert_eq!(result.quality_summary.phases_evaluated, 3);

        let state = coordinator.store().load(&result.session_id).unwrap();
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.current_phase, 3);
        assert!(state.ended_at.is_some());
        assert_eq!(
            state.context_str(PROJECT_PATH_KEY),
            Some(dir.path().display().to_string().as_str())
        );
    }

    #[tokio::test]
    async fn test_execute_failure_with_single_retry() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator(ScriptedExecutor::failing(&[2]), dir.path(), 1);

        let result = coordinator.execute("T-1", BTreeMap::new()).await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Failed);
        assert_eq!(result.failed_phase, Some(2));
        assert_eq!(result.error_kind, Some(ErrorKind::ExecutionFailure));
        assert_eq!(coordinator.executor.calls(2), 2);
        assert_eq!(coordinator.executor.calls(3), 0);

        let hint = result.recovery.unwrap();
        assert_eq!(hint.from_ordinal, 2);
        assert_eq!(hint.command, format!("conductor resume {} 2", result.session_id));

        let state = coordinator.store().load(&result.session_id).unwrap();
        assert!(state.succeeded(1));
        assert_eq!(state.outcomes[&2].attempts, 2);
        assert!(state.outcomes[&2].error.as_deref().unwrap().contains("recovery exhausted"));
        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.errors[0].phase, Some(2));
    }

    #[tokio::test]
    async fn test_execute_range_rejects_unmet_dependency_without_invoking() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator(ScriptedExecutor::default(), dir.path(), 3);
        let id = coordinator.store().create("T-1").unwrap();
        let mut state = coordinator.store().load(&id).unwrap();

        let partial = coordinator.execute_range(&mut state, 2, 3).await.unwrap();
        assert!(!partial.success);
        assert_eq!(partial.failed_phase, Some(2));
        assert_eq!(partial.error_kind, Some(ErrorKind::InputValidation));
        assert!(partial.error.unwrap().contains("issue_data"));
        assert_eq!(coordinator.executor.calls(2), 0);
        assert_eq!(state.status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn test_auto_recovery_disabled_invokes_once() {
        let dir = tempdir().unwrap();
        let mut settings = settings(3, dir.path());
        settings.auto_recovery = false;
        let coordinator = WorkflowCoordinator::new(
            three_phases(),
            ScriptedExecutor::failing(&[1]),
            MemorySessionStore::new(dir.path().join("artifacts")),
            settings,
        );

        let result = coordinator.execute("T-1", BTreeMap::new()).await.unwrap();
        assert_eq!(result.failed_phase, Some(1));
        assert_eq!(coordinator.executor.calls(1), 1);
    }

    // =========================================
    // Resume
    // =========================================

    #[tokio::test]
    async fn test_resume_skips_successful_phases() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator(ScriptedExecutor::failing(&[3]), dir.path(), 0);
        let failed = coordinator.execute("T-1", BTreeMap::new()).await.unwrap();
        assert_eq!(failed.failed_phase, Some(3));

        let state = coordinator.store().load(&failed.session_id).unwrap();
        assert_eq!(coordinator.resume_point(&state), 3);

        let fixed = WorkflowCoordinator::new(
            three_phases(),
            ScriptedExecutor::default(),
            MemorySessionStore::new(dir.path().join("artifacts")),
            settings(0, dir.path()),
        );
        fixed.store().save(&state).unwrap();

        let result = fixed.resume(&failed.session_id, None).await.unwrap();
        assert!(result.is_success());
        assert_eq!(fixed.executor.calls(1), 0);
        assert_eq!(fixed.executor.calls(2), 0);
        assert_eq!(fixed.executor.calls(3), 1);
        assert_eq!(result.phases_completed, 3);
    }

    #[tokio::test]
    async fn test_resume_when_everything_succeeded_completes_without_running() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator(ScriptedExecutor::default(), dir.path(), 0);
        let first = coordinator.execute("T-1", BTreeMap::new()).await.unwrap();

        let again = coordinator.resume(&first.session_id, None).await.unwrap();
        assert!(again.is_success());
        assert_eq!(coordinator.executor.calls(1), 1);
    }

    #[tokio::test]
    async fn test_resume_unknown_session() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator(ScriptedExecutor::default(), dir.path(), 0);
        let err = coordinator.resume("missing", None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::SessionNotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn test_resume_explicit_invalid_ordinal() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator(ScriptedExecutor::default(), dir.path(), 0);
        let id = coordinator.store().create("T-1").unwrap();
        let err = coordinator.resume(&id, Some(9)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidRange { start: 9, .. }));
    }

    #[tokio::test]
    async fn test_current_phase_is_monotonic_across_calls() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator(ScriptedExecutor::default(), dir.path(), 0);
        let result = coordinator.execute("T-1", BTreeMap::new()).await.unwrap();

        let mut state = coordinator.store().load(&result.session_id).unwrap();
        assert_eq!(state.current_phase, 3);
        coordinator.execute_range(&mut state, 1, 1).await.unwrap();
        assert_eq!(coordinator.store().load(&result.session_id).unwrap().current_phase, 3);
    }

    #[tokio::test]
    async fn test_execute_range_invalid_bounds() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator(ScriptedExecutor::default(), dir.path(), 0);
        let id = coordinator.store().create("T-1").unwrap();
        let mut state = coordinator.store().load(&id).unwrap();

        for (start, end) in [(0, 1), (3, 2), (1, 4)] {
            let err = coordinator.execute_range(&mut state, start, end).await.unwrap_err();
            assert!(matches!(err, WorkflowError::InvalidRange { .. }));
        }
    }

    #[tokio::test]
    async fn test_partial_range_leaves_session_running() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator(ScriptedExecutor::default(), dir.path(), 0);

        let partial = coordinator
            .run_phases(None, "T-1", 1, 2, BTreeMap::new())
            .await
            .unwrap();
        assert!(partial.success);
        assert_eq!(partial.completed, vec![1, 2]);
        assert_eq!(partial.status, WorkflowStatus::Running);

        let report = coordinator.status(Some(&partial.session_id)).unwrap();
        assert_eq!(report.resume_point, 3);
        assert_eq!(report.next_steps[0], "Run phase 3 (Plan)");
    }

    // =========================================
    // Artifacts
    // =========================================

    fn patterned_phases() -> PhaseRegistry {
        PhaseRegistry::new(vec![
            PhaseDescriptor::new(1, "Discover", "one.sh")
                .with_outputs(&["issue_data"])
                .with_checks(&["issue_validity"])
                .with_artifact("issue_data", "agent_issue_*.json"),
            PhaseDescriptor::new(2, "Analyse", "two.sh").with_inputs(&["issue_data"]),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_artifact_handles_are_recorded_and_gate_reads_them() {
        let dir = tempdir().unwrap();
        let executor = ScriptedExecutor::default().writing(
            1,
            "agent_issue_1.json",
            r#"{"issue_data": {"title": "Fix login", "id": "T-1"}}"#,
        );
        let coordinator = WorkflowCoordinator::new(
            patterned_phases(),
            executor,
            MemorySessionStore::new(dir.path().join("artifacts")),
            settings(0, dir.path()),
        );

        let result = coordinator.execute("T-1", BTreeMap::new()).await.unwrap();
        assert!(result.is_success());

        let state = coordinator.store().load(&result.session_id).unwrap();
        let handle = &state.artifacts["issue_data"];
        assert_eq!(handle.phase, 1);
        assert!(handle.path.starts_with(dir.path().join("artifacts").join(&result.session_id)));
        assert!(state.quality_gates[&1].passed);
    }

    #[tokio::test]
    async fn test_missing_artifact_fails_downstream_validation() {
        let dir = tempdir().unwrap();
        let coordinator = WorkflowCoordinator::new(
            patterned_phases(),
            ScriptedExecutor::default(),
            MemorySessionStore::new(dir.path().join("artifacts")),
            settings(0, dir.path()),
        );

        let result = coordinator.execute("T-1", BTreeMap::new()).await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Failed);
        assert_eq!(result.failed_phase, Some(2));
        assert_eq!(result.error_kind, Some(ErrorKind::InputValidation));
        assert_eq!(coordinator.executor.calls(2), 0);

        // The gate for phase 1 failed but did not stop the pipeline.
        let state = coordinator.store().load(&result.session_id).unwrap();
        assert!(!state.quality_gates[&1].passed);
        assert!(state.succeeded(1));
    }

    // =========================================
    // Status and exceptions
    // =========================================

    #[tokio::test]
    async fn test_status_defaults_to_latest_session() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator(ScriptedExecutor::failing(&[2]), dir.path(), 0);
        assert!(matches!(coordinator.status(None), Err(WorkflowError::NoSessions)));

        let result = coordinator.execute("T-9", BTreeMap::new()).await.unwrap();
        let report = coordinator.status(None).unwrap();
        assert_eq!(report.session_id, result.session_id);
        assert_eq!(report.status, WorkflowStatus::Failed);
        assert_eq!(report.resume_point, 2);
        assert_eq!(report.failed_phase, Some(2));
        assert!(report.next_steps[1].contains("conductor resume"));
    }

    #[tokio::test]
    async fn test_store_failure_becomes_exception() {
        let dir = tempdir().unwrap();
        let store = FlakyStore {
            inner: MemorySessionStore::new(dir.path().join("artifacts")),
            budget: AtomicUsize::new(3),
        };
        let coordinator = WorkflowCoordinator::new(
            three_phases(),
            ScriptedExecutor::default(),
            store,
            settings(0, dir.path()),
        );

        let result = coordinator.execute("T-1", BTreeMap::new()).await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Exception);
        assert_eq!(result.error_kind, Some(ErrorKind::UnexpectedException));
        assert!(result.error.unwrap().contains("disk full"));
        assert!(result.recovery.is_some());
    }

    #[tokio::test]
    async fn test_caller_context_is_kept() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator(ScriptedExecutor::default(), dir.path(), 0);
        let context = BTreeMap::from([
            (PROJECT_PATH_KEY.to_string(), Value::String("/srv/app".into())),
            ("branch".to_string(), Value::String("main".into())),
        ]);

        let result = coordinator.execute("T-1", context).await.unwrap();
        let state = coordinator.store().load(&result.session_id).unwrap();
        assert_eq!(state.context_str(PROJECT_PATH_KEY), Some("/srv/app"));
        assert_eq!(state.context_str("branch"), Some("main"));
        assert_eq!(state.context_str(TASK_ID_KEY), Some("T-1"));
    }
}
