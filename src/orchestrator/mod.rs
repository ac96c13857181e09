pub mod coordinator;
pub mod executor;
pub mod recovery;
pub mod state;

pub use coordinator::{
    CoordinatorSettings, PartialResult, RecoveryHint, StatusReport, WorkflowCoordinator,
    WorkflowResult,
};
pub use executor::{ExecutionReport, Invocation, PhaseExecutor, ProcessExecutor};
pub use recovery::RecoveryManager;
pub use state::{ErrorRecord, PhaseOutcome, WorkflowState, WorkflowStatus};
