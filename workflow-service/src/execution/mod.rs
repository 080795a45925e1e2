// Execution Engine Module
// Handles matrix expansion, step execution and run coordination

pub mod context;
pub mod coordinator;
pub mod events;
pub mod executor;
pub mod instance;
pub mod matrix;
pub mod result;
pub mod status;
pub mod step_executor;

// Re-export key types
pub use context::{global_environment, parse_workflow_commands, InstanceEnvironment};
pub use coordinator::{DispatchPolicy, JobPlan, RunCoordinator};
pub use events::{progress_channel, EventSender, ExecutionEvent, ProgressSender};
pub use executor::{ExecutorConfig, WorkflowExecutor};
pub use instance::{InstanceSummary, JobInstance};
pub use matrix::{ExpansionError, ExpansionErrorKind, MatrixExpander};
pub use result::{
    JobRunResult, RunResult, RunStatus, StepFailure, StepOutcome, StepStatus, WorkflowRunResult,
};
pub use status::{InstanceControl, InstanceState, StatusTable, TransitionError};
pub use step_executor::StepExecutor;
