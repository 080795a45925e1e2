// Workflow Service Library
// Core engine for parsing matrix workflows and running their job instances

pub mod error;
pub mod execution;
pub mod expression;
pub mod reporter;
pub mod runners;
pub mod workflow;

// Re-export commonly used types
pub use error::{ServiceError, ServiceResult};

// Re-export definition types
pub use workflow::{
    parse, Job, MatrixCombination, ParseError, ParseErrorKind, ParseResult, Step, StepAction,
    TriggerPolicy, WorkflowDefinition, WorkflowParser,
};

// Re-export execution types
pub use execution::{
    progress_channel, DispatchPolicy, ExecutionEvent, ExecutorConfig, ExpansionError,
    ExpansionErrorKind, InstanceState, JobInstance, JobRunResult, MatrixExpander, ProgressSender,
    RunCoordinator, RunResult, RunStatus, StepExecutor, StepFailure, WorkflowExecutor,
    WorkflowRunResult,
};

// Re-export runner types
pub use runners::{
    CheckoutProvider, CollaboratorError, CommandRunner, RunnerRegistry, Shell, ShellRunner,
    ToolchainProvider,
};

// Re-export reporting types
pub use reporter::{ReportFormat, Reporter};
