// Execution Events
// Progress reporting and event types for workflow execution

use crate::execution::result::{RunStatus, StepStatus};

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted during workflow execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Workflow execution started
    WorkflowStarted {
        workflow_name: String,
        total_jobs: usize,
    },

    /// Workflow execution completed
    WorkflowCompleted {
        workflow_name: String,
        status: RunStatus,
        duration: Duration,
    },

    /// A job's matrix was expanded into instances
    JobExpanded { job_id: String, instances: usize },

    /// A job's matrix could not be expanded; none of its instances run
    JobExpansionFailed { job_id: String, error: String },

    /// Instance execution started
    InstanceStarted {
        job_id: String,
        instance: String,
        index: usize,
        runner: String,
        total_steps: usize,
    },

    /// Instance reached a terminal state
    InstanceCompleted {
        job_id: String,
        instance: String,
        index: usize,
        status: RunStatus,
        duration: Duration,
    },

    /// Step execution started
    StepStarted {
        job_id: String,
        instance: String,
        step_index: usize,
        display_name: String,
    },

    /// Step output (stdout/stderr), one line per event
    StepOutput {
        job_id: String,
        instance: String,
        step_index: usize,
        output: String,
        is_error: bool,
    },

    /// Step execution completed
    StepCompleted {
        job_id: String,
        instance: String,
        step_index: usize,
        status: StepStatus,
        duration: Duration,
        exit_code: Option<i32>,
        failure: Option<String>,
    },

    /// A step exported a variable to the rest of its instance
    EnvExported {
        job_id: String,
        instance: String,
        name: String,
        value: String,
    },
}

impl ExecutionEvent {
    /// Create a workflow started event
    pub fn workflow_started(name: impl Into<String>, total_jobs: usize) -> Self {
        Self::WorkflowStarted {
            workflow_name: name.into(),
            total_jobs,
        }
    }

    /// Create a workflow completed event
    pub fn workflow_completed(
        name: impl Into<String>,
        status: RunStatus,
        duration: Duration,
    ) -> Self {
        Self::WorkflowCompleted {
            workflow_name: name.into(),
            status,
            duration,
        }
    }

    pub fn job_expanded(job_id: impl Into<String>, instances: usize) -> Self {
        Self::JobExpanded {
            job_id: job_id.into(),
            instances,
        }
    }

    pub fn job_expansion_failed(job_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::JobExpansionFailed {
            job_id: job_id.into(),
            error: error.into(),
        }
    }

    /// Create an instance started event
    pub fn instance_started(
        job_id: impl Into<String>,
        instance: impl Into<String>,
        index: usize,
        runner: impl Into<String>,
        total_steps: usize,
    ) -> Self {
        Self::InstanceStarted {
            job_id: job_id.into(),
            instance: instance.into(),
            index,
            runner: runner.into(),
            total_steps,
        }
    }

    /// Create an instance completed event
    pub fn instance_completed(
        job_id: impl Into<String>,
        instance: impl Into<String>,
        index: usize,
        status: RunStatus,
        duration: Duration,
    ) -> Self {
        Self::InstanceCompleted {
            job_id: job_id.into(),
            instance: instance.into(),
            index,
            status,
            duration,
        }
    }

    /// Create a step started event
    pub fn step_started(
        job_id: impl Into<String>,
        instance: impl Into<String>,
        step_index: usize,
        display_name: impl Into<String>,
    ) -> Self {
        Self::StepStarted {
            job_id: job_id.into(),
            instance: instance.into(),
            step_index,
            display_name: display_name.into(),
        }
    }

    /// Create a step output event
    pub fn step_output(
        job_id: impl Into<String>,
        instance: impl Into<String>,
        step_index: usize,
        output: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::StepOutput {
            job_id: job_id.into(),
            instance: instance.into(),
            step_index,
            output: output.into(),
            is_error,
        }
    }

    /// Create a step completed event
    pub fn step_completed(
        job_id: impl Into<String>,
        instance: impl Into<String>,
        step_index: usize,
        status: StepStatus,
        duration: Duration,
        exit_code: Option<i32>,
        failure: Option<String>,
    ) -> Self {
        Self::StepCompleted {
            job_id: job_id.into(),
            instance: instance.into(),
            step_index,
            status,
            duration,
            exit_code,
            failure,
        }
    }

    pub fn env_exported(
        job_id: impl Into<String>,
        instance: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::EnvExported {
            job_id: job_id.into(),
            instance: instance.into(),
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
