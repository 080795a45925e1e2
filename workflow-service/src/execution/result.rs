// Execution results
// Per-step outcomes, per-instance results and the workflow-wide aggregate

use crate::execution::instance::InstanceSummary;
use crate::execution::matrix::ExpansionError;
use crate::execution::status::InstanceState;

use serde::{Serialize, Serializer};
use thiserror::Error;

use std::fmt;
use std::time::Duration;

/// Terminal status of an instance, a job or a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Failed if anything failed, else Cancelled if anything was cancelled,
    /// else Succeeded. An empty set succeeds.
    pub fn aggregate<I>(statuses: I) -> RunStatus
    where
        I: IntoIterator<Item = RunStatus>,
    {
        statuses
            .into_iter()
            .fold(RunStatus::Succeeded, |acc, status| match (acc, status) {
                (RunStatus::Failed, _) | (_, RunStatus::Failed) => RunStatus::Failed,
                (RunStatus::Cancelled, _) | (_, RunStatus::Cancelled) => RunStatus::Cancelled,
                _ => RunStatus::Succeeded,
            })
    }

    pub fn is_success(&self) -> bool {
        *self == RunStatus::Succeeded
    }
}

impl From<RunStatus> for InstanceState {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Succeeded => InstanceState::Succeeded,
            RunStatus::Failed => InstanceState::Failed,
            RunStatus::Cancelled => InstanceState::Cancelled,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepStatus {
    Succeeded,
    Failed,
}

/// Why a step failed. Recorded on the step, never raised as a program error.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cause")]
pub enum StepFailure {
    #[error("{}", describe_exit(*.exit_code, .diagnostic))]
    NonZeroExit {
        exit_code: Option<i32>,
        diagnostic: String,
    },

    #[error("timed out after {}", humanize(*.after))]
    TimedOut {
        #[serde(rename = "after_ms", serialize_with = "serialize_millis")]
        after: Duration,
    },

    #[error("{collaborator} unavailable: {diagnostic}")]
    CollaboratorUnavailable {
        collaborator: String,
        diagnostic: String,
    },
}

fn describe_exit(exit_code: Option<i32>, diagnostic: &str) -> String {
    let code = match exit_code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    };
    if diagnostic.is_empty() {
        code
    } else {
        format!("{}: {}", code, diagnostic)
    }
}

impl StepFailure {
    /// The user-facing diagnostic, verbatim where it came from a collaborator.
    pub fn diagnostic(&self) -> String {
        match self {
            StepFailure::NonZeroExit { diagnostic, .. } if !diagnostic.is_empty() => {
                diagnostic.clone()
            }
            StepFailure::CollaboratorUnavailable { diagnostic, .. } => diagnostic.clone(),
            other => other.to_string(),
        }
    }
}

/// Outcome of one step that was started.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    /// Position in the job's step list
    pub index: usize,
    /// `id`, else `name`, else `step N`
    pub identifier: String,
    pub display_name: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub failure: Option<StepFailure>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    /// Variables this step exported to later steps
    pub exported: Vec<(String, String)>,
}

/// Terminal result of one job instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub instance: InstanceSummary,
    pub status: RunStatus,
    /// Outcomes of the steps that started, in order
    pub steps: Vec<StepOutcome>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl RunResult {
    /// Result for an instance that was cancelled before it started.
    pub fn cancelled(instance: InstanceSummary) -> Self {
        Self {
            instance,
            status: RunStatus::Cancelled,
            steps: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn first_failure(&self) -> Option<(&StepOutcome, &StepFailure)> {
        self.steps
            .iter()
            .find_map(|step| step.failure.as_ref().map(|failure| (step, failure)))
    }
}

/// All instances of one job, or the reason it could not be expanded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRunResult {
    pub job_id: String,
    pub job_name: String,
    pub status: RunStatus,
    pub instances: Vec<RunResult>,
    pub expansion_error: Option<ExpansionError>,
}

impl JobRunResult {
    pub fn new(job_id: impl Into<String>, job_name: impl Into<String>, instances: Vec<RunResult>) -> Self {
        let status = RunStatus::aggregate(instances.iter().map(|r| r.status));
        Self {
            job_id: job_id.into(),
            job_name: job_name.into(),
            status,
            instances,
            expansion_error: None,
        }
    }

    /// A job that never dispatched because its matrix failed to expand.
    pub fn expansion_failed(job_name: impl Into<String>, error: ExpansionError) -> Self {
        Self {
            job_id: error.job.clone(),
            job_name: job_name.into(),
            status: RunStatus::Failed,
            instances: Vec::new(),
            expansion_error: Some(error),
        }
    }
}

/// Aggregate result of a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowRunResult {
    pub workflow: String,
    pub status: RunStatus,
    pub jobs: Vec<JobRunResult>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl WorkflowRunResult {
    pub fn new(workflow: impl Into<String>, jobs: Vec<JobRunResult>, duration: Duration) -> Self {
        let status = RunStatus::aggregate(jobs.iter().map(|j| j.status));
        Self {
            workflow: workflow.into(),
            status,
            jobs,
            duration,
        }
    }

    pub fn instances(&self) -> impl Iterator<Item = &RunResult> {
        self.jobs.iter().flat_map(|job| job.instances.iter())
    }

    /// Number of instances that ended in `status`.
    pub fn count(&self, status: RunStatus) -> usize {
        self.instances().filter(|r| r.status == status).count()
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis().min(u64::MAX as u128) as u64)
}

/// Format a duration for humans: `850ms`, `12.3s`, `2m 5s`.
pub fn humanize(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else if millis < 60_000 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{}m {}s", secs / 60, secs % 60)
    }
}
