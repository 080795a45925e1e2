// Workflow Executor
// Plans a workflow into job instances and hands them to the run coordinator

use crate::error::{ServiceError, ServiceResult};
use crate::execution::context::global_environment;
use crate::execution::coordinator::{DispatchPolicy, JobPlan, RunCoordinator};
use crate::execution::events::ProgressSender;
use crate::execution::matrix::MatrixExpander;
use crate::execution::result::WorkflowRunResult;
use crate::execution::step_executor::StepExecutor;
use crate::runners::{RunnerRegistry, Shell, ShellRunner};
use crate::workflow::models::WorkflowDefinition;

use tokio_util::sync::CancellationToken;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for workflow execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Workspace directory shared by every instance
    pub working_dir: PathBuf,
    /// Timeout for steps whose step and job declare none (None = unlimited)
    pub default_step_timeout: Option<Duration>,
    /// Overrides every job's `max-parallel`
    pub max_parallel: Option<usize>,
    /// Overrides every job's `fail-fast`
    pub fail_fast: Option<bool>,
    /// Start the global environment from the process environment
    pub inherit_process_env: bool,
    /// Variables layered over the workflow's `env`
    pub variables: HashMap<String, String>,
    /// Run only this job
    pub only_job: Option<String>,
    /// Shell for `run` steps that do not name one
    pub shell: Option<Shell>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            default_step_timeout: None,
            max_parallel: None,
            fail_fast: None,
            inherit_process_env: true,
            variables: HashMap::new(),
            only_job: None,
            shell: None,
        }
    }
}

impl ExecutorConfig {
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_default_step_timeout(mut self, timeout: Duration) -> Self {
        self.default_step_timeout = Some(timeout);
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel);
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = Some(fail_fast);
        self
    }

    pub fn with_inherit_process_env(mut self, inherit: bool) -> Self {
        self.inherit_process_env = inherit;
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_only_job(mut self, job: impl Into<String>) -> Self {
        self.only_job = Some(job.into());
        self
    }

    pub fn with_shell(mut self, shell: Shell) -> Self {
        self.shell = Some(shell);
        self
    }
}

/// Workflow executor
pub struct WorkflowExecutor {
    /// The parsed workflow
    definition: Arc<WorkflowDefinition>,
    /// Configuration
    config: ExecutorConfig,
    /// Progress event sender
    event_tx: Option<ProgressSender>,
    /// Collaborators steps are dispatched to
    runners: RunnerRegistry,
    /// Run-wide cancellation
    cancellation: CancellationToken,
}

impl WorkflowExecutor {
    /// Create a new executor for a workflow
    pub fn new(definition: WorkflowDefinition) -> Self {
        Self {
            definition: Arc::new(definition),
            config: ExecutorConfig::default(),
            event_tx: None,
            runners: RunnerRegistry::new(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Set executor configuration
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        // A default shell means a differently configured shell runner
        if let Some(shell) = config.shell {
            self.runners = RunnerRegistry::new()
                .with_command_runner(Arc::new(ShellRunner::with_default_shell(shell)));
        }
        self.config = config;
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Replace the collaborators (applied after any configured shell)
    pub fn with_runners(mut self, runners: RunnerRegistry) -> Self {
        self.runners = runners;
        self
    }

    /// Use `token` as the run-wide cancellation signal
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Expand every selected job into instances.
    ///
    /// A job whose matrix cannot be expanded is planned with its error so
    /// the other jobs still run. Naming a job that does not exist is an
    /// input error.
    pub fn plan(&self) -> ServiceResult<Vec<JobPlan>> {
        if let Some(only) = &self.config.only_job {
            if self.definition.job(only).is_none() {
                let known: Vec<&str> = self.definition.jobs.iter().map(|j| j.id.as_str()).collect();
                return Err(ServiceError::InvalidInput(format!(
                    "no job '{}' in workflow (jobs: {})",
                    only,
                    known.join(", ")
                )));
            }
        }

        let global = global_environment(
            &self.definition,
            self.config.inherit_process_env,
            &self.config.variables,
        );

        let plans = self
            .definition
            .jobs
            .iter()
            .filter(|job| {
                self.config
                    .only_job
                    .as_deref()
                    .map_or(true, |only| job.id == only)
            })
            .map(|job| {
                let job = Arc::new(job.clone());
                let mut policy = DispatchPolicy::for_job(&job);
                if let Some(fail_fast) = self.config.fail_fast {
                    policy.fail_fast = fail_fast;
                }
                if let Some(max_parallel) = self.config.max_parallel {
                    policy.max_parallel = Some(max_parallel);
                }
                let instances =
                    MatrixExpander::instantiate(&job, &global, &self.config.working_dir);
                JobPlan {
                    job,
                    instances,
                    policy,
                }
            })
            .collect();

        Ok(plans)
    }

    /// Execute the workflow: all selected jobs concurrently, each with its
    /// own fail-fast scope.
    pub async fn execute(&self) -> ServiceResult<WorkflowRunResult> {
        let plans = self.plan()?;

        let mut step_executor = StepExecutor::new(self.runners.clone())
            .with_default_timeout(self.config.default_step_timeout);
        let mut coordinator_events = None;
        if let Some(tx) = &self.event_tx {
            step_executor = step_executor.with_progress(tx.clone());
            coordinator_events = Some(tx.clone());
        }

        let mut coordinator =
            RunCoordinator::new(step_executor).with_cancellation(self.cancellation.clone());
        if let Some(tx) = coordinator_events {
            coordinator = coordinator.with_progress(tx);
        }

        Ok(coordinator
            .run_plans(self.definition.display_name(), plans)
            .await)
    }
}
