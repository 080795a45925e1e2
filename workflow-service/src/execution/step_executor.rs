// Step Executor
// Runs one job instance's steps in order and drives its lifecycle state

use crate::execution::context::{parse_workflow_commands, InstanceEnvironment};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::instance::JobInstance;
use crate::execution::result::{RunResult, RunStatus, StepFailure, StepOutcome, StepStatus};
use crate::execution::status::{InstanceControl, InstanceState};
use crate::expression::ExpressionContext;
use crate::runners::{
    CollaboratorError, CommandLine, CommandOutput, RunnerRegistry, StepContext,
};
use crate::workflow::models::{Job, Step, StepAction};

use tracing::{debug, info, warn};

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Extra time a collaborator gets past the step timeout to report back on
/// its own before the executor stops waiting for it.
const TIMEOUT_GRACE: Duration = Duration::from_secs(1);

/// Executes the steps of a single job instance
#[derive(Debug, Clone)]
pub struct StepExecutor {
    runners: RunnerRegistry,
    event_tx: Option<ProgressSender>,
    default_timeout: Option<Duration>,
}

impl StepExecutor {
    pub fn new(runners: RunnerRegistry) -> Self {
        Self {
            runners,
            event_tx: None,
            default_timeout: None,
        }
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Timeout for steps whose step and job declare none
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Run every step of `instance` until one fails or the group is cancelled.
    ///
    /// Cancellation is observed before each step; a step already in flight
    /// finishes. The returned result is always terminal.
    pub async fn run(&self, instance: &JobInstance, control: &InstanceControl) -> RunResult {
        let start = Instant::now();
        let job = &instance.job;
        let label = instance.label();

        if control.is_cancelled() {
            warn!(instance = %label, "cancelled before start");
            self.settle(control, InstanceState::Cancelled).await;
            self.event_tx.send_event(ExecutionEvent::instance_completed(
                &job.id,
                &label,
                instance.index,
                RunStatus::Cancelled,
                Duration::ZERO,
            ));
            return RunResult::cancelled(instance.summary());
        }

        self.settle(control, InstanceState::Running).await;
        info!(instance = %label, runner = %instance.runner, "instance started");
        self.event_tx.send_event(ExecutionEvent::instance_started(
            &job.id,
            &label,
            instance.index,
            &instance.runner,
            job.steps.len(),
        ));

        let mut env = InstanceEnvironment::new(instance);
        let mut steps = Vec::with_capacity(job.steps.len());
        let mut status = RunStatus::Succeeded;

        for (index, step) in job.steps.iter().enumerate() {
            if control.is_cancelled() {
                warn!(instance = %label, step = index, "cancelled before step");
                status = RunStatus::Cancelled;
                break;
            }

            let outcome = self.run_step(instance, &label, step, index, &mut env).await;
            let failed = outcome.status == StepStatus::Failed;
            steps.push(outcome);

            if failed {
                status = RunStatus::Failed;
                break;
            }
        }

        let duration = start.elapsed();
        self.settle(control, status.into()).await;
        info!(instance = %label, %status, "instance finished");
        self.event_tx.send_event(ExecutionEvent::instance_completed(
            &job.id,
            &label,
            instance.index,
            status,
            duration,
        ));

        RunResult {
            instance: instance.summary(),
            status,
            steps,
            duration,
        }
    }

    async fn settle(&self, control: &InstanceControl, next: InstanceState) {
        if let Err(e) = control.transition(next).await {
            warn!(error = %e, "status table rejected transition");
        }
    }

    async fn run_step(
        &self,
        instance: &JobInstance,
        label: &str,
        step: &Step,
        index: usize,
        env: &mut InstanceEnvironment,
    ) -> StepOutcome {
        let start = Instant::now();
        let job_id = &instance.job.id;
        let identifier = step.identifier(index);
        let display_name = step.display_name();

        debug!(instance = %label, step = %identifier, "step started");
        self.event_tx.send_event(ExecutionEvent::step_started(
            job_id,
            label,
            index,
            &display_name,
        ));

        let step_env = env.for_step(step, instance);
        let timeout = self.step_timeout(step, &instance.job);
        let invocation = self.invoke(step, instance, step_env, timeout);

        let result = match timeout {
            Some(limit) => {
                let deadline = limit.saturating_add(TIMEOUT_GRACE);
                match tokio::time::timeout(deadline, invocation).await {
                    Ok(result) => result,
                    Err(_) => Ok(CommandOutput {
                        timed_out: true,
                        ..Default::default()
                    }),
                }
            }
            None => invocation.await,
        };

        let (output, failure) = match result {
            Err(CollaboratorError {
                collaborator,
                diagnostic,
            }) => (
                CommandOutput::default(),
                Some(StepFailure::CollaboratorUnavailable {
                    collaborator,
                    diagnostic,
                }),
            ),
            Ok(output) if output.timed_out => {
                let after = timeout.unwrap_or_default();
                (output, Some(StepFailure::TimedOut { after }))
            }
            Ok(output) if !output.success() => {
                let failure = StepFailure::NonZeroExit {
                    exit_code: output.exit_code,
                    diagnostic: exit_diagnostic(&output),
                };
                (output, Some(failure))
            }
            Ok(output) => (output, None),
        };

        for line in output.stdout.lines() {
            self.event_tx
                .send_event(ExecutionEvent::step_output(job_id, label, index, line, false));
        }
        for line in output.stderr.lines() {
            self.event_tx
                .send_event(ExecutionEvent::step_output(job_id, label, index, line, true));
        }

        // Only a successful step can pass values on
        let mut exported = Vec::new();
        if failure.is_none() {
            let commands = parse_workflow_commands(&output.stdout);
            if !commands.is_empty() {
                env.apply(&commands);
                for (name, value) in &commands.env {
                    self.event_tx.send_event(ExecutionEvent::env_exported(
                        job_id, label, name, value,
                    ));
                }
                exported = commands.env;
            }
        }

        let status = if failure.is_some() {
            StepStatus::Failed
        } else {
            StepStatus::Succeeded
        };
        let duration = start.elapsed();

        match &failure {
            Some(failure) => warn!(instance = %label, step = %identifier, %failure, "step failed"),
            None => debug!(instance = %label, step = %identifier, "step succeeded"),
        }
        self.event_tx.send_event(ExecutionEvent::step_completed(
            job_id,
            label,
            index,
            status,
            duration,
            output.exit_code,
            failure.as_ref().map(StepFailure::diagnostic),
        ));

        StepOutcome {
            index,
            identifier,
            display_name,
            status,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            failure,
            duration,
            exported,
        }
    }

    /// Step timeout, else job timeout, else the configured default.
    fn step_timeout(&self, step: &Step, job: &Job) -> Option<Duration> {
        step.timeout_minutes
            .or(job.timeout_minutes)
            .map(|minutes| Duration::from_secs(u64::from(minutes) * 60))
            .or(self.default_timeout)
    }

    /// One collaborator call for one step.
    async fn invoke(
        &self,
        step: &Step,
        instance: &JobInstance,
        env: HashMap<String, String>,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, CollaboratorError> {
        let expressions = ExpressionContext::new(&instance.combination, &env, &instance.runner);

        match &step.action {
            StepAction::Run(run) => {
                let script = expressions.render(&run.command);
                let working_dir = match &run.working_directory {
                    Some(dir) => instance.working_dir.join(expressions.render(dir)),
                    None => instance.working_dir.clone(),
                };
                let command = CommandLine::script(run.shell, script);
                self.runners
                    .commands()
                    .execute(&command, &env, &working_dir, timeout)
                    .await
            }
            StepAction::Checkout(options) => {
                let ctx = StepContext {
                    env,
                    working_dir: instance.working_dir.clone(),
                    timeout,
                };
                self.runners.checkout().checkout(options, &ctx).await
            }
            StepAction::Toolchain(options) => {
                let mut options = options.clone();
                options.toolchain = expressions.render(&options.toolchain);
                options.profile = options.profile.map(|p| expressions.render(&p));
                options.components = options
                    .components
                    .iter()
                    .map(|c| expressions.render(c))
                    .collect();

                let ctx = StepContext {
                    env,
                    working_dir: instance.working_dir.clone(),
                    timeout,
                };
                self.runners.toolchain().install(&options, &ctx).await
            }
        }
    }
}

/// The diagnostic for a failed command: its stderr, else its last line of
/// stdout.
fn exit_diagnostic(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    output
        .stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string()
}
