// Run Coordinator
// Dispatches job instances concurrently and applies fail-fast cancellation

use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::instance::{InstanceSummary, JobInstance};
use crate::execution::matrix::ExpansionError;
use crate::execution::result::{JobRunResult, RunResult, RunStatus, WorkflowRunResult};
use crate::execution::status::{InstanceControl, InstanceState, StatusTable};
use crate::execution::step_executor::StepExecutor;
use crate::workflow::models::Job;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use std::sync::Arc;
use std::time::{Duration, Instant};

/// How the instances of one job are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    /// Cancel the rest of the job when one instance fails
    pub fail_fast: bool,
    /// Maximum instances running at once (None = unlimited)
    pub max_parallel: Option<usize>,
}

impl DispatchPolicy {
    /// The policy the job's own strategy asks for.
    pub fn for_job(job: &Job) -> Self {
        Self {
            fail_fast: job.fail_fast,
            max_parallel: job.max_parallel,
        }
    }
}

/// One job ready to dispatch, or the reason it cannot be.
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub job: Arc<Job>,
    pub instances: Result<Vec<JobInstance>, ExpansionError>,
    pub policy: DispatchPolicy,
}

/// Run coordinator
#[derive(Debug, Clone)]
pub struct RunCoordinator {
    executor: Arc<StepExecutor>,
    event_tx: Option<ProgressSender>,
    cancellation: CancellationToken,
}

impl RunCoordinator {
    pub fn new(executor: StepExecutor) -> Self {
        Self {
            executor: Arc::new(executor),
            event_tx: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Use `token` as the run-wide cancellation signal.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Cancel every instance of every job in this run.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Run a flat list of instances. Instances of the same job share one
    /// fail-fast scope; different jobs run concurrently and independently.
    pub async fn run_all(
        &self,
        workflow: &str,
        instances: Vec<JobInstance>,
        fail_fast: bool,
    ) -> WorkflowRunResult {
        let mut plans: Vec<JobPlan> = Vec::new();

        for instance in instances {
            match plans.iter_mut().find(|plan| plan.job.id == instance.job.id) {
                Some(JobPlan {
                    instances: Ok(list),
                    ..
                }) => list.push(instance),
                Some(_) => {}
                None => plans.push(JobPlan {
                    job: Arc::clone(&instance.job),
                    policy: DispatchPolicy {
                        fail_fast,
                        max_parallel: instance.job.max_parallel,
                    },
                    instances: Ok(vec![instance]),
                }),
            }
        }

        self.run_plans(workflow, plans).await
    }

    /// Run every planned job concurrently and aggregate the results in plan
    /// order. Jobs that failed to expand are reported without running.
    pub async fn run_plans(&self, workflow: &str, plans: Vec<JobPlan>) -> WorkflowRunResult {
        let start = Instant::now();
        info!(workflow, jobs = plans.len(), "run started");
        self.event_tx
            .send_event(ExecutionEvent::workflow_started(workflow, plans.len()));

        let mut jobs: Vec<Option<JobRunResult>> = vec![None; plans.len()];
        let mut names = Vec::with_capacity(plans.len());
        let mut tasks = JoinSet::new();

        for (position, plan) in plans.into_iter().enumerate() {
            let JobPlan {
                job,
                instances,
                policy,
            } = plan;
            names.push((job.id.clone(), job.display_name().to_string()));

            match instances {
                Err(e) => {
                    error!(job = %job.id, error = %e, "matrix expansion failed");
                    self.event_tx
                        .send_event(ExecutionEvent::job_expansion_failed(&job.id, e.to_string()));
                    jobs[position] = Some(JobRunResult::expansion_failed(job.display_name(), e));
                }
                Ok(instances) => {
                    self.event_tx
                        .send_event(ExecutionEvent::job_expanded(&job.id, instances.len()));
                    let coordinator = self.clone();
                    tasks.spawn(async move {
                        let result = coordinator.run_job(&job, instances, policy).await;
                        (position, result)
                    });
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, result)) => jobs[position] = Some(result),
                Err(e) => error!(error = %e, "job task ended abnormally"),
            }
        }

        let jobs = jobs
            .into_iter()
            .zip(names)
            .map(|(result, (id, name))| {
                result.unwrap_or_else(|| {
                    let mut aborted = JobRunResult::new(id, name, Vec::new());
                    aborted.status = RunStatus::Failed;
                    aborted
                })
            })
            .collect();

        let result = WorkflowRunResult::new(workflow, jobs, start.elapsed());
        info!(workflow, status = %result.status, "run finished");
        self.event_tx.send_event(ExecutionEvent::workflow_completed(
            workflow,
            result.status,
            result.duration,
        ));
        result
    }

    /// Run all instances of one job concurrently under `policy`.
    ///
    /// With fail-fast, the first Failed instance cancels every instance of
    /// this job that has not settled yet. Instances of other jobs are not
    /// affected.
    pub async fn run_job(
        &self,
        job: &Job,
        instances: Vec<JobInstance>,
        policy: DispatchPolicy,
    ) -> JobRunResult {
        info!(
            job = %job.id,
            instances = instances.len(),
            fail_fast = policy.fail_fast,
            max_parallel = ?policy.max_parallel,
            "dispatching job"
        );

        let table = Arc::new(StatusTable::new(instances.len()));
        let group = self.cancellation.child_token();
        let semaphore = policy
            .max_parallel
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        let summaries: Vec<InstanceSummary> = instances.iter().map(JobInstance::summary).collect();
        let mut results: Vec<Option<RunResult>> = vec![None; instances.len()];
        let mut tasks = JoinSet::new();

        for (id, instance) in instances.into_iter().enumerate() {
            let control = InstanceControl::new(id, Arc::clone(&table), group.clone());
            let executor = Arc::clone(&self.executor);
            let semaphore = semaphore.clone();
            let fail_fast = policy.fail_fast;

            tasks.spawn(async move {
                // Wait for a slot unless the group is cancelled first
                let _permit = match semaphore {
                    Some(semaphore) => tokio::select! {
                        biased;
                        _ = control.token().cancelled() => None,
                        permit = semaphore.acquire_owned() => permit.ok(),
                    },
                    None => None,
                };

                let result = executor.run(&instance, &control).await;
                if fail_fast && result.status == RunStatus::Failed {
                    warn!(instance = %result.instance.label, "fail-fast: cancelling remaining instances");
                    control.cancel_group();
                }
                (id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, result)) => results[id] = Some(result),
                Err(e) => {
                    error!(job = %job.id, error = %e, "instance task ended abnormally");
                    if policy.fail_fast {
                        group.cancel();
                    }
                }
            }
        }

        let mut settled = Vec::with_capacity(results.len());
        for (id, (result, summary)) in results.into_iter().zip(summaries).enumerate() {
            match result {
                Some(result) => settled.push(result),
                None => {
                    // The task panicked; whatever state it reached, it failed
                    let _ = table.transition(id, InstanceState::Running).await;
                    let _ = table.transition(id, InstanceState::Failed).await;
                    settled.push(RunResult {
                        instance: summary,
                        status: RunStatus::Failed,
                        steps: Vec::new(),
                        duration: Duration::ZERO,
                    });
                }
            }
        }

        let result = JobRunResult::new(&job.id, job.display_name(), settled);
        info!(job = %job.id, status = %result.status, "job finished");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::context::global_environment;
    use crate::execution::matrix::{ExpansionErrorKind, MatrixExpander};
    use crate::execution::result::StepStatus;
    use crate::runners::fake::{Scripted, ScriptedRunner};
    use crate::runners::RunnerRegistry;
    use crate::workflow::parser::parse;

    use std::collections::HashMap;
    use std::path::Path;

    const MATRIX: &str = r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    strategy:
      matrix:
        os: [a, b, c]
    steps:
      - run: step one
      - run: step two
"#;

    fn plan(yaml: &str) -> (Arc<Job>, Vec<JobInstance>) {
        let workflow = parse(yaml).unwrap();
        let global = global_environment(&workflow, false, &HashMap::new());
        let job = Arc::new(workflow.jobs[0].clone());
        let instances = MatrixExpander::instantiate(&job, &global, Path::new(".")).unwrap();
        (job, instances)
    }

    /// Instance `b` fails at once; `a` and `c` take a while on every step.
    fn middle_fails() -> Arc<ScriptedRunner> {
        ScriptedRunner::new(|_, env| {
            if env.get("MATRIX_OS").map(String::as_str) == Some("b") {
                Scripted::fail(1, "b broke")
            } else {
                Scripted::ok().after(Duration::from_millis(200))
            }
        })
    }

    fn coordinator(runner: Arc<ScriptedRunner>) -> RunCoordinator {
        RunCoordinator::new(StepExecutor::new(
            RunnerRegistry::new().with_command_runner(runner),
        ))
    }

    fn statuses(result: &JobRunResult) -> Vec<RunStatus> {
        result.instances.iter().map(|r| r.status).collect()
    }

    #[tokio::test]
    async fn test_all_instances_succeed() {
        let (job, instances) = plan(MATRIX);
        let runner = ScriptedRunner::succeeding();

        let result = coordinator(runner.clone())
            .run_job(&job, instances, DispatchPolicy::for_job(&job))
            .await;

        assert_eq!(result.status, RunStatus::Succeeded);
        assert_eq!(statuses(&result), vec![RunStatus::Succeeded; 3]);
        assert_eq!(runner.calls().len(), 6);
    }

    #[tokio::test]
    async fn test_fail_fast_cancels_unsettled_instances() {
        let (job, instances) = plan(MATRIX);
        let runner = middle_fails();
        let policy = DispatchPolicy {
            fail_fast: true,
            max_parallel: None,
        };

        let result = coordinator(runner.clone())
            .run_job(&job, instances, policy)
            .await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(
            statuses(&result),
            vec![RunStatus::Cancelled, RunStatus::Failed, RunStatus::Cancelled]
        );
        // The in-flight first step finished, the second never started
        for cancelled in [&result.instances[0], &result.instances[2]] {
            assert_eq!(cancelled.steps.len(), 1);
            assert_eq!(cancelled.steps[0].status, StepStatus::Succeeded);
        }
        assert!(!runner.commands().contains(&"step two".to_string()));
    }

    #[tokio::test]
    async fn test_without_fail_fast_every_instance_settles_on_its_own() {
        let (job, instances) = plan(MATRIX);
        let runner = middle_fails();
        let policy = DispatchPolicy {
            fail_fast: false,
            max_parallel: None,
        };

        let result = coordinator(runner.clone())
            .run_job(&job, instances, policy)
            .await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(
            statuses(&result),
            vec![RunStatus::Succeeded, RunStatus::Failed, RunStatus::Succeeded]
        );
        assert_eq!(result.instances[0].steps.len(), 2);
        assert_eq!(result.instances[2].steps.len(), 2);
    }

    #[tokio::test]
    async fn test_pending_instances_cancelled_under_max_parallel() {
        let (job, instances) = plan(MATRIX);
        let runner = ScriptedRunner::new(|_, env| {
            if env.get("MATRIX_OS").map(String::as_str) == Some("b") {
                Scripted::fail(1, "b broke")
            } else {
                Scripted::ok()
            }
        });
        let policy = DispatchPolicy {
            fail_fast: true,
            max_parallel: Some(1),
        };

        let result = coordinator(runner.clone())
            .run_job(&job, instances, policy)
            .await;

        assert_eq!(
            statuses(&result),
            vec![RunStatus::Succeeded, RunStatus::Failed, RunStatus::Cancelled]
        );
        assert!(result.instances[2].steps.is_empty());
        assert_eq!(runner.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_max_parallel_without_fail_fast_runs_everything() {
        let (job, instances) = plan(MATRIX);
        let runner = middle_fails();
        let policy = DispatchPolicy {
            fail_fast: false,
            max_parallel: Some(1),
        };

        let result = coordinator(runner.clone())
            .run_job(&job, instances, policy)
            .await;

        assert_eq!(
            statuses(&result),
            vec![RunStatus::Succeeded, RunStatus::Failed, RunStatus::Succeeded]
        );
    }

    #[tokio::test]
    async fn test_run_wide_cancellation() {
        let (_, instances) = plan(MATRIX);
        let runner = ScriptedRunner::succeeding();
        let coordinator = coordinator(runner.clone());
        coordinator.cancel();

        let result = coordinator.run_all("CI", instances, true).await;

        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(result.count(RunStatus::Cancelled), 3);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_fail_fast_scope_is_per_job() {
        let yaml = r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    strategy:
      matrix:
        os: [b]
    steps:
      - run: step one
  lint:
    runs-on: ubuntu-latest
    steps:
      - run: slow lint
"#;
        let workflow = parse(yaml).unwrap();
        let runner = ScriptedRunner::new(|command, env| {
            if env.get("MATRIX_OS").map(String::as_str) == Some("b") {
                Scripted::fail(1, "b broke")
            } else if command.to_string() == "slow lint" {
                Scripted::ok().after(Duration::from_millis(100))
            } else {
                Scripted::ok()
            }
        });
        let mut instances = Vec::new();
        for job in &workflow.jobs {
            let job = Arc::new(job.clone());
            instances.extend(
                MatrixExpander::instantiate(&job, &HashMap::new(), Path::new(".")).unwrap(),
            );
        }

        let result = coordinator(runner).run_all("CI", instances, true).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.jobs[0].job_id, "build");
        assert_eq!(result.jobs[0].status, RunStatus::Failed);
        assert_eq!(result.jobs[1].job_id, "lint");
        assert_eq!(result.jobs[1].status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_expansion_failure_reported_for_that_job_only() {
        let (job, instances) = plan(MATRIX);
        let broken = Arc::new(Job {
            id: "broken".to_string(),
            ..(*job).clone()
        });
        let error = ExpansionError {
            job: "broken".to_string(),
            kind: ExpansionErrorKind::EmptyAxis,
            message: "matrix axis 'os' has no values".to_string(),
        };
        let plans = vec![
            JobPlan {
                job: broken,
                instances: Err(error.clone()),
                policy: DispatchPolicy::for_job(&job),
            },
            JobPlan {
                job: Arc::clone(&job),
                instances: Ok(instances),
                policy: DispatchPolicy::for_job(&job),
            },
        ];

        let result = coordinator(ScriptedRunner::succeeding())
            .run_plans("CI", plans)
            .await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.jobs[0].expansion_error, Some(error));
        assert!(result.jobs[0].instances.is_empty());
        assert_eq!(result.jobs[1].status, RunStatus::Succeeded);
        assert_eq!(result.count(RunStatus::Succeeded), 3);
    }

    #[tokio::test]
    async fn test_panicking_instance_counts_as_failed() {
        let (job, instances) = plan(MATRIX);
        let runner = ScriptedRunner::new(|_, env| {
            if env.get("MATRIX_OS").map(String::as_str) == Some("c") {
                panic!("runner exploded");
            }
            Scripted::ok()
        });
        let policy = DispatchPolicy {
            fail_fast: false,
            max_parallel: None,
        };

        let result = coordinator(runner).run_job(&job, instances, policy).await;

        assert_eq!(
            statuses(&result),
            vec![RunStatus::Succeeded, RunStatus::Succeeded, RunStatus::Failed]
        );
        assert_eq!(result.instances[2].instance.label, "build (c)");
    }
}
