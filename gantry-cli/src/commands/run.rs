use crate::commands::{exit_code, input_error, load_workflow, EXIT_SUCCESS};
use crate::output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Args;
use color_eyre::Result;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use workflow_service::execution::events::progress_channel;
use workflow_service::execution::result::{humanize, StepStatus};
use workflow_service::{
    ExecutionEvent, ExecutorConfig, ReportFormat, Reporter, RunStatus, Shell, WorkflowExecutor,
};

/// Run a workflow locally
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the workflow YAML file
    pub workflow: PathBuf,

    /// Event the workflow is run for
    #[arg(long, env = "GANTRY_EVENT", default_value = "push")]
    pub event: String,

    /// Working directory for execution (default: current directory)
    #[arg(long = "workdir", short = 'w', value_name = "DIR")]
    pub working_dir: Option<PathBuf>,

    /// Run only a specific job
    #[arg(long, value_name = "JOB")]
    pub job: Option<String>,

    /// Let every instance finish even after one fails
    #[arg(long)]
    pub no_fail_fast: bool,

    /// Maximum instances of a job running at once
    #[arg(long, value_name = "N")]
    pub max_parallel: Option<usize>,

    /// Timeout in minutes for steps that declare none
    #[arg(long, value_name = "MINUTES")]
    pub step_timeout: Option<u64>,

    /// Do not pass the process environment to steps
    #[arg(long)]
    pub no_inherit_env: bool,

    /// Set a variable (can be repeated, format: name=value)
    #[arg(long = "var", short = 'v', value_name = "NAME=VALUE")]
    pub variables: Vec<String>,

    /// Shell for run steps that do not name one
    #[arg(long, value_name = "SHELL")]
    pub shell: Option<Shell>,

    /// Report format: terminal, json or junit
    #[arg(long, default_value = "terminal")]
    pub report: ReportFormat,
}

pub async fn execute(args: RunArgs) -> Result<ExitCode> {
    let mut config = ExecutorConfig::default()
        .with_inherit_process_env(!args.no_inherit_env);

    // Parse variables from --var flags
    for var_str in &args.variables {
        match var_str.split_once('=') {
            Some((name, value)) if !name.is_empty() => {
                config = config.with_variable(name, value);
            }
            _ => {
                return Ok(input_error(&format!(
                    "Invalid variable format '{}'. Expected name=value",
                    var_str
                )))
            }
        }
    }

    match args.max_parallel {
        Some(0) => return Ok(input_error("--max-parallel must be at least 1")),
        Some(n) => config = config.with_max_parallel(n),
        None => {}
    }
    match args.step_timeout {
        Some(0) => return Ok(input_error("--step-timeout must be at least 1 minute")),
        Some(minutes) => match minutes.checked_mul(60) {
            Some(secs) => config = config.with_default_step_timeout(Duration::from_secs(secs)),
            None => {
                return Ok(input_error(&format!(
                    "--step-timeout {} is too large",
                    minutes
                )))
            }
        },
        None => {}
    }
    if args.no_fail_fast {
        config = config.with_fail_fast(false);
    }
    if let Some(job) = &args.job {
        config = config.with_only_job(job);
    }
    if let Some(shell) = args.shell {
        config = config.with_shell(shell);
    }

    let working_dir = match &args.working_dir {
        Some(dir) if !dir.is_dir() => {
            return Ok(input_error(&format!(
                "Working directory not found: {}",
                dir.display()
            )))
        }
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    config = config.with_working_dir(working_dir);

    let live = args.report == ReportFormat::Terminal;
    if live {
        output::status("Parsing", &format!("{}", args.workflow.display()));
    }
    let definition = match load_workflow(&args.workflow) {
        Ok(definition) => definition,
        Err(code) => return Ok(code),
    };

    if !definition.is_triggered_by(&args.event) {
        debug!(event = %args.event, "workflow not triggered");
        output::info(&format!(
            "Workflow '{}' is not triggered by '{}' (triggers: {}), nothing to run",
            definition.display_name(),
            args.event,
            definition.triggers.join(", ")
        ));
        return Ok(ExitCode::from(EXIT_SUCCESS));
    }

    info!(
        workflow = %args.workflow.display(),
        event = %args.event,
        "starting run"
    );

    // Ctrl-C cancels every instance cooperatively
    let cancellation = CancellationToken::new();
    let interrupt = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            output::warning("Interrupted, cancelling remaining steps");
            interrupt.cancel();
        }
    });

    let (tx, rx) = progress_channel();
    let executor = WorkflowExecutor::new(definition)
        .with_config(config)
        .with_progress(tx)
        .with_cancellation(cancellation);

    // Spawn execution in background
    let exec_handle = tokio::spawn(async move { executor.execute().await });

    // Process events in the foreground
    let mut events = UnboundedReceiverStream::new(rx);
    while let Some(event) = events.next().await {
        if live {
            print_event(&event);
        }
    }

    let result = match exec_handle.await? {
        Ok(result) => result,
        Err(e) => return Ok(input_error(&e.to_string())),
    };

    let report = Reporter::report(&result, args.report)?;
    print!("{}", report);

    Ok(exit_code(result.status))
}

fn print_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::WorkflowStarted {
            workflow_name,
            total_jobs,
        } => {
            println!();
            output::header(&format!("Workflow '{}' ({} jobs)", workflow_name, total_jobs));
        }

        ExecutionEvent::WorkflowCompleted {
            status, duration, ..
        } => {
            println!();
            match status {
                RunStatus::Succeeded => output::success(&format!(
                    "Workflow completed successfully in {}",
                    humanize(*duration)
                )),
                RunStatus::Failed => {
                    output::failure(&format!("Workflow failed after {}", humanize(*duration)))
                }
                RunStatus::Cancelled => output::warning(&format!(
                    "Workflow cancelled after {}",
                    humanize(*duration)
                )),
            }
        }

        ExecutionEvent::JobExpanded { job_id, instances } => {
            output::job_header(job_id, *instances);
        }

        ExecutionEvent::JobExpansionFailed { job_id, error } => {
            output::error(&format!("Job '{}' not run: {}", job_id, error));
        }

        ExecutionEvent::InstanceStarted {
            instance,
            runner,
            total_steps,
            ..
        } => {
            println!("    {} on {} ({} steps)", instance, runner, total_steps);
        }

        ExecutionEvent::InstanceCompleted {
            instance,
            status,
            duration,
            ..
        } => {
            let line = format!(
                "    {} {} ({})",
                instance,
                status.to_string().to_uppercase(),
                humanize(*duration)
            );
            match status {
                RunStatus::Succeeded => output::dim_success(&line),
                RunStatus::Failed => output::dim_failure(&line),
                RunStatus::Cancelled => output::dim(&line),
            }
        }

        ExecutionEvent::StepStarted {
            instance,
            step_index,
            display_name,
            ..
        } => {
            println!("      [{} step {}] {}", instance, step_index + 1, display_name);
        }

        ExecutionEvent::StepOutput {
            output, is_error, ..
        } => {
            if *is_error {
                output::step_error(output);
            } else {
                output::step_output(output);
            }
        }

        ExecutionEvent::StepCompleted {
            status,
            duration,
            exit_code,
            failure,
            ..
        } => {
            let exit_info = match exit_code {
                Some(code) if *code != 0 => format!(" (exit code: {})", code),
                _ => String::new(),
            };
            match status {
                StepStatus::Succeeded => output::dim_success(&format!(
                    "        OK ({}){}",
                    humanize(*duration),
                    exit_info
                )),
                StepStatus::Failed => {
                    output::dim_failure(&format!(
                        "        FAIL ({}){}",
                        humanize(*duration),
                        exit_info
                    ));
                    if let Some(failure) = failure {
                        output::dim_failure(&format!("        {}", failure));
                    }
                }
            }
        }

        ExecutionEvent::EnvExported { name, value, .. } => {
            output::dim(&format!("        [env] {} = {}", name, value));
        }
    }
}
