use crate::commands::{input_error, load_workflow, EXIT_INPUT_ERROR, EXIT_SUCCESS};
use crate::output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use color_eyre::Result;

use workflow_service::execution::InstanceSummary;
use workflow_service::{ExecutorConfig, WorkflowExecutor};

/// Print the job instances a workflow expands into
#[derive(Args, Debug)]
pub struct MatrixArgs {
    /// Path to the workflow YAML file
    pub workflow: PathBuf,

    /// Expand only a specific job
    #[arg(long, value_name = "JOB")]
    pub job: Option<String>,

    /// Print instances as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: MatrixArgs) -> Result<ExitCode> {
    let definition = match load_workflow(&args.workflow) {
        Ok(definition) => definition,
        Err(code) => return Ok(code),
    };

    let mut config = ExecutorConfig::default();
    if let Some(job) = &args.job {
        config = config.with_only_job(job);
    }
    let plans = match WorkflowExecutor::new(definition).with_config(config).plan() {
        Ok(plans) => plans,
        Err(e) => return Ok(input_error(&e.to_string())),
    };

    let mut summaries: Vec<InstanceSummary> = Vec::new();
    let mut failed = false;

    for plan in &plans {
        match &plan.instances {
            Ok(instances) => {
                if !args.json {
                    output::job_header(&plan.job.id, instances.len());
                }
                for instance in instances {
                    if !args.json {
                        println!(
                            "    {:>3}  {:<40} runs-on: {}",
                            instance.index, instance.label(), instance.runner
                        );
                    }
                    summaries.push(instance.summary());
                }
            }
            Err(e) => {
                output::error(&e.to_string());
                failed = true;
            }
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    }

    Ok(ExitCode::from(if failed {
        EXIT_INPUT_ERROR
    } else {
        EXIT_SUCCESS
    }))
}
