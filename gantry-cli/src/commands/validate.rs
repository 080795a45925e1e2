use crate::commands::{load_workflow, EXIT_INPUT_ERROR, EXIT_SUCCESS};
use crate::output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use color_eyre::Result;

use workflow_service::MatrixExpander;

/// Validate a workflow YAML file
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the workflow YAML file
    pub workflow: PathBuf,
}

pub fn execute(args: ValidateArgs) -> Result<ExitCode> {
    let workflow_path = &args.workflow;

    // Step 1: Parse and validate the definition
    output::status("Validating", &format!("{}", workflow_path.display()));

    let definition = match load_workflow(workflow_path) {
        Ok(definition) => definition,
        Err(code) => return Ok(code),
    };

    output::check(&format!(
        "Workflow '{}' parsed (triggers: {})",
        definition.display_name(),
        definition.triggers.join(", ")
    ));

    let steps_count: usize = definition.jobs.iter().map(|j| j.steps.len()).sum();
    output::check(&format!(
        "Structure: {} jobs, {} steps",
        definition.jobs.len(),
        steps_count
    ));

    // Step 2: Every job's matrix must expand
    let mut expansion_errors = 0;
    for job in &definition.jobs {
        match MatrixExpander::expand(job) {
            Ok(combinations) => output::check(&format!(
                "Job '{}': {} instance(s)",
                job.id,
                combinations.len()
            )),
            Err(e) => {
                output::error(&e.to_string());
                expansion_errors += 1;
            }
        }
    }

    if expansion_errors > 0 {
        output::failure(&format!("{} job(s) cannot be expanded", expansion_errors));
        return Ok(ExitCode::from(EXIT_INPUT_ERROR));
    }

    println!();
    output::success("Workflow is valid");

    Ok(ExitCode::from(EXIT_SUCCESS))
}
