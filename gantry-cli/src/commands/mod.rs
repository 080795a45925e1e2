pub mod matrix;
pub mod run;
pub mod validate;

use crate::output;

use std::path::Path;
use std::process::ExitCode;

use workflow_service::{RunStatus, ServiceError, WorkflowDefinition, WorkflowParser};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILED: u8 = 1;
pub const EXIT_CANCELLED: u8 = 2;
pub const EXIT_INPUT_ERROR: u8 = 3;

/// Process exit code for a finished run.
pub fn exit_code(status: RunStatus) -> ExitCode {
    ExitCode::from(match status {
        RunStatus::Succeeded => EXIT_SUCCESS,
        RunStatus::Failed => EXIT_FAILED,
        RunStatus::Cancelled => EXIT_CANCELLED,
    })
}

/// Report an input error and return the matching exit code.
pub fn input_error(message: &str) -> ExitCode {
    output::error(message);
    ExitCode::from(EXIT_INPUT_ERROR)
}

/// Read and parse a workflow file, printing any error in full.
pub fn load_workflow(path: &Path) -> Result<WorkflowDefinition, ExitCode> {
    WorkflowParser::new().from_file(path).map_err(|e| match e {
        ServiceError::Parse(parse_error) => {
            // ParseError renders its own `error:` prefix, location and hints
            eprintln!("{}", parse_error);
            ExitCode::from(EXIT_INPUT_ERROR)
        }
        ServiceError::Io(io) => input_error(&format!("cannot read {}: {}", path.display(), io)),
        other => input_error(&other.to_string()),
    })
}
