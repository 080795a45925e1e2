use crate::execution::matrix::ExpansionError;
use crate::workflow::error::ParseError;

use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors that stop a workflow before or around execution.
///
/// Step failures are not here: they are recorded on the run result.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("expansion error: {0}")]
    Expansion(#[from] ExpansionError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ServiceError {
    /// Whether the error came from the workflow or caller input, as opposed
    /// to the environment.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ServiceError::Parse(_) | ServiceError::Expansion(_) | ServiceError::InvalidInput(_)
        )
    }
}
