pub mod document;
pub mod error;
pub mod models;
pub mod parser;
pub mod trigger;

pub use error::{ParseError, ParseErrorKind, ParseResult};
pub use models::{
    CheckoutOptions, Job, MatrixAxis, MatrixCombination, MatrixSpec, RunCommand, RunsOn, Step,
    StepAction, ToolchainOptions, WorkflowDefinition,
};
pub use parser::{parse, WorkflowParser};
pub use trigger::TriggerPolicy;
