// Expression Module
// `${{ context.path }}` substitution for matrix, env and runner values

pub mod interpolate;

pub use interpolate::{
    extract_segments, runner_os, validate, ExpressionContext, ExpressionError, Segment,
};
