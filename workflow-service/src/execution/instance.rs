// Job instances
// One job bound to one matrix combination and one resolved runner

use crate::workflow::models::{Job, MatrixCombination};

use serde::Serialize;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// A job bound to exactly one matrix combination, ready to run.
#[derive(Debug, Clone)]
pub struct JobInstance {
    /// The job this instance was expanded from (shared, read-only)
    pub job: Arc<Job>,

    /// Position in the job's expansion order
    pub index: usize,

    /// The bound axis values
    pub combination: MatrixCombination,

    /// Runner target after expression substitution
    pub runner: String,

    /// Private environment: global, standard, job and matrix layers
    pub env: HashMap<String, String>,

    /// Workspace directory steps run in
    pub working_dir: PathBuf,
}

impl JobInstance {
    /// Human readable label, e.g. `build (ubuntu-latest, Release)`.
    pub fn label(&self) -> String {
        let name = self.job.display_name();
        if self.combination.is_empty() {
            name.to_string()
        } else {
            format!("{} {}", name, self.combination)
        }
    }

    pub fn summary(&self) -> InstanceSummary {
        InstanceSummary {
            job_id: self.job.id.clone(),
            index: self.index,
            label: self.label(),
            matrix: self.combination.clone(),
            runner: self.runner.clone(),
        }
    }
}

/// Identity of an instance as it appears in results and reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceSummary {
    pub job_id: String,
    pub index: usize,
    pub label: String,
    pub matrix: MatrixCombination,
    pub runner: String,
}

/// Environment variable name a matrix axis is exposed under.
pub fn matrix_env_name(axis: &str) -> String {
    let mut name = String::with_capacity(axis.len() + 7);
    name.push_str("MATRIX_");
    for c in axis.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_uppercase());
        } else {
            name.push('_');
        }
    }
    name
}
