// Matrix Strategy Expansion
// Expands a job's matrix into ordered combinations and concrete job instances

use crate::execution::instance::{matrix_env_name, JobInstance};
use crate::expression::ExpressionContext;
use crate::workflow::models::{value_to_string, Job, MatrixAxis, MatrixCombination};

use serde::Serialize;
use thiserror::Error;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExpansionErrorKind {
    /// A declared axis has no values
    EmptyAxis,
    /// Exclusions removed every combination
    EmptyMatrix,
    /// The runner selector rendered to nothing for some combination
    UnresolvedRunner,
}

/// A job whose matrix cannot be turned into instances.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("job '{job}': {message}")]
pub struct ExpansionError {
    pub job: String,
    pub kind: ExpansionErrorKind,
    pub message: String,
}

impl ExpansionError {
    fn new(job: &Job, kind: ExpansionErrorKind, message: impl Into<String>) -> Self {
        Self {
            job: job.id.clone(),
            kind,
            message: message.into(),
        }
    }
}

/// Matrix expander for job strategies
pub struct MatrixExpander;

impl MatrixExpander {
    /// Expand a job's matrix into combinations.
    ///
    /// Axes are iterated in declaration order with the last-declared axis
    /// varying fastest. A job without a matrix yields one empty combination.
    pub fn expand(job: &Job) -> Result<Vec<MatrixCombination>, ExpansionError> {
        let matrix = &job.matrix;

        if let Some(axis) = matrix.axes.iter().find(|a| a.values.is_empty()) {
            return Err(ExpansionError::new(
                job,
                ExpansionErrorKind::EmptyAxis,
                format!("matrix axis '{}' has no values", axis.name),
            ));
        }

        let mut combinations = if matrix.axes.is_empty() {
            Vec::new()
        } else {
            Self::product(&matrix.axes)
        };

        combinations.retain(|combo| !matrix.exclude.iter().any(|entry| combo.matches(entry)));

        // Include entries merge into original combinations whose axis values
        // they agree with; otherwise they become combinations of their own.
        let originals = combinations.len();
        for entry in &matrix.include {
            let mut merged = false;
            for combo in combinations.iter_mut().take(originals) {
                let agrees = entry
                    .iter()
                    .filter(|(name, _)| matrix.has_axis(name))
                    .all(|(name, value)| combo.get(name) == Some(value));
                if agrees {
                    for (name, value) in entry.iter() {
                        combo.insert(name, value.clone());
                    }
                    merged = true;
                }
            }
            if !merged {
                combinations.push(entry.clone());
            }
        }

        if matrix.is_empty() {
            return Ok(vec![MatrixCombination::new()]);
        }

        if combinations.is_empty() {
            return Err(ExpansionError::new(
                job,
                ExpansionErrorKind::EmptyMatrix,
                "matrix exclusions removed every combination",
            ));
        }

        Ok(combinations)
    }

    /// Cartesian product of the axes, last axis varying fastest.
    pub fn product(axes: &[MatrixAxis]) -> Vec<MatrixCombination> {
        axes.iter().fold(vec![MatrixCombination::new()], |acc, axis| {
            let mut next = Vec::with_capacity(acc.len() * axis.values.len());
            for combo in &acc {
                for value in &axis.values {
                    let mut extended = combo.clone();
                    extended.insert(axis.name.clone(), value.clone());
                    next.push(extended);
                }
            }
            next
        })
    }

    /// Bind every combination of `job` to a runner and a private environment.
    pub fn instantiate(
        job: &Arc<Job>,
        global_env: &HashMap<String, String>,
        working_dir: &Path,
    ) -> Result<Vec<JobInstance>, ExpansionError> {
        Self::expand(job)?
            .into_iter()
            .enumerate()
            .map(|(index, combination)| {
                Self::bind(job, index, combination, global_env, working_dir)
            })
            .collect()
    }

    fn bind(
        job: &Arc<Job>,
        index: usize,
        combination: MatrixCombination,
        global_env: &HashMap<String, String>,
        working_dir: &Path,
    ) -> Result<JobInstance, ExpansionError> {
        let labels: Vec<String> = {
            let ctx = ExpressionContext::new(&combination, global_env, "");
            job.runs_on
                .labels()
                .into_iter()
                .map(|label| ctx.render(label).trim().to_string())
                .collect()
        };
        if labels.iter().any(String::is_empty) {
            return Err(ExpansionError::new(
                job,
                ExpansionErrorKind::UnresolvedRunner,
                format!(
                    "runs-on resolves to an empty runner for combination {}",
                    combination
                ),
            ));
        }
        let runner = labels.join(", ");

        let mut env = global_env.clone();
        env.insert("CI".to_string(), "true".to_string());
        env.insert(
            "GANTRY_WORKSPACE".to_string(),
            working_dir.display().to_string(),
        );
        env.insert("GANTRY_JOB".to_string(), job.id.clone());
        env.insert("GANTRY_RUNNER".to_string(), runner.clone());

        let job_env = ExpressionContext::new(&combination, &env, &runner).render_env(&job.env);
        env.extend(job_env);

        for (axis, value) in combination.iter() {
            env.insert(matrix_env_name(axis), value_to_string(value));
        }

        Ok(JobInstance {
            job: Arc::clone(job),
            index,
            combination,
            runner,
            env,
            working_dir: working_dir.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::parser::parse;
    use serde_json::json;

    use std::collections::HashSet;

    fn job(yaml: &str) -> Job {
        parse(yaml).unwrap().jobs.remove(0)
    }

    fn matrix_job(matrix: &str) -> Job {
        job(&format!(
            r#"
on: push
jobs:
  build:
    runs-on: ${{{{ matrix.os }}}}
    strategy:
      matrix:
{}
    steps:
      - run: echo hi
"#,
            matrix
        ))
    }

    fn pairs(combos: &[MatrixCombination]) -> Vec<String> {
        combos.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_last_axis_varies_fastest() {
        let job = matrix_job("        os: [a, b]\n        build_type: [X, Y]");
        let combos = MatrixExpander::expand(&job).unwrap();
        assert_eq!(pairs(&combos), vec!["(a, X)", "(a, Y)", "(b, X)", "(b, Y)"]);
    }

    #[test]
    fn test_degenerate_axis() {
        let job = matrix_job("        os: [a, b]\n        build_type: [Release]");
        let combos = MatrixExpander::expand(&job).unwrap();
        assert_eq!(pairs(&combos), vec!["(a, Release)", "(b, Release)"]);
    }

    #[test]
    fn test_product_size_and_uniqueness() {
        let job = matrix_job("        os: [a, b, c]\n        rust: [stable, beta]\n        feature: [x, y]");
        let combos = MatrixExpander::expand(&job).unwrap();

        assert_eq!(combos.len(), 3 * 2 * 2);
        let unique: HashSet<String> = combos
            .iter()
            .map(|c| serde_json::to_string(c).unwrap())
            .collect();
        assert_eq!(unique.len(), combos.len());
    }

    #[test]
    fn test_no_matrix_is_single_empty_combination() {
        let job = job("on: push\njobs:\n  build:\n    runs-on: x\n    steps:\n      - run: echo\n");
        let combos = MatrixExpander::expand(&job).unwrap();
        assert_eq!(combos, vec![MatrixCombination::new()]);

        let job = matrix_job("        {}");
        assert_eq!(MatrixExpander::expand(&job).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_axis() {
        let job = matrix_job("        os: [a]\n        build_type: []");
        let err = MatrixExpander::expand(&job).unwrap_err();
        assert_eq!(err.kind, ExpansionErrorKind::EmptyAxis);
        assert_eq!(err.job, "build");
        assert!(err.message.contains("build_type"));
    }

    #[test]
    fn test_exclude() {
        let job = matrix_job(
            "        os: [a, b]\n        build_type: [X, Y]\n        exclude:\n          - os: b\n            build_type: X",
        );
        let combos = MatrixExpander::expand(&job).unwrap();
        assert_eq!(pairs(&combos), vec!["(a, X)", "(a, Y)", "(b, Y)"]);
    }

    #[test]
    fn test_exclude_everything() {
        let job = matrix_job("        os: [a]\n        exclude:\n          - os: a");
        let err = MatrixExpander::expand(&job).unwrap_err();
        assert_eq!(err.kind, ExpansionErrorKind::EmptyMatrix);
    }

    #[test]
    fn test_include_merges_or_appends() {
        let job = matrix_job(
            "        os: [a, b]\n        include:\n          - os: a\n            extra: yes\n          - os: c",
        );
        let combos = MatrixExpander::expand(&job).unwrap();

        assert_eq!(combos.len(), 3);
        assert_eq!(combos[0].get("extra"), Some(&json!("yes")));
        assert_eq!(combos[1].get("extra"), None);
        assert_eq!(combos[2].get("os"), Some(&json!("c")));
    }

    #[test]
    fn test_include_only() {
        let job = matrix_job("        include:\n          - os: a\n          - os: b");
        let combos = MatrixExpander::expand(&job).unwrap();
        assert_eq!(pairs(&combos), vec!["(a)", "(b)"]);
    }

    #[test]
    fn test_instantiate_binds_runner_and_env() {
        let yaml = r#"
on: push
env:
  GLOBAL: g
jobs:
  build:
    runs-on: ${{ matrix.os }}
    env:
      MODE: mode-${{ matrix.build_type }}
    strategy:
      matrix:
        os: [ubuntu-latest, windows-latest]
        build_type: [Release]
    steps:
      - run: echo hi
"#;
        let workflow = parse(yaml).unwrap();
        let job = Arc::new(workflow.jobs[0].clone());
        let dir = tempfile::tempdir().unwrap();

        let instances = MatrixExpander::instantiate(&job, &workflow.env, dir.path()).unwrap();

        assert_eq!(instances.len(), 2);
        let second = &instances[1];
        assert_eq!(second.index, 1);
        assert_eq!(second.runner, "windows-latest");
        assert_eq!(second.label(), "build (windows-latest, Release)");
        assert_eq!(second.env.get("GLOBAL"), Some(&"g".to_string()));
        assert_eq!(second.env.get("MODE"), Some(&"mode-Release".to_string()));
        assert_eq!(second.env.get("MATRIX_OS"), Some(&"windows-latest".to_string()));
        assert_eq!(second.env.get("MATRIX_BUILD_TYPE"), Some(&"Release".to_string()));
        assert_eq!(second.env.get("CI"), Some(&"true".to_string()));
        assert_eq!(second.env.get("GANTRY_JOB"), Some(&"build".to_string()));
    }

    #[test]
    fn test_unresolved_runner() {
        let job = Arc::new(job(
            "on: push\njobs:\n  build:\n    runs-on: ${{ matrix.os }}\n    steps:\n      - run: echo\n",
        ));
        let err = MatrixExpander::instantiate(&job, &HashMap::new(), Path::new(".")).unwrap_err();
        assert_eq!(err.kind, ExpansionErrorKind::UnresolvedRunner);
    }
}
