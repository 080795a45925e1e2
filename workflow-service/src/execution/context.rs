// Runtime Environment
// Global environment assembly, per-instance accumulated environment and step exports

use crate::execution::instance::JobInstance;
use crate::expression::ExpressionContext;
use crate::workflow::models::{MatrixCombination, Step, WorkflowDefinition};

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Build the run-wide environment: process environment (optional), then the
/// workflow's `env`, then caller-supplied variables.
///
/// The host process environment is only read, never modified.
pub fn global_environment(
    definition: &WorkflowDefinition,
    inherit_process_env: bool,
    variables: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut global: HashMap<String, String> = if inherit_process_env {
        env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    } else {
        HashMap::new()
    };

    let empty = MatrixCombination::new();
    let rendered = ExpressionContext::new(&empty, &global, "").render_env(&definition.env);
    global.extend(rendered);
    global.extend(variables.iter().map(|(k, v)| (k.clone(), v.clone())));
    global
}

/// Variables and paths a step asked to pass on to later steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowCommands {
    pub env: Vec<(String, String)>,
    pub paths: Vec<String>,
}

impl WorkflowCommands {
    pub fn is_empty(&self) -> bool {
        self.env.is_empty() && self.paths.is_empty()
    }
}

/// Parse workflow commands from step output.
///
/// - `::set-env name=NAME::value`
/// - `::add-path::DIR`
pub fn parse_workflow_commands(output: &str) -> WorkflowCommands {
    let mut commands = WorkflowCommands::default();

    for line in output.lines() {
        let line = line.trim_start();
        if let Some(rest) = line.strip_prefix("::set-env ") {
            let Some((props, value)) = rest.split_once("::") else {
                continue;
            };
            let name = props
                .split(',')
                .find_map(|prop| prop.trim().strip_prefix("name="))
                .map(str::trim);
            match name {
                Some(name) if !name.is_empty() && !name.contains('=') => {
                    commands.env.push((name.to_string(), value.to_string()));
                }
                _ => tracing::warn!(line = %line, "ignoring malformed set-env command"),
            }
        } else if let Some(dir) = line.strip_prefix("::add-path::") {
            let dir = dir.trim();
            if !dir.is_empty() {
                commands.paths.push(dir.to_string());
            }
        }
    }

    commands
}

/// The environment of one running instance, growing as steps export values.
#[derive(Debug, Clone)]
pub struct InstanceEnvironment {
    base: HashMap<String, String>,
    exported: HashMap<String, String>,
    path_prefixes: Vec<PathBuf>,
}

impl InstanceEnvironment {
    pub fn new(instance: &JobInstance) -> Self {
        Self {
            base: instance.env.clone(),
            exported: HashMap::new(),
            path_prefixes: Vec::new(),
        }
    }

    /// Base environment overlaid with everything exported so far.
    pub fn current(&self) -> HashMap<String, String> {
        let mut vars = self.base.clone();
        vars.extend(self.exported.iter().map(|(k, v)| (k.clone(), v.clone())));

        if !self.path_prefixes.is_empty() {
            let key = vars
                .keys()
                .find(|k| k.eq_ignore_ascii_case("PATH"))
                .cloned()
                .unwrap_or_else(|| "PATH".to_string());
            let existing = vars.get(&key).cloned().unwrap_or_default();
            // Most recently added directory first
            let dirs = self
                .path_prefixes
                .iter()
                .rev()
                .cloned()
                .chain(env::split_paths(&existing).filter(|p| !p.as_os_str().is_empty()));
            match env::join_paths(dirs) {
                Ok(joined) => {
                    vars.insert(key, joined.to_string_lossy().into_owned());
                }
                Err(e) => tracing::warn!(error = %e, "could not extend PATH"),
            }
        }

        vars
    }

    /// Environment for one step: the current environment plus the step's own
    /// `env`, rendered against the instance's matrix and runner.
    pub fn for_step(&self, step: &Step, instance: &JobInstance) -> HashMap<String, String> {
        let mut env = self.current();
        let step_env = ExpressionContext::new(&instance.combination, &env, &instance.runner)
            .render_env(&step.env);
        env.extend(step_env);
        env
    }

    /// Apply a step's exports so later steps see them.
    pub fn apply(&mut self, commands: &WorkflowCommands) {
        for (name, value) in &commands.env {
            self.exported.insert(name.clone(), value.clone());
        }
        self.path_prefixes
            .extend(commands.paths.iter().map(PathBuf::from));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::matrix::MatrixExpander;
    use crate::workflow::parser::parse;

    use std::path::Path;
    use std::sync::Arc;

    const WORKFLOW: &str = r#"
on: push
env:
  LEVEL: global
  SHARED: from-workflow
jobs:
  build:
    runs-on: ubuntu-latest
    env:
      LEVEL: job
    strategy:
      matrix:
        os: [linux]
    steps:
      - run: echo one
        env:
          LEVEL: step-${{ matrix.os }}
"#;

    fn instance() -> (WorkflowDefinition, JobInstance) {
        let workflow = parse(WORKFLOW).unwrap();
        let global = global_environment(&workflow, false, &HashMap::new());
        let job = Arc::new(workflow.jobs[0].clone());
        let instance = MatrixExpander::instantiate(&job, &global, Path::new("."))
            .unwrap()
            .remove(0);
        (workflow, instance)
    }

    #[test]
    fn test_global_environment_layers() {
        let workflow = parse(WORKFLOW).unwrap();
        let vars = HashMap::from([("SHARED".to_string(), "from-cli".to_string())]);

        let isolated = global_environment(&workflow, false, &vars);
        assert_eq!(isolated.get("LEVEL"), Some(&"global".to_string()));
        assert_eq!(isolated.get("SHARED"), Some(&"from-cli".to_string()));
        assert_eq!(isolated.len(), 2);

        let inherited = global_environment(&workflow, true, &HashMap::new());
        assert!(inherited.len() >= 2);
        assert_eq!(inherited.get("LEVEL"), Some(&"global".to_string()));
    }

    #[test]
    fn test_step_env_overrides_job_env() {
        let (workflow, instance) = instance();
        let env = InstanceEnvironment::new(&instance);

        assert_eq!(env.current().get("LEVEL"), Some(&"job".to_string()));

        let step = &workflow.jobs[0].steps[0];
        let step_env = env.for_step(step, &instance);
        assert_eq!(step_env.get("LEVEL"), Some(&"step-linux".to_string()));
        assert_eq!(step_env.get("MATRIX_OS"), Some(&"linux".to_string()));
    }

    #[test]
    fn test_exports_accumulate() {
        let (_, instance) = instance();
        let mut env = InstanceEnvironment::new(&instance);

        env.apply(&parse_workflow_commands(
            "::set-env name=VERSION::1.2.3\n::add-path::/opt/tool/bin\n",
        ));
        env.apply(&parse_workflow_commands("::add-path::/opt/other/bin"));

        let current = env.current();
        assert_eq!(current.get("VERSION"), Some(&"1.2.3".to_string()));
        let path = current.get("PATH").unwrap();
        assert!(path.starts_with("/opt/other/bin"));
        assert!(path.contains("/opt/tool/bin"));
    }

    #[test]
    fn test_parse_workflow_commands() {
        let output = r#"
Compiling...
::set-env name=FOO::bar baz
  ::set-env name=EMPTY::
::set-env name=::nothing
::set-env FOO=bar
::add-path::/usr/local/bin
::add-path::
done
"#;
        let commands = parse_workflow_commands(output);

        assert_eq!(
            commands.env,
            vec![
                ("FOO".to_string(), "bar baz".to_string()),
                ("EMPTY".to_string(), String::new()),
            ]
        );
        assert_eq!(commands.paths, vec!["/usr/local/bin"]);
        assert!(!commands.is_empty());
        assert!(parse_workflow_commands("plain output").is_empty());
    }
}
