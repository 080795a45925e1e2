// Workflow Document
// Serde shapes of the YAML text, before validation into the definition model

use serde::Deserialize;
use serde_yaml::{Mapping, Value as YamlValue};

use std::collections::HashMap;

/// Top-level structure of a workflow YAML file.
///
/// Jobs are kept as a raw mapping so declaration order survives.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowDocument {
    /// The name of the workflow
    #[serde(default)]
    pub name: Option<String>,

    /// The trigger configuration for the workflow
    #[serde(rename = "on")]
    pub on: Trigger,

    /// Workflow-level environment variables
    #[serde(default)]
    pub env: HashMap<String, YamlValue>,

    /// The jobs that make up this workflow, keyed by job id
    #[serde(default)]
    pub jobs: Mapping,
}

/// Trigger configuration for when the workflow should run.
///
/// Supports multiple trigger formats:
/// - Simple: `on: push`
/// - List: `on: [push, pull_request]`
/// - Detailed: `on: { push: { branches: [main] } }`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Trigger {
    /// Single event trigger: `on: push`
    Single(String),

    /// Multiple events: `on: [push, pull_request]`
    Multiple(Vec<String>),

    /// Detailed event configuration (filters are accepted but not evaluated)
    Detailed(Mapping),
}

impl Trigger {
    /// Event names in declaration order, duplicates removed.
    pub fn event_names(&self) -> Vec<String> {
        let names: Vec<String> = match self {
            Trigger::Single(name) => vec![name.clone()],
            Trigger::Multiple(names) => names.clone(),
            Trigger::Detailed(events) => events
                .keys()
                .filter_map(|k| k.as_str().map(str::to_string))
                .collect(),
        };

        let mut unique = Vec::with_capacity(names.len());
        for name in names {
            if !unique.contains(&name) {
                unique.push(name);
            }
        }
        unique
    }
}

/// A job within a workflow.
#[derive(Debug, Clone, Deserialize)]
pub struct JobDocument {
    /// Display name for the job
    #[serde(default)]
    pub name: Option<String>,

    /// Runner label or labels
    #[serde(default, rename = "runs-on")]
    pub runs_on: Option<RunsOnDocument>,

    /// Job-level environment variables
    #[serde(default)]
    pub env: HashMap<String, YamlValue>,

    /// Matrix strategy for running multiple job instances
    #[serde(default)]
    pub strategy: Option<StrategyDocument>,

    /// The steps that make up this job
    #[serde(default)]
    pub steps: Option<Vec<StepDocument>>,

    /// Default step timeout in minutes
    #[serde(default, rename = "timeout-minutes")]
    pub timeout_minutes: Option<u32>,
}

/// Runner specification - can be a string or a list of labels.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RunsOnDocument {
    Label(String),
    Labels(Vec<String>),
}

/// Strategy configuration for matrix builds.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyDocument {
    /// Matrix configuration, kept raw so axis order survives
    #[serde(default)]
    pub matrix: Option<YamlValue>,

    /// Whether to cancel all instances if one fails
    #[serde(default = "default_fail_fast", rename = "fail-fast")]
    pub fail_fast: bool,

    /// Maximum number of instances to run in parallel
    #[serde(default, rename = "max-parallel")]
    pub max_parallel: Option<u32>,
}

fn default_fail_fast() -> bool {
    true
}

/// A step within a job.
#[derive(Debug, Clone, Deserialize)]
pub struct StepDocument {
    /// Unique identifier for the step
    #[serde(default)]
    pub id: Option<String>,

    /// Display name for the step
    #[serde(default)]
    pub name: Option<String>,

    /// Shell command to run
    #[serde(default)]
    pub run: Option<String>,

    /// Shell to use for the run command
    #[serde(default)]
    pub shell: Option<String>,

    /// Working directory for the step
    #[serde(default, rename = "working-directory")]
    pub working_directory: Option<String>,

    /// Action to use (e.g., "actions/checkout@v4")
    #[serde(default)]
    pub uses: Option<String>,

    /// Inputs to pass to the action
    #[serde(default)]
    pub with: HashMap<String, YamlValue>,

    /// Step-level environment variables
    #[serde(default)]
    pub env: HashMap<String, YamlValue>,

    /// Step timeout in minutes
    #[serde(default, rename = "timeout-minutes")]
    pub timeout_minutes: Option<u32>,
}

/// Render a scalar YAML value as an environment/input string.
///
/// Returns `None` for sequences, mappings and tagged values.
pub fn scalar_to_string(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::Null => Some(String::new()),
        YamlValue::Bool(b) => Some(b.to_string()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Sequence(_) | YamlValue::Mapping(_) | YamlValue::Tagged(_) => None,
    }
}

/// Convert serde_yaml::Value to a JSON value for matrix bindings
pub fn yaml_to_json(yaml: &YamlValue) -> serde_json::Value {
    match yaml {
        YamlValue::Null => serde_json::Value::Null,
        YamlValue::Bool(b) => serde_json::Value::Bool(*b),
        YamlValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                serde_json::Value::from(i)
            } else if let Some(u) = n.as_u64() {
                serde_json::Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null)
            }
        }
        YamlValue::String(s) => serde_json::Value::String(s.clone()),
        YamlValue::Sequence(seq) => {
            serde_json::Value::Array(seq.iter().map(yaml_to_json).collect())
        }
        YamlValue::Mapping(map) => serde_json::Value::Object(
            map.iter()
                .filter_map(|(k, v)| k.as_str().map(|key| (key.to_string(), yaml_to_json(v))))
                .collect(),
        ),
        YamlValue::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_document() {
        let yaml = r#"
name: CI
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - run: echo "Hello, World!"
"#;
        let doc: WorkflowDocument = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(doc.name, Some("CI".to_string()));
        assert!(matches!(doc.on, Trigger::Single(ref s) if s == "push"));
        assert_eq!(doc.jobs.len(), 1);
    }

    #[test]
    fn test_trigger_formats() {
        let single: Trigger = serde_yaml::from_str("push").unwrap();
        assert_eq!(single.event_names(), vec!["push"]);

        let list: Trigger = serde_yaml::from_str("[push, pull_request, push]").unwrap();
        assert_eq!(list.event_names(), vec!["push", "pull_request"]);

        let detailed: Trigger = serde_yaml::from_str(
            "pull_request:\n  branches: [main]\npush:\n  branches: [main]\n",
        )
        .unwrap();
        assert_eq!(detailed.event_names(), vec!["pull_request", "push"]);
    }

    #[test]
    fn test_strategy_defaults() {
        let strategy: StrategyDocument = serde_yaml::from_str("matrix:\n  os: [a]\n").unwrap();
        assert!(strategy.fail_fast);
        assert!(strategy.max_parallel.is_none());

        let strategy: StrategyDocument =
            serde_yaml::from_str("fail-fast: false\nmax-parallel: 2\n").unwrap();
        assert!(!strategy.fail_fast);
        assert_eq!(strategy.max_parallel, Some(2));
    }

    #[test]
    fn test_step_with_inputs() {
        let yaml = r#"
uses: actions/checkout@v4
with:
  submodules: true
  fetch-depth: 1
"#;
        let step: StepDocument = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(step.uses.as_deref(), Some("actions/checkout@v4"));
        assert_eq!(step.with.get("submodules"), Some(&YamlValue::Bool(true)));
    }

    #[test]
    fn test_scalar_to_string() {
        assert_eq!(scalar_to_string(&YamlValue::Bool(true)), Some("true".to_string()));
        assert_eq!(
            scalar_to_string(&serde_yaml::from_str::<YamlValue>("1").unwrap()),
            Some("1".to_string())
        );
        assert_eq!(scalar_to_string(&YamlValue::Null), Some(String::new()));
        assert_eq!(scalar_to_string(&YamlValue::Sequence(vec![])), None);
    }

    #[test]
    fn test_yaml_to_json() {
        let yaml: YamlValue = serde_yaml::from_str("[1, 'two', true, {k: v}]").unwrap();
        assert_eq!(
            yaml_to_json(&yaml),
            serde_json::json!([1, "two", true, {"k": "v"}])
        );
    }
}
