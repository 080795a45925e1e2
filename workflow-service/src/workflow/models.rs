// Workflow Definition Model
// Validated, immutable representation of a parsed workflow

use crate::runners::shell::Shell;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use std::collections::HashMap;
use std::fmt;

/// A parsed workflow: triggers, global environment and jobs in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowDefinition {
    /// The name of the workflow, if declared
    pub name: Option<String>,

    /// Event names that activate this workflow, in declaration order
    pub triggers: Vec<String>,

    /// Workflow-level environment variables
    pub env: HashMap<String, String>,

    /// Jobs in declaration order
    pub jobs: Vec<Job>,
}

impl WorkflowDefinition {
    /// Whether the given event name activates this workflow.
    pub fn is_triggered_by(&self, event: &str) -> bool {
        self.triggers.iter().any(|t| t == event)
    }

    /// Look up a job by identifier.
    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// Display name used in reports and events.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("workflow")
    }
}

/// A job within a workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    /// Job identifier (the key under `jobs:`)
    pub id: String,

    /// Display name for the job
    pub name: Option<String>,

    /// Runner selector, may reference matrix values (`${{ matrix.os }}`)
    pub runs_on: RunsOn,

    /// Job-level environment variables
    pub env: HashMap<String, String>,

    /// Matrix specification; empty means a single implicit combination
    pub matrix: MatrixSpec,

    /// Whether one failing instance cancels its siblings
    pub fail_fast: bool,

    /// Maximum number of instances running at once
    pub max_parallel: Option<usize>,

    /// Default per-step timeout in minutes
    pub timeout_minutes: Option<u32>,

    /// Steps in execution order
    pub steps: Vec<Step>,
}

impl Job {
    /// Display name, falling back to the identifier.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Runner selector - a single label or a list of labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RunsOn {
    /// `runs-on: ubuntu-latest` or `runs-on: ${{ matrix.os }}`
    Label(String),

    /// `runs-on: [self-hosted, linux]`
    Labels(Vec<String>),
}

impl RunsOn {
    /// All label expressions in declaration order.
    pub fn labels(&self) -> Vec<&str> {
        match self {
            RunsOn::Label(label) => vec![label.as_str()],
            RunsOn::Labels(labels) => labels.iter().map(String::as_str).collect(),
        }
    }
}

/// A job's matrix: ordered axes plus include/exclude adjustments.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatrixSpec {
    /// Axes in declaration order
    pub axes: Vec<MatrixAxis>,

    /// Extra combinations (or extra keys merged into matching combinations)
    pub include: Vec<MatrixCombination>,

    /// Partial combinations removed from the product
    pub exclude: Vec<MatrixCombination>,
}

impl MatrixSpec {
    /// True when no axes and no includes are declared.
    pub fn is_empty(&self) -> bool {
        self.axes.is_empty() && self.include.is_empty()
    }

    /// Check whether a name is one of the declared axes.
    pub fn has_axis(&self, name: &str) -> bool {
        self.axes.iter().any(|a| a.name == name)
    }
}

/// A named dimension of variation with its ordered values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixAxis {
    pub name: String,
    pub values: Vec<Value>,
}

impl MatrixAxis {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// One concrete binding of axis names to values, in axis order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatrixCombination {
    bindings: Vec<(String, Value)>,
}

impl MatrixCombination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from ordered pairs. Later duplicates replace earlier ones.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut combination = Self::new();
        for (name, value) in pairs {
            combination.insert(name, value);
        }
        combination
    }

    /// Bind a value, replacing an existing binding in place.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.bindings.iter_mut().find(|(k, _)| *k == name) {
            Some((_, existing)) => *existing = value,
            None => self.bindings.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// True when every binding of `partial` is present here with an equal value.
    pub fn matches(&self, partial: &MatrixCombination) -> bool {
        partial
            .iter()
            .all(|(name, value)| self.get(name) == Some(value))
    }
}

impl fmt::Display for MatrixCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bindings.is_empty() {
            return Ok(());
        }
        let values: Vec<String> = self
            .bindings
            .iter()
            .map(|(_, v)| value_to_string(v))
            .collect();
        write!(f, "({})", values.join(", "))
    }
}

impl Serialize for MatrixCombination {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.bindings.len()))?;
        for (name, value) in &self.bindings {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Render a matrix value the way it appears in commands and labels.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// A step within a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    /// Unique identifier for the step
    pub id: Option<String>,

    /// Display name for the step
    pub name: Option<String>,

    /// Step-scoped environment variables (not exported to later steps)
    pub env: HashMap<String, String>,

    /// Step timeout in minutes
    pub timeout_minutes: Option<u32>,

    /// What the step does
    pub action: StepAction,
}

impl Step {
    /// Identifier used in reports: `id`, then `name`, then its 1-based position.
    pub fn identifier(&self, index: usize) -> String {
        self.id
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| format!("step {}", index + 1))
    }

    /// Get a display name for the step.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match &self.action {
            StepAction::Checkout(opts) => format!("Run {}", opts.uses),
            StepAction::Toolchain(opts) => format!("Run {}", opts.uses),
            StepAction::Run(run) => {
                // Truncate long commands
                let first_line = run.command.lines().next().unwrap_or(&run.command);
                if first_line.chars().count() > 50 {
                    let head: String = first_line.chars().take(47).collect();
                    format!("Run {}...", head)
                } else {
                    format!("Run {}", first_line)
                }
            }
        }
    }
}

/// The kinds of work a step can perform.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    /// Fetch source into the workspace
    Checkout(CheckoutOptions),

    /// Make a toolchain available to later steps
    Toolchain(ToolchainOptions),

    /// Run a literal command string
    Run(RunCommand),
}

/// Options for a checkout step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutOptions {
    /// The action reference this step was declared with
    pub uses: String,

    /// Whether to initialise submodules (recursively)
    pub submodules: bool,

    /// Shallow fetch depth, if requested
    pub fetch_depth: Option<u32>,
}

/// Options for a toolchain setup step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolchainOptions {
    /// The action reference this step was declared with
    pub uses: String,

    /// Installation profile (`minimal`, `default`, ...)
    pub profile: Option<String>,

    /// Toolchain channel or version, may reference matrix values
    pub toolchain: String,

    /// Whether to set the toolchain as the workspace override
    pub override_default: bool,

    /// Extra components to install
    pub components: Vec<String>,
}

/// A command step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunCommand {
    /// The literal command text
    pub command: String,

    /// Shell to run it with
    pub shell: Shell,

    /// Working directory relative to the workspace
    pub working_directory: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run_step(command: &str) -> Step {
        Step {
            id: None,
            name: None,
            env: HashMap::new(),
            timeout_minutes: None,
            action: StepAction::Run(RunCommand {
                command: command.to_string(),
                shell: Shell::Default,
                working_directory: None,
            }),
        }
    }

    #[test]
    fn test_combination_insert_replaces_in_place() {
        let mut combo = MatrixCombination::from_pairs([("os", json!("a")), ("rust", json!("stable"))]);
        combo.insert("os", json!("b"));

        let names: Vec<_> = combo.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["os", "rust"]);
        assert_eq!(combo.get("os"), Some(&json!("b")));
    }

    #[test]
    fn test_combination_matches_partial() {
        let combo = MatrixCombination::from_pairs([("os", json!("a")), ("build_type", json!("X"))]);

        assert!(combo.matches(&MatrixCombination::from_pairs([("os", json!("a"))])));
        assert!(!combo.matches(&MatrixCombination::from_pairs([("os", json!("b"))])));
        assert!(!combo.matches(&MatrixCombination::from_pairs([("arch", json!("x64"))])));
        assert!(combo.matches(&MatrixCombination::new()));
    }

    #[test]
    fn test_combination_display() {
        let combo = MatrixCombination::from_pairs([("os", json!("ubuntu")), ("node", json!(18))]);
        assert_eq!(combo.to_string(), "(ubuntu, 18)");
        assert_eq!(MatrixCombination::new().to_string(), "");
    }

    #[test]
    fn test_combination_serializes_in_axis_order() {
        let combo = MatrixCombination::from_pairs([("z", json!(1)), ("a", json!(2))]);
        assert_eq!(serde_json::to_string(&combo).unwrap(), r#"{"z":1,"a":2}"#);
    }

    #[test]
    fn test_step_identifier_fallbacks() {
        let mut step = run_step("cargo build");
        assert_eq!(step.identifier(2), "step 3");

        step.name = Some("Build".to_string());
        assert_eq!(step.identifier(2), "Build");

        step.id = Some("build".to_string());
        assert_eq!(step.identifier(2), "build");
    }

    #[test]
    fn test_step_display_name_truncates() {
        let step = run_step(&"x".repeat(80));
        let name = step.display_name();
        assert!(name.ends_with("..."));
        assert!(name.len() < 60);

        assert_eq!(run_step("cargo test\ncargo doc").display_name(), "Run cargo test");
    }

    #[test]
    fn test_runs_on_labels() {
        assert_eq!(RunsOn::Label("ubuntu".to_string()).labels(), vec!["ubuntu"]);
        assert_eq!(
            RunsOn::Labels(vec!["self-hosted".to_string(), "linux".to_string()]).labels(),
            vec!["self-hosted", "linux"]
        );
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&json!("x")), "x");
        assert_eq!(value_to_string(&json!(3)), "3");
        assert_eq!(value_to_string(&json!(true)), "true");
        assert_eq!(value_to_string(&json!(null)), "");
        assert_eq!(value_to_string(&json!({"a": 1})), r#"{"a":1}"#);
    }
}
