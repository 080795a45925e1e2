use crate::expression;
use crate::runners::shell::Shell;
use crate::workflow::document::{
    scalar_to_string, yaml_to_json, JobDocument, RunsOnDocument, StepDocument, WorkflowDocument,
};
use crate::workflow::error::{ParseError, ParseResult};
use crate::workflow::models::{
    CheckoutOptions, Job, MatrixAxis, MatrixCombination, MatrixSpec, RunCommand, RunsOn, Step,
    StepAction, ToolchainOptions, WorkflowDefinition,
};
use crate::workflow::trigger::TriggerPolicy;
use crate::ServiceResult;

use serde_yaml::{Mapping, Value as YamlValue};

use std::collections::HashMap;
use std::fs;
use std::path::Path;

const CHECKOUT_ACTION: &str = "actions/checkout";
const ACTIONS_RS_TOOLCHAIN: &str = "actions-rs/toolchain";
const DTOLNAY_TOOLCHAIN: &str = "dtolnay/rust-toolchain";

/// Parse workflow text with the default trigger policy.
pub fn parse(content: &str) -> ParseResult<WorkflowDefinition> {
    WorkflowParser::new().parse(content)
}

/// Parser for GitHub Actions style workflow YAML.
#[derive(Debug, Clone, Default)]
pub struct WorkflowParser {
    triggers: TriggerPolicy,
}

impl WorkflowParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom set of recognised trigger events.
    pub fn with_triggers(triggers: TriggerPolicy) -> Self {
        Self { triggers }
    }

    /// Parse a workflow from a file path.
    pub fn from_file<P: AsRef<Path>>(&self, path: P) -> ServiceResult<WorkflowDefinition> {
        let content = fs::read_to_string(path)?;
        Ok(self.parse(&content)?)
    }

    /// Parse and validate a workflow from a YAML string.
    pub fn parse(&self, content: &str) -> ParseResult<WorkflowDefinition> {
        let document: WorkflowDocument = serde_yaml::from_str(content)
            .map_err(|e| ParseError::from_yaml_error(&e, content))?;

        Converter {
            source: content,
            triggers: &self.triggers,
        }
        .workflow(document)
    }
}

/// Validated conversion from the serde document into the definition model.
struct Converter<'a> {
    source: &'a str,
    triggers: &'a TriggerPolicy,
}

impl Converter<'_> {
    fn workflow(&self, document: WorkflowDocument) -> ParseResult<WorkflowDefinition> {
        let triggers = document.on.event_names();
        if triggers.is_empty() {
            return Err(self.malformed("workflow declares no trigger events", "on"));
        }
        for event in &triggers {
            if !self.triggers.is_supported(event) {
                let supported: Vec<&str> = self.triggers.supported().collect();
                return Err(ParseError::unsupported_trigger(event)
                    .locate(self.source, event)
                    .with_suggestion(format!("supported events: {}", supported.join(", "))));
            }
        }

        let env = self.env(&document.env, "env")?;

        if document.jobs.is_empty() {
            return Err(self
                .malformed("workflow has no jobs", "jobs")
                .with_suggestion("add at least one job under 'jobs:'"));
        }

        let mut jobs = Vec::with_capacity(document.jobs.len());
        for (key, value) in &document.jobs {
            let id = key
                .as_str()
                .ok_or_else(|| self.malformed("job identifiers must be strings", "jobs"))?;
            let job: JobDocument = serde_yaml::from_value(value.clone())
                .map_err(|e| self.malformed(format!("job '{}': {}", id, e), id))?;
            jobs.push(self.job(id, job)?);
        }

        Ok(WorkflowDefinition {
            name: document.name,
            triggers,
            env,
            jobs,
        })
    }

    fn job(&self, id: &str, document: JobDocument) -> ParseResult<Job> {
        let runs_on = match document.runs_on {
            Some(RunsOnDocument::Label(label)) if !label.trim().is_empty() => RunsOn::Label(label),
            Some(RunsOnDocument::Labels(labels)) if !labels.is_empty() => RunsOn::Labels(labels),
            _ => {
                return Err(self
                    .malformed(format!("job '{}' is missing 'runs-on'", id), id)
                    .with_suggestion("add 'runs-on: ubuntu-latest' (or another runner label)"))
            }
        };
        for label in runs_on.labels() {
            self.expression(label, id, &format!("job '{}' runs-on", id))?;
        }

        let env = self.env(&document.env, id)?;

        let (matrix, fail_fast, max_parallel) = match &document.strategy {
            Some(strategy) => {
                let matrix = match &strategy.matrix {
                    Some(matrix) => self.matrix(id, matrix)?,
                    None => MatrixSpec::default(),
                };
                let max_parallel = match strategy.max_parallel {
                    Some(0) => {
                        return Err(self.malformed(
                            format!("job '{}': max-parallel must be at least 1", id),
                            "max-parallel",
                        ))
                    }
                    other => other.map(|n| n as usize),
                };
                (matrix, strategy.fail_fast, max_parallel)
            }
            None => (MatrixSpec::default(), true, None),
        };

        if document.timeout_minutes == Some(0) {
            return Err(self.malformed(
                format!("job '{}': timeout-minutes must be at least 1", id),
                id,
            ));
        }

        let step_documents = match document.steps {
            Some(steps) if !steps.is_empty() => steps,
            _ => {
                return Err(self
                    .malformed(format!("job '{}' has no steps", id), id)
                    .with_suggestion(
                        "jobs must have a 'steps' field. Add steps to define what the job should do.",
                    ))
            }
        };

        let steps = step_documents
            .into_iter()
            .enumerate()
            .map(|(index, step)| self.step(id, index, step))
            .collect::<ParseResult<Vec<_>>>()?;

        Ok(Job {
            id: id.to_string(),
            name: document.name,
            runs_on,
            env,
            matrix,
            fail_fast,
            max_parallel,
            timeout_minutes: document.timeout_minutes,
            steps,
        })
    }

    fn matrix(&self, job_id: &str, value: &YamlValue) -> ParseResult<MatrixSpec> {
        let mapping = value.as_mapping().ok_or_else(|| {
            self.malformed(
                format!(
                    "job '{}': matrix must be a mapping of axis names to value lists",
                    job_id
                ),
                "matrix",
            )
        })?;

        let mut spec = MatrixSpec::default();
        for (key, values) in mapping {
            let name = key.as_str().ok_or_else(|| {
                self.malformed(
                    format!("job '{}': matrix axis names must be strings", job_id),
                    "matrix",
                )
            })?;

            match name {
                "include" => spec.include = self.combinations(job_id, name, values)?,
                "exclude" => spec.exclude = self.combinations(job_id, name, values)?,
                _ => {
                    let sequence = values.as_sequence().ok_or_else(|| {
                        self.malformed(
                            format!("job '{}': matrix axis '{}' must be a list", job_id, name),
                            name,
                        )
                    })?;
                    spec.axes.push(MatrixAxis::new(
                        name,
                        sequence.iter().map(yaml_to_json).collect(),
                    ));
                }
            }
        }

        for entry in &spec.exclude {
            if let Some((unknown, _)) = entry.iter().find(|(k, _)| !spec.has_axis(k)) {
                return Err(self.malformed(
                    format!(
                        "job '{}': exclude references unknown matrix axis '{}'",
                        job_id, unknown
                    ),
                    "exclude",
                ));
            }
        }

        Ok(spec)
    }

    fn combinations(
        &self,
        job_id: &str,
        key: &str,
        value: &YamlValue,
    ) -> ParseResult<Vec<MatrixCombination>> {
        let entries = value.as_sequence().ok_or_else(|| {
            self.malformed(
                format!("job '{}': matrix {} must be a list of mappings", job_id, key),
                key,
            )
        })?;

        entries
            .iter()
            .map(|entry| -> ParseResult<MatrixCombination> {
                let mapping: &Mapping = entry.as_mapping().ok_or_else(|| {
                    self.malformed(
                        format!("job '{}': matrix {} entries must be mappings", job_id, key),
                        key,
                    )
                })?;
                Ok(MatrixCombination::from_pairs(mapping.iter().filter_map(
                    |(k, v)| k.as_str().map(|name| (name.to_string(), yaml_to_json(v))),
                )))
            })
            .collect()
    }

    fn step(&self, job_id: &str, index: usize, document: StepDocument) -> ParseResult<Step> {
        let label = document
            .id
            .clone()
            .or_else(|| document.name.clone())
            .unwrap_or_else(|| format!("step {}", index + 1));
        let whom = format!("step '{}' in job '{}'", label, job_id);

        if document.timeout_minutes == Some(0) {
            return Err(self.malformed(
                format!("{}: timeout-minutes must be at least 1", whom),
                "timeout-minutes",
            ));
        }

        let env = self.env(&document.env, job_id)?;

        let action = match (document.run, document.uses) {
            (Some(_), Some(_)) => {
                return Err(self.malformed(
                    format!("{} cannot have both 'run' and 'uses'", whom),
                    job_id,
                ))
            }
            (None, None) => {
                return Err(self.malformed(
                    format!("{} must have either 'run' or 'uses'", whom),
                    job_id,
                ))
            }
            (Some(command), None) => {
                self.expression(&command, "run", &whom)?;
                let shell = match document.shell.as_deref() {
                    Some(shell) => shell.parse::<Shell>().map_err(|e| {
                        self.malformed(format!("{}: {}", whom, e), "shell")
                    })?,
                    None => Shell::Default,
                };
                StepAction::Run(RunCommand {
                    command,
                    shell,
                    working_directory: document.working_directory,
                })
            }
            (None, Some(uses)) => self.action(&whom, uses, &document.with)?,
        };

        Ok(Step {
            id: document.id,
            name: document.name,
            env,
            timeout_minutes: document.timeout_minutes,
            action,
        })
    }

    fn action(
        &self,
        whom: &str,
        uses: String,
        with: &HashMap<String, YamlValue>,
    ) -> ParseResult<StepAction> {
        let (action, revision) = match uses.split_once('@') {
            Some((action, revision)) => (action, Some(revision)),
            None => (uses.as_str(), None),
        };

        match action {
            CHECKOUT_ACTION => {
                let submodules = match with.get("submodules") {
                    None => false,
                    Some(YamlValue::Bool(b)) => *b,
                    Some(YamlValue::String(s)) if s == "true" || s == "recursive" => true,
                    Some(YamlValue::String(s)) if s == "false" => false,
                    Some(other) => {
                        return Err(self.malformed(
                            format!(
                                "{}: invalid 'submodules' value {:?}, expected true, false or recursive",
                                whom,
                                scalar_to_string(other).unwrap_or_default()
                            ),
                            "submodules",
                        ))
                    }
                };
                let fetch_depth = match with.get("fetch-depth") {
                    None => None,
                    Some(value) => Some(
                        value
                            .as_u64()
                            .and_then(|n| u32::try_from(n).ok())
                            .ok_or_else(|| {
                                self.malformed(
                                    format!("{}: 'fetch-depth' must be a non-negative number", whom),
                                    "fetch-depth",
                                )
                            })?,
                    ),
                };
                Ok(StepAction::Checkout(CheckoutOptions {
                    uses: uses.clone(),
                    submodules,
                    fetch_depth,
                }))
            }
            ACTIONS_RS_TOOLCHAIN | DTOLNAY_TOOLCHAIN => {
                let dtolnay = action == DTOLNAY_TOOLCHAIN;
                let toolchain = match self.input(whom, with, "toolchain")? {
                    Some(toolchain) => toolchain,
                    None if dtolnay => match revision {
                        Some(rev) if !matches!(rev, "master" | "main" | "v1") => rev.to_string(),
                        _ => {
                            return Err(self.malformed(
                                format!("{}: '{}' needs a 'toolchain' input", whom, uses),
                                "uses",
                            ))
                        }
                    },
                    None => {
                        return Err(self
                            .malformed(format!("{}: missing required input 'toolchain'", whom), "uses")
                            .with_suggestion("add 'with: { toolchain: stable }'"))
                    }
                };
                self.expression(&toolchain, "toolchain", whom)?;

                let override_default = match with.get("override") {
                    None => dtolnay,
                    Some(YamlValue::Bool(b)) => *b,
                    Some(YamlValue::String(s)) if s == "true" || s == "false" => s == "true",
                    Some(_) => {
                        return Err(self.malformed(
                            format!("{}: 'override' must be true or false", whom),
                            "override",
                        ))
                    }
                };

                let components = match with.get("components") {
                    None => Vec::new(),
                    Some(YamlValue::Sequence(items)) => {
                        items.iter().filter_map(scalar_to_string).collect()
                    }
                    Some(value) => scalar_to_string(value)
                        .unwrap_or_default()
                        .split(',')
                        .map(str::trim)
                        .filter(|c| !c.is_empty())
                        .map(str::to_string)
                        .collect(),
                };

                Ok(StepAction::Toolchain(ToolchainOptions {
                    uses: uses.clone(),
                    profile: self.input(whom, with, "profile")?,
                    toolchain,
                    override_default,
                    components,
                }))
            }
            _ => Err(self
                .malformed(format!("{}: unsupported action '{}'", whom, uses), "uses")
                .with_suggestion(format!(
                    "supported actions: {}, {}, {}",
                    CHECKOUT_ACTION, ACTIONS_RS_TOOLCHAIN, DTOLNAY_TOOLCHAIN
                ))),
        }
    }

    fn input(
        &self,
        whom: &str,
        with: &HashMap<String, YamlValue>,
        key: &str,
    ) -> ParseResult<Option<String>> {
        with.get(key)
            .map(|value| {
                scalar_to_string(value).ok_or_else(|| {
                    self.malformed(format!("{}: input '{}' must be a scalar", whom, key), key)
                })
            })
            .transpose()
    }

    fn env(
        &self,
        env: &HashMap<String, YamlValue>,
        locate_key: &str,
    ) -> ParseResult<HashMap<String, String>> {
        env.iter()
            .map(|(name, value)| {
                let value = scalar_to_string(value).ok_or_else(|| {
                    self.malformed(
                        format!("environment variable '{}' must be a scalar value", name),
                        locate_key,
                    )
                })?;
                self.expression(&value, name, &format!("environment variable '{}'", name))?;
                Ok((name.clone(), value))
            })
            .collect()
    }

    fn expression(&self, text: &str, locate_key: &str, whom: &str) -> ParseResult<()> {
        expression::validate(text)
            .map_err(|e| self.malformed(format!("{}: {}", whom, e), locate_key))
    }

    fn malformed(&self, message: impl Into<String>, locate_key: &str) -> ParseError {
        ParseError::malformed(message).locate(self.source, locate_key)
    }
}
