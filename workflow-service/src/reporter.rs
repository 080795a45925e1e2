// Run Reporter
// Renders a workflow run result as terminal text, JSON or JUnit XML

use crate::error::ServiceResult;
use crate::execution::result::{
    humanize, JobRunResult, RunResult, RunStatus, StepFailure, WorkflowRunResult,
};

use std::fmt;

/// Output format for run reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// Human-readable terminal output
    #[default]
    Terminal,
    /// Machine-readable JSON
    Json,
    /// JUnit XML format (for CI systems)
    JUnit,
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::Terminal => write!(f, "terminal"),
            ReportFormat::Json => write!(f, "json"),
            ReportFormat::JUnit => write!(f, "junit"),
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "terminal" | "text" | "console" => Ok(ReportFormat::Terminal),
            "json" => Ok(ReportFormat::Json),
            "junit" | "junit-xml" | "xml" => Ok(ReportFormat::JUnit),
            _ => Err(format!(
                "Unknown report format '{}'. Valid formats: terminal, json, junit",
                s
            )),
        }
    }
}

/// Run reporter that generates output in various formats
pub struct Reporter;

impl Reporter {
    /// Generate a report in the specified format
    pub fn report(result: &WorkflowRunResult, format: ReportFormat) -> ServiceResult<String> {
        Ok(match format {
            ReportFormat::Terminal => Self::to_terminal(result),
            ReportFormat::Json => Self::to_json(result)?,
            ReportFormat::JUnit => Self::to_junit_xml(result),
        })
    }

    pub fn to_json(result: &WorkflowRunResult) -> ServiceResult<String> {
        Ok(serde_json::to_string_pretty(result)?)
    }

    /// Every instance by its matrix binding, with its terminal status and
    /// first failing step.
    pub fn to_terminal(result: &WorkflowRunResult) -> String {
        let mut out = String::new();

        out.push_str(&format!("\nWorkflow: {}\n", result.workflow));
        out.push_str(&"=".repeat(60));
        out.push('\n');

        for job in &result.jobs {
            if let Some(error) = &job.expansion_error {
                out.push_str(&format!("  [x] {} (not expanded)\n", job.job_name));
                out.push_str(&format!("       {}\n", error.message));
                continue;
            }

            for instance in &job.instances {
                out.push_str(&format!(
                    "  [{}] {:<9} {} ({})\n",
                    symbol(instance.status),
                    instance.status.to_string(),
                    instance.instance.label,
                    humanize(instance.duration),
                ));

                if let Some((step, failure)) = instance.first_failure() {
                    out.push_str(&format!(
                        "       step '{}' failed: {}\n",
                        step.identifier,
                        failure_headline(failure)
                    ));
                    for line in failure.diagnostic().lines() {
                        out.push_str(&format!("         {}\n", line));
                    }
                }
            }
        }

        out.push_str(&"-".repeat(60));
        out.push('\n');

        let total = result.instances().count();
        let failed = result.count(RunStatus::Failed);
        let cancelled = result.count(RunStatus::Cancelled);
        let status_line = match result.status {
            RunStatus::Succeeded => format!(
                "  All {} instances succeeded ({})",
                total,
                humanize(result.duration)
            ),
            _ => format!(
                "  {}: {} failed, {} cancelled, {} succeeded of {} ({})",
                result.status,
                failed,
                cancelled,
                result.count(RunStatus::Succeeded),
                total,
                humanize(result.duration)
            ),
        };
        out.push_str(&status_line);
        out.push('\n');

        let unexpanded = result
            .jobs
            .iter()
            .filter(|j| j.expansion_error.is_some())
            .count();
        if unexpanded > 0 {
            out.push_str(&format!("  {} jobs could not be expanded\n", unexpanded));
        }

        out.push('\n');
        out
    }

    /// Generate JUnit XML output: one test suite per job, one test case per
    /// instance. Cancelled instances are reported as skipped.
    pub fn to_junit_xml(result: &WorkflowRunResult) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");

        let total: usize = result.jobs.iter().map(case_count).sum();
        let errors = result
            .jobs
            .iter()
            .filter(|j| j.expansion_error.is_some())
            .count();
        xml.push_str(&format!(
            "<testsuites name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\" time=\"{:.3}\">\n",
            xml_escape(&result.workflow),
            total,
            result.count(RunStatus::Failed),
            errors,
            result.count(RunStatus::Cancelled),
            result.duration.as_secs_f64()
        ));

        for job in &result.jobs {
            let failures = job
                .instances
                .iter()
                .filter(|r| r.status == RunStatus::Failed)
                .count();
            let skipped = job
                .instances
                .iter()
                .filter(|r| r.status == RunStatus::Cancelled)
                .count();
            let time: f64 = job.instances.iter().map(|r| r.duration.as_secs_f64()).sum();

            xml.push_str(&format!(
                "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\" time=\"{:.3}\">\n",
                xml_escape(&job.job_name),
                case_count(job),
                failures,
                usize::from(job.expansion_error.is_some()),
                skipped,
                time
            ));

            if let Some(error) = &job.expansion_error {
                xml.push_str(&format!(
                    "    <testcase name=\"{}\" classname=\"{}\">\n",
                    xml_escape(&job.job_name),
                    xml_escape(&job.job_id)
                ));
                xml.push_str(&format!(
                    "      <error message=\"{}\" type=\"{:?}\" />\n",
                    xml_escape(&error.message),
                    error.kind
                ));
                xml.push_str("    </testcase>\n");
            }

            for instance in &job.instances {
                push_testcase(&mut xml, job, instance);
            }

            xml.push_str("  </testsuite>\n");
        }

        xml.push_str("</testsuites>\n");
        xml
    }
}

fn push_testcase(xml: &mut String, job: &JobRunResult, instance: &RunResult) {
    xml.push_str(&format!(
        "    <testcase name=\"{}\" classname=\"{}\" time=\"{:.3}\"",
        xml_escape(&instance.instance.label),
        xml_escape(&job.job_id),
        instance.duration.as_secs_f64()
    ));

    match instance.status {
        RunStatus::Succeeded => xml.push_str(" />\n"),
        RunStatus::Cancelled => {
            xml.push_str(">\n");
            xml.push_str("      <skipped message=\"cancelled\" />\n");
            xml.push_str("    </testcase>\n");
        }
        RunStatus::Failed => {
            xml.push_str(">\n");
            match instance.first_failure() {
                Some((step, failure)) => {
                    xml.push_str(&format!(
                        "      <failure message=\"step '{}' failed: {}\">\n",
                        xml_escape(&step.identifier),
                        xml_escape(&failure_headline(failure))
                    ));
                    xml.push_str(&xml_escape(&failure.diagnostic()));
                    xml.push('\n');
                    xml.push_str("      </failure>\n");
                }
                None => xml.push_str("      <failure message=\"instance failed\" />\n"),
            }
            xml.push_str("    </testcase>\n");
        }
    }
}

fn case_count(job: &JobRunResult) -> usize {
    job.instances.len() + usize::from(job.expansion_error.is_some())
}

fn symbol(status: RunStatus) -> char {
    match status {
        RunStatus::Succeeded => '+',
        RunStatus::Failed => 'x',
        RunStatus::Cancelled => '-',
    }
}

fn failure_headline(failure: &StepFailure) -> String {
    match failure {
        StepFailure::NonZeroExit {
            exit_code: Some(code),
            ..
        } => format!("exit code {}", code),
        StepFailure::NonZeroExit { exit_code: None, .. } => "terminated by signal".to_string(),
        StepFailure::TimedOut { after } => format!("timed out after {}", humanize(*after)),
        StepFailure::CollaboratorUnavailable { collaborator, .. } => {
            format!("{} unavailable", collaborator)
        }
    }
}

/// Escape special XML characters
fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
