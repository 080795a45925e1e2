// Expression interpolation
// Substitutes ${{ context.path }} references in commands, env values and runner labels

use crate::workflow::models::{value_to_string, MatrixCombination};

use serde_json::Value;

use std::collections::HashMap;
use std::fmt;

/// A piece of template text.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Literal text, copied through unchanged
    Text(String),
    /// The trimmed body of a `${{ ... }}` reference
    Expression(String),
}

/// Expression error
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expression error at position {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for ExpressionError {}

/// Values visible to `${{ }}` references for one job instance.
#[derive(Debug, Clone, Copy)]
pub struct ExpressionContext<'a> {
    /// `matrix.<axis>`
    pub matrix: &'a MatrixCombination,
    /// `env.<NAME>`
    pub env: &'a HashMap<String, String>,
    /// `runner.name`, also used to derive `runner.os`
    pub runner: &'a str,
}

impl<'a> ExpressionContext<'a> {
    pub fn new(
        matrix: &'a MatrixCombination,
        env: &'a HashMap<String, String>,
        runner: &'a str,
    ) -> Self {
        Self {
            matrix,
            env,
            runner,
        }
    }

    /// Resolve a dotted reference such as `matrix.os` or `matrix.target.triple`.
    pub fn resolve(&self, expression: &str) -> Option<String> {
        if let Some(literal) = string_literal(expression) {
            return Some(literal.to_string());
        }

        let mut parts = expression.split('.');
        let context = parts.next()?;
        let rest: Vec<&str> = parts.collect();

        match context {
            "matrix" => {
                let (first, nested) = rest.split_first()?;
                let mut value = self.matrix.get(first)?;
                for key in nested {
                    value = match value {
                        Value::Object(map) => map.get(*key)?,
                        _ => return None,
                    };
                }
                Some(value_to_string(value))
            }
            "env" => match rest.as_slice() {
                [name] => self.env.get(*name).cloned(),
                _ => None,
            },
            "runner" => match rest.as_slice() {
                ["name"] => Some(self.runner.to_string()),
                ["os"] => Some(runner_os(self.runner).to_string()),
                ["arch"] => Some(runner_arch().to_string()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Substitute every reference in `text`.
    ///
    /// References that do not resolve render as the empty string.
    pub fn render(&self, text: &str) -> String {
        if !text.contains("${{") {
            return text.to_string();
        }

        let mut rendered = String::with_capacity(text.len());
        for segment in extract_segments(text) {
            match segment {
                Segment::Text(t) => rendered.push_str(&t),
                Segment::Expression(expr) => match self.resolve(&expr) {
                    Some(value) => rendered.push_str(&value),
                    None => {
                        tracing::warn!(expression = %expr, "unresolved expression, substituting empty string");
                    }
                },
            }
        }
        rendered
    }

    /// Render every value of an environment map.
    pub fn render_env(&self, env: &HashMap<String, String>) -> HashMap<String, String> {
        env.iter()
            .map(|(k, v)| (k.clone(), self.render(v)))
            .collect()
    }
}

/// Operating system family implied by a runner label.
pub fn runner_os(label: &str) -> &'static str {
    let label = label.to_lowercase();
    if label.contains("windows") {
        "Windows"
    } else if label.contains("macos") || label.contains("mac-") {
        "macOS"
    } else {
        "Linux"
    }
}

fn runner_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "X64",
        "x86" => "X86",
        "aarch64" => "ARM64",
        "arm" => "ARM",
        other => other,
    }
}

fn string_literal(expression: &str) -> Option<&str> {
    expression
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
}

/// Split text into literal and `${{ }}` segments.
///
/// An opening `${{` without a matching `}}` is kept as literal text.
pub fn extract_segments(input: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = input;

    while let Some(start) = rest.find("${{") {
        let after_open = &rest[start + 3..];
        let Some(end) = after_open.find("}}") else {
            break;
        };

        if start > 0 {
            segments.push(Segment::Text(rest[..start].to_string()));
        }
        segments.push(Segment::Expression(after_open[..end].trim().to_string()));
        rest = &after_open[end + 2..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }
    segments
}

/// Check that every `${{ }}` in `text` is terminated and holds a reference
/// this engine can evaluate.
pub fn validate(text: &str) -> Result<(), ExpressionError> {
    let mut offset = 0;
    let mut rest = text;

    while let Some(start) = rest.find("${{") {
        let position = offset + start;
        let after_open = &rest[start + 3..];
        let end = after_open.find("}}").ok_or_else(|| ExpressionError {
            message: "unterminated '${{', expected '}}'".to_string(),
            position,
        })?;

        let body = after_open[..end].trim();
        if body.is_empty() {
            return Err(ExpressionError {
                message: "empty expression".to_string(),
                position,
            });
        }
        if string_literal(body).is_none() && !is_reference(body) {
            return Err(ExpressionError {
                message: format!(
                    "unsupported expression '{}', expected a reference like 'matrix.os'",
                    body
                ),
                position,
            });
        }

        let consumed = start + 3 + end + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }

    Ok(())
}

fn is_reference(body: &str) -> bool {
    let parts: Vec<&str> = body.split('.').collect();
    parts.len() >= 2
        && parts.iter().all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        })
}
