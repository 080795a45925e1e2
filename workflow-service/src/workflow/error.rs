// Definition parse errors
// Location, source context and a fix hint for rejected workflow text

use std::fmt;

/// A workflow text that could not be turned into a definition.
#[derive(Debug, Clone)]
pub struct ParseError {
    /// Error message
    pub message: String,
    /// Line number (1-indexed, 0 when unknown)
    pub line: usize,
    /// Column number (1-indexed, 0 when unknown)
    pub column: usize,
    /// Surrounding source lines
    pub context: String,
    /// Optional suggestion for fixing the error
    pub suggestion: Option<String>,
    /// The kind of error
    pub kind: ParseErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Syntax error, wrong shape, missing required field or invalid value
    Malformed,
    /// A declared trigger event is not one the engine knows
    UnsupportedTrigger,
}

impl ParseError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: 0,
            column: 0,
            context: String::new(),
            suggestion: None,
            kind: ParseErrorKind::Malformed,
        }
    }

    pub fn unsupported_trigger(event: &str) -> Self {
        Self::malformed(format!("unsupported trigger event '{}'", event))
            .with_kind(ParseErrorKind::UnsupportedTrigger)
    }

    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.line = line;
        self.column = column;
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_kind(mut self, kind: ParseErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Locate the first line mentioning `needle` as a key, for errors found
    /// after deserialization where serde no longer knows positions.
    pub fn locate(mut self, source: &str, needle: &str) -> Self {
        let key = format!("{}:", needle);
        let found = source.lines().enumerate().find_map(|(i, line)| {
            let trimmed = line.trim_start().trim_start_matches("- ");
            trimmed
                .starts_with(&key)
                .then(|| (i + 1, line.len() - trimmed.len() + 1))
        });
        if let Some((line, column)) = found {
            self.line = line;
            self.column = column;
            self = self.with_source_context(source, 2);
        }
        self
    }

    /// Create context from source content
    pub fn with_source_context(mut self, source: &str, context_lines: usize) -> Self {
        if self.line == 0 {
            return self;
        }
        let lines: Vec<&str> = source.lines().collect();
        let start = self.line.saturating_sub(context_lines + 1);
        let end = (self.line + context_lines).min(lines.len());

        let mut context = String::new();
        for (i, line) in lines.iter().enumerate().take(end).skip(start) {
            let line_num = i + 1;
            let prefix = if line_num == self.line { ">" } else { " " };
            context.push_str(&format!("{} {:4} | {}\n", prefix, line_num, line));

            if line_num == self.line && self.column > 0 {
                let indicator = " ".repeat(self.column - 1) + "^";
                context.push_str(&format!("       | {}\n", indicator));
            }
        }

        self.context = context;
        self
    }

    /// Create from serde_yaml error
    pub fn from_yaml_error(err: &serde_yaml::Error, source: &str) -> Self {
        let (line, column) = err
            .location()
            .map(|loc| (loc.line(), loc.column()))
            .unwrap_or((0, 0));

        let mut error = ParseError::malformed(format_yaml_error_message(err))
            .at(line, column)
            .with_source_context(source, 2);
        error.suggestion = suggest_yaml_fix(err, source, line);
        error
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "error: {}", self.message)?;
        if self.line > 0 {
            writeln!(f, "  --> line {}:{}", self.line, self.column)?;
        }

        if !self.context.is_empty() {
            writeln!(f)?;
            write!(f, "{}", self.context)?;
        }

        if let Some(suggestion) = &self.suggestion {
            writeln!(f)?;
            writeln!(f, "help: {}", suggestion)?;
        }

        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Format serde_yaml error message into something more readable
fn format_yaml_error_message(err: &serde_yaml::Error) -> String {
    let msg = err.to_string();

    if let Some(field) = extract_between(&msg, "missing field `", "`") {
        return format!("missing required field '{}'", field);
    }

    if msg.contains("invalid type") {
        if let (Some(expected), Some(found)) = (
            extract_between(&msg, "expected ", " at"),
            extract_between(&msg, "invalid type: ", ","),
        ) {
            return format!("expected {}, but found {}", expected, found);
        }
    }

    // serde_yaml appends the location itself; the caller reports it separately
    match msg.find(" at line ") {
        Some(pos) => msg[..pos].to_string(),
        None => msg,
    }
}

fn extract_between(msg: &str, prefix: &str, suffix: &str) -> Option<String> {
    let start = msg.find(prefix)? + prefix.len();
    let end = msg[start..].find(suffix)? + start;
    Some(msg[start..end].to_string())
}

/// Suggest fixes for common YAML errors
fn suggest_yaml_fix(err: &serde_yaml::Error, source: &str, line: usize) -> Option<String> {
    let msg = err.to_string();
    let error_line = source
        .lines()
        .nth(line.saturating_sub(1))
        .unwrap_or_default();

    if msg.contains("missing field `on`") {
        return Some("add an 'on:' key naming the events that trigger the workflow".to_string());
    }

    if error_line.starts_with('\t') {
        return Some(
            "YAML prefers spaces over tabs for indentation. Replace tabs with spaces.".to_string(),
        );
    }

    let typo_suggestions = [
        ("runs_on", "runs-on"),
        ("runson", "runs-on"),
        ("failfast", "fail-fast"),
        ("fail_fast", "fail-fast"),
        ("max_parallel", "max-parallel"),
        ("timeout_minutes", "timeout-minutes"),
        ("working_directory", "working-directory"),
    ];

    let lower_line = error_line.to_lowercase();
    typo_suggestions
        .iter()
        .find(|(typo, _)| lower_line.contains(typo))
        .map(|(_, correct)| format!("did you mean '{}'?", correct))
}

/// Result type for parser operations
pub type ParseResult<T> = Result<T, ParseError>;
