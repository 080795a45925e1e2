// Runners Module
// Collaborator interfaces the step executor consumes, plus process-backed defaults

pub mod checkout;
#[cfg(test)]
pub mod fake;
pub mod shell;
pub mod toolchain;

// Re-export key types
pub use checkout::GitCheckout;
pub use shell::{Shell, ShellRunner};
pub use toolchain::RustupToolchain;

use crate::workflow::models::{CheckoutOptions, ToolchainOptions};

use serde::Serialize;
use thiserror::Error;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// A command line handed to the command runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// A script interpreted by a shell
    Script { shell: Shell, script: String },
    /// A program invoked directly with arguments
    Program { program: PathBuf, args: Vec<String> },
}

impl CommandLine {
    pub fn script(shell: Shell, script: impl Into<String>) -> Self {
        CommandLine::Script {
            shell,
            script: script.into(),
        }
    }

    pub fn program<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandLine::Program {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Name of the executable that will be spawned.
    pub fn executable(&self) -> String {
        match self {
            CommandLine::Script { shell, .. } => shell.get_command().0.to_string(),
            CommandLine::Program { program, .. } => program.display().to_string(),
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandLine::Script { script, .. } => write!(f, "{}", script),
            CommandLine::Program { program, args } => {
                write!(f, "{}", program.display())?;
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                Ok(())
            }
        }
    }
}

/// What a finished process left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (None when killed or terminated by a signal)
    pub exit_code: Option<i32>,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// The process was killed after exceeding its timeout
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Append another invocation's output, keeping the later exit status.
    pub fn append(&mut self, other: CommandOutput) {
        for (mine, theirs) in [(&mut self.stdout, other.stdout), (&mut self.stderr, other.stderr)] {
            if !theirs.is_empty() {
                if !mine.is_empty() {
                    mine.push('\n');
                }
                mine.push_str(&theirs);
            }
        }
        self.exit_code = other.exit_code;
        self.timed_out = other.timed_out;
    }
}

/// A collaborator could not do its job at all (as opposed to a command
/// that ran and failed).
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{collaborator}: {diagnostic}")]
pub struct CollaboratorError {
    /// Which collaborator reported it (`sh`, `git`, `rustup`, ...)
    pub collaborator: String,
    /// The collaborator's own message, verbatim
    pub diagnostic: String,
}

impl CollaboratorError {
    pub fn new(collaborator: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self {
            collaborator: collaborator.into(),
            diagnostic: diagnostic.into(),
        }
    }
}

/// Environment, directory and time limit a step runs with.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub env: HashMap<String, String>,
    pub working_dir: PathBuf,
    pub timeout: Option<Duration>,
}

/// Find a collaborator binary on the step's own `PATH`.
pub(crate) fn locate_program(binary: &str, ctx: &StepContext) -> Result<PathBuf, CollaboratorError> {
    let path = ctx
        .env
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("PATH"))
        .map(|(_, v)| v.clone())
        .unwrap_or_default();

    which::which_in(binary, Some(path), &ctx.working_dir).map_err(|e| {
        CollaboratorError::new(binary, format!("{} not found on PATH: {}", binary, e))
    })
}

/// Spawns external processes. The only place processes are created.
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    async fn execute(
        &self,
        command: &CommandLine,
        env: &HashMap<String, String>,
        working_dir: &Path,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, CollaboratorError>;
}

/// Fetches source into the execution workspace.
#[async_trait::async_trait]
pub trait CheckoutProvider: Send + Sync {
    async fn checkout(
        &self,
        options: &CheckoutOptions,
        ctx: &StepContext,
    ) -> Result<CommandOutput, CollaboratorError>;
}

/// Makes a named toolchain available to subsequent steps.
#[async_trait::async_trait]
pub trait ToolchainProvider: Send + Sync {
    async fn install(
        &self,
        options: &ToolchainOptions,
        ctx: &StepContext,
    ) -> Result<CommandOutput, CollaboratorError>;
}

/// The collaborators a step executor dispatches to
#[derive(Clone)]
pub struct RunnerRegistry {
    commands: Arc<dyn CommandRunner>,
    checkout: Arc<dyn CheckoutProvider>,
    toolchain: Arc<dyn ToolchainProvider>,
}

impl RunnerRegistry {
    /// Process-backed collaborators sharing one shell runner
    pub fn new() -> Self {
        let commands: Arc<dyn CommandRunner> = Arc::new(ShellRunner::new());
        Self {
            checkout: Arc::new(GitCheckout::new(commands.clone())),
            toolchain: Arc::new(RustupToolchain::new(commands.clone())),
            commands,
        }
    }

    /// Replace the command runner.
    ///
    /// The checkout and toolchain providers are rebuilt on top of it so every
    /// process still goes through one runner.
    pub fn with_command_runner(mut self, commands: Arc<dyn CommandRunner>) -> Self {
        self.checkout = Arc::new(GitCheckout::new(commands.clone()));
        self.toolchain = Arc::new(RustupToolchain::new(commands.clone()));
        self.commands = commands;
        self
    }

    pub fn with_checkout(mut self, checkout: Arc<dyn CheckoutProvider>) -> Self {
        self.checkout = checkout;
        self
    }

    pub fn with_toolchain(mut self, toolchain: Arc<dyn ToolchainProvider>) -> Self {
        self.toolchain = toolchain;
        self
    }

    pub fn commands(&self) -> &dyn CommandRunner {
        self.commands.as_ref()
    }

    pub fn checkout(&self) -> &dyn CheckoutProvider {
        self.checkout.as_ref()
    }

    pub fn toolchain(&self) -> &dyn ToolchainProvider {
        self.toolchain.as_ref()
    }
}

impl Default for RunnerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RunnerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerRegistry").finish_non_exhaustive()
    }
}
