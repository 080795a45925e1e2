// Scripted collaborators for executor and coordinator tests

use crate::runners::{
    CheckoutProvider, CollaboratorError, CommandLine, CommandOutput, CommandRunner, StepContext,
    ToolchainProvider,
};
use crate::workflow::models::{CheckoutOptions, ToolchainOptions};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The canned response to one invocation.
#[derive(Debug, Clone)]
pub enum Scripted {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
        delay: Duration,
    },
    Unavailable(String),
}

impl Scripted {
    pub fn ok() -> Self {
        Self::exit(0, "", "")
    }

    pub fn stdout(stdout: &str) -> Self {
        Self::exit(0, stdout, "")
    }

    pub fn fail(code: i32, stderr: &str) -> Self {
        Self::exit(code, "", stderr)
    }

    pub fn exit(code: i32, stdout: &str, stderr: &str) -> Self {
        Scripted::Exit {
            code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn unavailable(diagnostic: &str) -> Self {
        Scripted::Unavailable(diagnostic.to_string())
    }

    /// Delay the response, as if the process were still running.
    pub fn after(self, wait: Duration) -> Self {
        match self {
            Scripted::Exit {
                code,
                stdout,
                stderr,
                ..
            } => Scripted::Exit {
                code,
                stdout,
                stderr,
                delay: wait,
            },
            other => other,
        }
    }

    async fn respond(
        self,
        collaborator: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, CollaboratorError> {
        match self {
            Scripted::Unavailable(diagnostic) => {
                Err(CollaboratorError::new(collaborator, diagnostic))
            }
            Scripted::Exit {
                code,
                stdout,
                stderr,
                delay,
            } => {
                if let Some(limit) = timeout.filter(|limit| *limit < delay) {
                    tokio::time::sleep(limit).await;
                    return Ok(CommandOutput {
                        exit_code: None,
                        stdout,
                        stderr: format!("process timed out after {:?}", limit),
                        timed_out: true,
                    });
                }
                tokio::time::sleep(delay).await;
                Ok(CommandOutput {
                    exit_code: Some(code),
                    stdout,
                    stderr,
                    timed_out: false,
                })
            }
        }
    }
}

/// One recorded command runner invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub command: CommandLine,
    pub env: HashMap<String, String>,
    pub working_dir: PathBuf,
    pub timeout: Option<Duration>,
}

type Responder = dyn Fn(&CommandLine, &HashMap<String, String>) -> Scripted + Send + Sync;

/// A command runner that answers from a closure and records every call.
pub struct ScriptedRunner {
    responder: Box<Responder>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedRunner {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&CommandLine, &HashMap<String, String>) -> Scripted + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Every command exits 0.
    pub fn succeeding() -> Arc<Self> {
        Self::new(|_, _| Scripted::ok())
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// The command lines that were run, in order.
    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|call| call.command.to_string())
            .collect()
    }
}

#[async_trait::async_trait]
impl CommandRunner for ScriptedRunner {
    async fn execute(
        &self,
        command: &CommandLine,
        env: &HashMap<String, String>,
        working_dir: &Path,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, CollaboratorError> {
        self.calls.lock().unwrap().push(RecordedCall {
            command: command.clone(),
            env: env.clone(),
            working_dir: working_dir.to_path_buf(),
            timeout,
        });
        let response = (self.responder)(command, env);
        response.respond(&command.executable(), timeout).await
    }
}

/// Checkout and toolchain provider that records what it was asked to do.
pub struct RecordingProvider {
    response: Scripted,
    requests: Mutex<Vec<String>>,
}

impl RecordingProvider {
    pub fn new(response: Scripted) -> Arc<Self> {
        Arc::new(Self {
            response,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CheckoutProvider for RecordingProvider {
    async fn checkout(
        &self,
        options: &CheckoutOptions,
        ctx: &StepContext,
    ) -> Result<CommandOutput, CollaboratorError> {
        self.requests
            .lock()
            .unwrap()
            .push(format!("checkout submodules={}", options.submodules));
        self.response.clone().respond("git", ctx.timeout).await
    }
}

#[async_trait::async_trait]
impl ToolchainProvider for RecordingProvider {
    async fn install(
        &self,
        options: &ToolchainOptions,
        ctx: &StepContext,
    ) -> Result<CommandOutput, CollaboratorError> {
        self.requests.lock().unwrap().push(format!(
            "install {} override={}",
            options.toolchain, options.override_default
        ));
        self.response.clone().respond("rustup", ctx.timeout).await
    }
}
