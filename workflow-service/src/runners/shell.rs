// Shell Runner
// Spawns run steps and collaborator programs as child processes

use crate::runners::{CollaboratorError, CommandLine, CommandOutput, CommandRunner};

use serde::Serialize;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// How long output readers may keep draining once the process has exited or
/// been killed. A background grandchild can hold a pipe open indefinitely.
const READER_GRACE: Duration = Duration::from_millis(250);

/// Shell types supported by the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Shell {
    /// Default shell (sh on Unix, cmd on Windows)
    Default,
    /// POSIX sh
    Sh,
    /// Bash shell
    Bash,
    /// PowerShell Core (cross-platform)
    Pwsh,
    /// Windows PowerShell (Windows only, falls back to pwsh)
    PowerShell,
    /// Windows command prompt
    Cmd,
}

impl Shell {
    /// Get the shell executable and arguments
    pub fn get_command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Shell::Default => {
                if cfg!(target_os = "windows") {
                    ("cmd", &["/D", "/C"])
                } else {
                    ("sh", &["-e", "-c"])
                }
            }
            Shell::Sh => ("sh", &["-e", "-c"]),
            Shell::Bash => ("bash", &["--noprofile", "--norc", "-eo", "pipefail", "-c"]),
            Shell::Pwsh => ("pwsh", &["-NoLogo", "-NoProfile", "-Command"]),
            Shell::PowerShell => {
                if cfg!(target_os = "windows") {
                    ("powershell.exe", &["-NoLogo", "-NoProfile", "-Command"])
                } else {
                    // Fall back to pwsh on non-Windows
                    ("pwsh", &["-NoLogo", "-NoProfile", "-Command"])
                }
            }
            Shell::Cmd => ("cmd", &["/D", "/C"]),
        }
    }
}

impl fmt::Display for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Shell::Default => "default",
            Shell::Sh => "sh",
            Shell::Bash => "bash",
            Shell::Pwsh => "pwsh",
            Shell::PowerShell => "powershell",
            Shell::Cmd => "cmd",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Shell {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" => Ok(Shell::Default),
            "sh" => Ok(Shell::Sh),
            "bash" => Ok(Shell::Bash),
            "pwsh" => Ok(Shell::Pwsh),
            "powershell" => Ok(Shell::PowerShell),
            "cmd" => Ok(Shell::Cmd),
            _ => Err(format!(
                "unknown shell '{}', expected one of: bash, sh, pwsh, powershell, cmd",
                s
            )),
        }
    }
}

/// Shell runner for executing scripts and programs
#[derive(Debug, Clone)]
pub struct ShellRunner {
    /// Shell used for scripts that do not name one
    default_shell: Shell,
}

impl ShellRunner {
    /// Create a new shell runner with the default shell
    pub fn new() -> Self {
        Self {
            default_shell: Shell::Default,
        }
    }

    /// Create a shell runner with a specific default shell
    pub fn with_default_shell(shell: Shell) -> Self {
        Self {
            default_shell: shell,
        }
    }

    fn build_command(&self, command: &CommandLine) -> Command {
        match command {
            CommandLine::Script { shell, script } => {
                let shell = match shell {
                    Shell::Default => self.default_shell,
                    other => *other,
                };
                let (shell_cmd, shell_args) = shell.get_command();
                let mut cmd = Command::new(shell_cmd);
                cmd.args(shell_args);
                cmd.arg(script);
                cmd
            }
            CommandLine::Program { program, args } => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CommandRunner for ShellRunner {
    async fn execute(
        &self,
        command: &CommandLine,
        env: &HashMap<String, String>,
        working_dir: &Path,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, CollaboratorError> {
        let executable = command.executable();

        let mut cmd = self.build_command(command);
        cmd.current_dir(working_dir);
        // The child sees exactly the computed environment
        cmd.env_clear();
        cmd.envs(env);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        tracing::debug!(program = %executable, dir = %working_dir.display(), "spawning process");

        let mut child = cmd.spawn().map_err(|e| {
            CollaboratorError::new(
                executable.clone(),
                format!("failed to spawn '{}': {}", executable, e),
            )
        })?;

        let stdout = child.stdout.take().map(PipeCapture::spawn);
        let stderr = child.stderr.take().map(PipeCapture::spawn);

        // Wait for completion with optional timeout
        let wait_result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(result) => Some(result),
                Err(_) => {
                    tracing::warn!(program = %executable, ?limit, "process timed out, killing it");
                    let _ = child.kill().await;
                    None
                }
            },
            None => Some(child.wait().await),
        };

        let Some(wait_result) = wait_result else {
            let stdout = collect(stdout).await;
            let mut stderr = collect(stderr).await;
            if !stderr.is_empty() {
                stderr.push('\n');
            }
            stderr.push_str(&format!(
                "process timed out after {:?}",
                timeout.unwrap_or_default()
            ));
            return Ok(CommandOutput {
                exit_code: None,
                stdout,
                stderr,
                timed_out: true,
            });
        };

        let status = wait_result.map_err(|e| {
            CollaboratorError::new(
                executable.clone(),
                format!("failed to wait for '{}': {}", executable, e),
            )
        })?;

        Ok(CommandOutput {
            exit_code: status.code(),
            stdout: collect(stdout).await,
            stderr: collect(stderr).await,
            timed_out: false,
        })
    }
}

/// Drains a child pipe to EOF on its own task.
///
/// Bytes land in a shared buffer so that whatever was read survives if the
/// reader has to be abandoned.
struct PipeCapture {
    handle: JoinHandle<()>,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl PipeCapture {
    fn spawn<R>(mut pipe: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let handle = tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let mut buffer = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                        buffer.extend_from_slice(&chunk[..n]);
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "pipe read failed");
                        break;
                    }
                }
            }
        });
        Self { handle, buffer }
    }

    fn take(&self) -> Vec<u8> {
        std::mem::take(
            &mut *self
                .buffer
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

async fn collect(capture: Option<PipeCapture>) -> String {
    let Some(mut capture) = capture else {
        return String::new();
    };
    if tokio::time::timeout(READER_GRACE, &mut capture.handle)
        .await
        .is_err()
    {
        // A grandchild may still hold the pipe open
        tracing::debug!("output pipe still open after exit, keeping what was read");
        capture.handle.abort();
    }
    decode(&capture.take())
}

/// Decode captured output, replacing invalid UTF-8 and dropping the final newline.
fn decode(bytes: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(bytes).replace("\r\n", "\n");
    if text.ends_with('\n') {
        text.pop();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_env() -> HashMap<String, String> {
        std::env::var("PATH")
            .map(|path| HashMap::from([("PATH".to_string(), path)]))
            .unwrap_or_default()
    }

    async fn run(script: &str, env: &HashMap<String, String>) -> CommandOutput {
        let working_dir = std::env::current_dir().unwrap();
        ShellRunner::new()
            .execute(
                &CommandLine::script(Shell::Default, script),
                env,
                &working_dir,
                None,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_shell_runner_echo() {
        let output = run("echo hello", &base_env()).await;

        assert_eq!(output.exit_code, Some(0));
        assert!(output.success());
        assert!(output.stdout.contains("hello"));
        assert!(output.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_shell_runner_with_env() {
        let mut env = base_env();
        env.insert("MY_VAR".to_string(), "test_value".to_string());

        let script = if cfg!(target_os = "windows") {
            "echo %MY_VAR%"
        } else {
            "echo $MY_VAR"
        };

        let output = run(script, &env).await;

        assert_eq!(output.exit_code, Some(0));
        assert!(output.stdout.contains("test_value"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_runner_does_not_leak_host_env() {
        let output = run("echo \"[${HOME:-unset}]\"", &base_env()).await;
        assert_eq!(output.stdout, "[unset]");
    }

    #[tokio::test]
    async fn test_shell_runner_exit_code() {
        let output = run("exit 42", &base_env()).await;

        assert_eq!(output.exit_code, Some(42));
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_runner_stderr() {
        let output = run("echo error >&2", &base_env()).await;

        assert_eq!(output.exit_code, Some(0));
        assert!(output.stderr.contains("error"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_runner_timeout() {
        let working_dir = std::env::current_dir().unwrap();
        let output = ShellRunner::new()
            .execute(
                &CommandLine::script(Shell::Sh, "sleep 5"),
                &base_env(),
                &working_dir,
                Some(Duration::from_millis(200)),
            )
            .await
            .unwrap();

        assert!(output.timed_out);
        assert_eq!(output.exit_code, None);
        assert!(output.stderr.contains("timed out"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_runner_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();

        let output = ShellRunner::new()
            .execute(
                &CommandLine::script(Shell::Default, "cat marker.txt"),
                &base_env(),
                dir.path(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(output.stdout, "here");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_runner_survives_invalid_utf8() {
        let output = run(
            "printf 'ok\\n\\377\\376\\n'; seq 1 200000; echo done",
            &base_env(),
        )
        .await;

        assert_eq!(output.exit_code, Some(0));
        assert!(output.stdout.starts_with("ok\n\u{FFFD}\u{FFFD}\n1\n"));
        assert!(output.stdout.contains("\n200000\n"));
        assert!(output.stdout.ends_with("done"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_runner_returns_while_background_child_holds_pipe() {
        let started = std::time::Instant::now();
        let output = run("echo started; sleep 5 &", &base_env()).await;

        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout, "started");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_decode_output() {
        assert_eq!(decode(b"a\r\nb\n"), "a\nb");
        assert_eq!(decode(b"a\n\n"), "a\n");
        assert_eq!(decode(b"\xffx"), "\u{FFFD}x");
        assert_eq!(decode(b""), "");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_collaborator_error() {
        let working_dir = std::env::current_dir().unwrap();
        let err = ShellRunner::new()
            .execute(
                &CommandLine::program("gantry-definitely-not-a-program", Vec::<String>::new()),
                &base_env(),
                &working_dir,
                None,
            )
            .await
            .unwrap_err();

        assert_eq!(err.collaborator, "gantry-definitely-not-a-program");
        assert!(err.diagnostic.contains("failed to spawn"));
    }

    #[test]
    fn test_shell_from_str() {
        assert_eq!("bash".parse::<Shell>().unwrap(), Shell::Bash);
        assert_eq!("PowerShell".parse::<Shell>().unwrap(), Shell::PowerShell);
        assert_eq!("cmd".parse::<Shell>().unwrap(), Shell::Cmd);
        assert!("fish".parse::<Shell>().unwrap_err().contains("fish"));
    }

    #[test]
    fn test_shell_display_round_trips() {
        for shell in [Shell::Sh, Shell::Bash, Shell::Pwsh, Shell::PowerShell, Shell::Cmd] {
            assert_eq!(shell.to_string().parse::<Shell>().unwrap(), shell);
        }
    }
}
