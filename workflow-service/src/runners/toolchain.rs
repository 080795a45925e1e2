// Rustup toolchain provider

use crate::runners::{
    locate_program, CollaboratorError, CommandLine, CommandOutput, CommandRunner, StepContext,
    ToolchainProvider,
};
use crate::workflow::models::ToolchainOptions;

use std::sync::Arc;

/// Toolchain provider backed by the `rustup` binary.
pub struct RustupToolchain {
    commands: Arc<dyn CommandRunner>,
}

impl RustupToolchain {
    pub fn new(commands: Arc<dyn CommandRunner>) -> Self {
        Self { commands }
    }
}

fn install_args(options: &ToolchainOptions) -> Vec<String> {
    let mut args = vec![
        "toolchain".to_string(),
        "install".to_string(),
        options.toolchain.clone(),
        "--no-self-update".to_string(),
    ];
    if let Some(profile) = &options.profile {
        args.push("--profile".to_string());
        args.push(profile.clone());
    }
    for component in &options.components {
        args.push("--component".to_string());
        args.push(component.clone());
    }
    args
}

#[async_trait::async_trait]
impl ToolchainProvider for RustupToolchain {
    async fn install(
        &self,
        options: &ToolchainOptions,
        ctx: &StepContext,
    ) -> Result<CommandOutput, CollaboratorError> {
        let rustup = locate_program("rustup", ctx)?;

        tracing::debug!(toolchain = %options.toolchain, "installing toolchain");
        let install = CommandLine::program(&rustup, install_args(options));
        let mut output = self
            .commands
            .execute(&install, &ctx.env, &ctx.working_dir, ctx.timeout)
            .await?;

        if output.success() && options.override_default {
            let set = CommandLine::program(
                &rustup,
                ["override", "set", options.toolchain.as_str()],
            );
            output.append(
                self.commands
                    .execute(&set, &ctx.env, &ctx.working_dir, ctx.timeout)
                    .await?,
            );
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runners::fake::{Scripted, ScriptedRunner};

    use std::collections::HashMap;

    fn options(override_default: bool) -> ToolchainOptions {
        ToolchainOptions {
            uses: "actions-rs/toolchain@v1".to_string(),
            profile: Some("minimal".to_string()),
            toolchain: "stable".to_string(),
            override_default,
            components: vec!["clippy".to_string()],
        }
    }

    #[test]
    fn test_install_args() {
        assert_eq!(
            install_args(&options(false)),
            vec![
                "toolchain",
                "install",
                "stable",
                "--no-self-update",
                "--profile",
                "minimal",
                "--component",
                "clippy"
            ]
        );
    }

    #[cfg(unix)]
    fn context_with_fake_rustup(dir: &std::path::Path) -> StepContext {
        use std::os::unix::fs::PermissionsExt;

        let bin = dir.join("rustup");
        std::fs::write(&bin, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        StepContext {
            env: HashMap::from([("PATH".to_string(), dir.display().to_string())]),
            working_dir: dir.to_path_buf(),
            timeout: None,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_install_with_override() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with_fake_rustup(dir.path());
        let runner = ScriptedRunner::succeeding();
        let provider = RustupToolchain::new(runner.clone());

        let output = provider.install(&options(true), &ctx).await.unwrap();

        assert!(output.success());
        let commands = runner.commands();
        assert_eq!(commands.len(), 2);
        assert!(commands[1].ends_with("rustup override set stable"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_install_skips_override() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with_fake_rustup(dir.path());
        let runner = ScriptedRunner::new(|_, _| Scripted::fail(1, "error: toolchain not found"));
        let provider = RustupToolchain::new(runner.clone());

        let output = provider.install(&options(true), &ctx).await.unwrap();

        assert_eq!(output.exit_code, Some(1));
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_rustup_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StepContext {
            env: HashMap::from([("PATH".to_string(), dir.path().display().to_string())]),
            working_dir: dir.path().to_path_buf(),
            timeout: None,
        };
        let provider = RustupToolchain::new(ScriptedRunner::succeeding());

        let err = provider.install(&options(false), &ctx).await.unwrap_err();

        assert_eq!(err.collaborator, "rustup");
        assert!(err.diagnostic.starts_with("rustup not found on PATH"));
    }
}
