// Git checkout provider
// Prepares the workspace the way actions/checkout would for a local tree

use crate::runners::{
    locate_program, CheckoutProvider, CollaboratorError, CommandLine, CommandOutput,
    CommandRunner, StepContext,
};
use crate::workflow::models::CheckoutOptions;

use std::path::Path;
use std::sync::Arc;

/// Checkout provider backed by the `git` binary.
///
/// The workspace is expected to already be a git work tree; checkout
/// verifies that and initialises submodules when asked.
pub struct GitCheckout {
    commands: Arc<dyn CommandRunner>,
}

impl GitCheckout {
    pub fn new(commands: Arc<dyn CommandRunner>) -> Self {
        Self { commands }
    }

    async fn git(
        &self,
        git: &Path,
        args: &[String],
        ctx: &StepContext,
    ) -> Result<CommandOutput, CollaboratorError> {
        let command = CommandLine::program(git, args.iter().cloned());
        self.commands
            .execute(&command, &ctx.env, &ctx.working_dir, ctx.timeout)
            .await
    }
}

/// Arguments for `git submodule update`.
fn submodule_args(options: &CheckoutOptions) -> Vec<String> {
    let mut args: Vec<String> = ["submodule", "update", "--init", "--recursive"]
        .into_iter()
        .map(String::from)
        .collect();
    if let Some(depth) = options.fetch_depth.filter(|d| *d > 0) {
        args.push("--depth".to_string());
        args.push(depth.to_string());
    }
    args
}

#[async_trait::async_trait]
impl CheckoutProvider for GitCheckout {
    async fn checkout(
        &self,
        options: &CheckoutOptions,
        ctx: &StepContext,
    ) -> Result<CommandOutput, CollaboratorError> {
        let git = locate_program("git", ctx)?;

        let probe = vec!["rev-parse".to_string(), "--is-inside-work-tree".to_string()];
        let mut output = self.git(&git, &probe, ctx).await?;
        if !output.success() || !options.submodules {
            return Ok(output);
        }

        tracing::debug!(dir = %ctx.working_dir.display(), "updating submodules");
        output.append(self.git(&git, &submodule_args(options), ctx).await?);
        Ok(output)
    }
}
