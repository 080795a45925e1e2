mod commands;
mod output;

use commands::{matrix, run, validate, EXIT_INPUT_ERROR};

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gantry", version, about = "Run CI workflow matrices locally")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow's jobs for every matrix combination
    Run(run::RunArgs),
    /// Parse a workflow and check that every matrix expands
    Validate(validate::ValidateArgs),
    /// Print the job instances a workflow expands into
    Matrix(matrix::MatrixArgs),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("GANTRY_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // Usage errors are input errors; help and version are not errors
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_INPUT_ERROR } else { 0 };
            let _ = e.print();
            return Ok(ExitCode::from(code));
        }
    };

    match cli.command {
        Commands::Run(args) => run::execute(args).await,
        Commands::Validate(args) => validate::execute(args),
        Commands::Matrix(args) => matrix::execute(args),
    }
}
