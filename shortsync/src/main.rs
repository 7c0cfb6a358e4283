use clap::{Parser, Subcommand};
use scheduler::RunOutcome;
use std::path::PathBuf;
use std::process::ExitCode;

mod app;
mod config;
mod telemetry;

use config::Config;

#[derive(Parser)]
#[command(name = "shortsync", version, about = "Drug shortage sync service")]
struct Cli {
    /// Path to the YAML config file.
    #[arg(long, short, default_value = "shortsync.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the scheduled jobs and the HTTP gateway until interrupted.
    Run,
    /// Run a single job now and exit. Fails if the run fails.
    Sync { job: String },
    /// Check the config file and exit.
    Validate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match execute(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "shortsync failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = Config::from_file(&cli.config)?;
    config.validate()?;

    if let CliCommand::Validate = cli.command {
        println!("{}: ok", cli.config.display());
        return Ok(ExitCode::SUCCESS);
    }

    let _telemetry = telemetry::init(&config.common)?;
    let runtime = tokio::runtime::Runtime::new()?;

    match cli.command {
        CliCommand::Run => {
            runtime.block_on(app::run(config))?;
            Ok(ExitCode::SUCCESS)
        }
        CliCommand::Sync { job } => match runtime.block_on(app::sync(config, &job))? {
            RunOutcome::Succeeded(stats) => {
                println!("{job}: {stats}");
                Ok(ExitCode::SUCCESS)
            }
            RunOutcome::Failed { error, .. } => {
                eprintln!("{job}: failed: {error}");
                Ok(ExitCode::FAILURE)
            }
            RunOutcome::AlreadyRunning => {
                eprintln!("{job}: already running");
                Ok(ExitCode::FAILURE)
            }
        },
        CliCommand::Validate => Ok(ExitCode::SUCCESS),
    }
}
