use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use qcimport_cli::commands::{import_error_checks, load_profiles};
use qcimport_cli::report::render;
use qcimport_cli::{Command, Config, ImportCommand};
use qcimport_core::{AppError, HttpConfig};

/// Exit code for runs that never started: bad configuration or arguments.
const EXIT_CONFIG: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file
    dotenv().ok();

    let config = Config::parse();

    if let Err(e) = init_logging(&config.log_level) {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(EXIT_CONFIG);
    }

    match run(config).await {
        Ok(code) => code,
        Err(e) => {
            match e.downcast_ref::<AppError>() {
                Some(app) => error!("{}", app.user_message()),
                None => error!("{:#}", e),
            }
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

/// Logs go to stderr so stdout carries only the report.
fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(level)
        .with_context(|| format!("Invalid log level '{}'", level))?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install the log subscriber")
}

async fn run(config: Config) -> anyhow::Result<ExitCode> {
    let profiles = load_profiles(config.config.as_deref())?;

    match config.command {
        Command::Import(ImportCommand::ErrorChecks(args)) => {
            let report = import_error_checks(&profiles, &args, &HttpConfig::default()).await?;
            print!("{}", render(&report, args.output)?);
            Ok(ExitCode::from(report.exit_code()))
        }
    }
}
