use clap::Parser;
use cronohub::cli::{run, Cli};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout is for help text and the run report.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("CLI application startup: tracing initialised, environment loaded");

    let cli = Cli::parse();
    tracing::info!("CLI arguments parsed, invoking run");
    match run(cli).await {
        Ok(code) => {
            tracing::info!(?code, "CLI finished");
            code
        }
        Err(e) => {
            tracing::error!(error = %e, "CLI exited with error");
            eprintln!("cronohub: {e:#}");
            ExitCode::from(1)
        }
    }
}
