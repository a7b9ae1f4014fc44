///
/// This module implements the CLI interface for cronohub: argument parsing, plugin help
/// and listing, and the archive run itself.
///
/// All pipeline logic (plugin contracts, resolution, fetching, the run state machine) lives
/// in the [`cronohub-core`] crate. Bundled backends live in [`crate::plugins`]. This module
/// is strictly glue: it turns flags and config into a [`PluginContext`] and an exit status.
///
/// ## How To Use
/// - Command line: `cronohub -s github -t scp`, or `cronohub --source-help github`.
/// - Programmatic/integration use: call [`run`] with a constructed [`Cli`].
///
/// ## Output
/// stdout carries help text, plugin listings and the final run report. Diagnostics and
/// logs go to stderr.
///
/// [`cronohub-core`]: ../../cronohub-core/
use crate::load_config::{default_config_dir, load_config};
use crate::plugins::{builtin_registry, DEFAULT_SOURCE, DEFAULT_TARGET};
use anyhow::Result;
use clap::Parser;
use cronohub_core::contract::{PluginContext, PluginRole};
use cronohub_core::error::RunError;
use cronohub_core::orchestrator::Orchestrator;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// Archive your repositories from a source to anywhere you want through plugins.
#[derive(Parser, Debug)]
#[clap(
    name = "cronohub",
    version,
    about = "Archive repositories from a source plugin to a target plugin"
)]
pub struct Cli {
    /// Source plugin to archive from
    #[clap(short = 's', long = "source", default_value = DEFAULT_SOURCE)]
    pub source: String,

    /// Target plugin to archive to
    #[clap(short = 't', long = "target", default_value = DEFAULT_TARGET)]
    pub target: String,

    /// Print the help of a source plugin and exit
    #[clap(long = "source-help", value_name = "NAME")]
    pub source_help: Option<String>,

    /// Print the help of a target plugin and exit
    #[clap(long = "target-help", value_name = "NAME")]
    pub target_help: Option<String>,

    /// List the available source and target plugins and exit
    #[clap(long = "list-plugins")]
    pub list_plugins: bool,

    /// Maximum number of simultaneous downloads
    #[clap(long)]
    pub concurrency: Option<usize>,

    /// Timeout of a single download or upload, in seconds
    #[clap(long = "timeout-secs")]
    pub timeout_secs: Option<u64>,

    /// Where downloaded archives are stored before upload
    #[clap(long = "staging-dir")]
    pub staging_dir: Option<PathBuf>,

    /// Configuration directory (default: $CRONOHUB_CONFIG_DIR or ~/.config/cronohub)
    #[clap(long = "config-dir")]
    pub config_dir: Option<PathBuf>,
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<ExitCode> {
    let config_dir = match cli.config_dir.clone() {
        Some(dir) => dir,
        None => default_config_dir()?,
    };
    let config = match load_config(&config_dir) {
        Ok(config) => config,
        Err(e) => return Ok(report_error(&RunError::Configuration(format!("{e:#}")))),
    };

    let mut context = PluginContext::new(
        &config_dir,
        cli.staging_dir.clone().unwrap_or_else(|| config.staging_dir()),
    );
    context.fetch = config.fetch_settings();
    if let Some(concurrency) = cli.concurrency {
        context.fetch.concurrency = concurrency;
    }
    if let Some(secs) = cli.timeout_secs {
        context.fetch.timeout = Duration::from_secs(secs);
    }
    tracing::debug!(?context, "Run context assembled");

    let registry = builtin_registry(context.plugin_dir());
    let orchestrator = Orchestrator::new(&registry, context);

    if cli.list_plugins {
        for role in [PluginRole::Source, PluginRole::Target] {
            for descriptor in registry.available(role) {
                println!("{role}\t{}\t{}", descriptor.name, descriptor.origin);
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    let help_request = cli
        .source_help
        .as_deref()
        .map(|name| (PluginRole::Source, name))
        .or_else(|| {
            cli.target_help
                .as_deref()
                .map(|name| (PluginRole::Target, name))
        });
    if let Some((role, name)) = help_request {
        tracing::info!(command = "help", role = %role, plugin = name, "Showing plugin help");
        return match orchestrator.help(role, name) {
            Ok(text) => {
                println!("{text}");
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => Ok(report_error(&e)),
        };
    }

    tracing::info!(command = "archive", source = %cli.source, target = %cli.target, "Starting archive");
    match orchestrator.run(&cli.source, &cli.target).await {
        Ok(report) => {
            print!("{report}");
            if let Some(error) = &report.archive_error {
                eprintln!("cronohub: archive stage failed: {error}");
            } else if !report.is_complete_success() {
                eprintln!(
                    "cronohub: partial failure: {} item(s) failed",
                    report.fetch_failures.len() + report.archive_failures.len()
                );
            }
            Ok(ExitCode::from(report.exit_code()))
        }
        Err(e) => Ok(report_error(&e)),
    }
}

fn report_error(error: &RunError) -> ExitCode {
    tracing::error!(code = error.code(), error = %error, "cronohub failed");
    eprintln!("cronohub: {error} [{}]", error.code());
    ExitCode::from(error.exit_code())
}
