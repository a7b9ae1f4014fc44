//! scp target: copies every artifact to `CRONOHUB_SCP_HOST` with the system `scp`.
//!
//! Host aliases, users, keys and ports come from `~/.ssh/config` and the ssh
//! agent, exactly as for an interactive `scp`. Runs in batch mode, so a host
//! that would prompt for a password fails instead of hanging.

use std::process::Stdio;

use async_trait::async_trait;
use cronohub_core::contract::{
    require_env, ArchiveItem, ArchiveReport, PluginContext, PluginRole, TargetPlugin,
};
use cronohub_core::error::PluginError;
use tokio::process::Command;
use tracing::{info, warn};

use super::{env_value, missing_env};

pub const NAME: &str = "scp";
pub const HOST_ENV: &str = "CRONOHUB_SCP_HOST";
pub const PATH_ENV: &str = "CRONOHUB_SCP_PATH";
/// Replaces the `scp` executable.
pub const PROGRAM_ENV: &str = "CRONOHUB_SCP_PROGRAM";
const DEFAULT_PROGRAM: &str = "scp";

pub fn factory(_context: &PluginContext) -> Box<dyn TargetPlugin> {
    let program = env_value(PROGRAM_ENV).unwrap_or_else(|| DEFAULT_PROGRAM.to_string());
    Box::new(ScpTarget::with_program(program))
}

pub struct ScpTarget {
    program: String,
}

impl ScpTarget {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn copy(&self, item: &ArchiveItem, destination: &str) -> Result<(), PluginError> {
        let output = Command::new(&self.program)
            .arg("-B")
            .arg("-q")
            .arg(&item.location)
            .arg(destination)
            .stdin(Stdio::null())
            .output()
            .await?;
        if output.status.success() {
            return Ok(());
        }
        Err(PluginError::Protocol(format!(
            "{} exited with {}: {}",
            self.program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

/// `host:` or `host:path/`.
pub fn remote_destination(host: &str, path: Option<&str>) -> String {
    match path.map(str::trim).filter(|p| !p.is_empty()) {
        Some(p) if p.ends_with('/') => format!("{host}:{p}"),
        Some(p) => format!("{host}:{p}/"),
        None => format!("{host}:"),
    }
}

#[async_trait]
impl TargetPlugin for ScpTarget {
    async fn validate(&self) -> bool {
        require_env(PluginRole::Target, NAME, HOST_ENV).is_some()
    }

    fn help(&self) -> String {
        format!(
            "Help (scp target plugin):\n  \
             {HOST_ENV}: host name or ~/.ssh/config alias to copy archives to.\n  \
             {PATH_ENV}: optional remote directory (default: the remote home).\n  \
             Authentication is whatever ssh uses for that host (config, agent, keys)."
        )
    }

    async fn archive(&self, items: Vec<ArchiveItem>) -> Result<ArchiveReport, PluginError> {
        let host = env_value(HOST_ENV).ok_or_else(|| missing_env(HOST_ENV))?;
        let path = env_value(PATH_ENV);
        let destination = remote_destination(&host, path.as_deref());

        let mut report = ArchiveReport::default();
        for item in items {
            info!(name = %item.name, file = %item.location, destination = %destination, "scp-ing artifact");
            let outcome = self.copy(&item, &destination).await;
            if let Err(e) = &outcome {
                warn!(name = %item.name, error = %e, "scp failed");
            }
            report.record(item, outcome);
        }
        Ok(report)
    }
}
