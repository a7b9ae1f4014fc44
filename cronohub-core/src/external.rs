//! External plugins: executables dropped into the user's plugin directory.
//!
//! The executable is invoked with a single verb:
//!
//! | verb       | stdin              | stdout                                   |
//! |------------|--------------------|------------------------------------------|
//! | `validate` | -                  | ignored, exit status 0 means valid        |
//! | `help`     | -                  | help text                                |
//! | `fetch`    | -                  | `{"items":[..],"failures":[..]}`          |
//! | `archive`  | JSON array of items| `{"archived":[..],"failures":[..]}` or empty |
//!
//! stderr is passed through to the user. A non-zero exit status of `fetch` or
//! `archive` fails the whole stage.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::contract::{
    report_invalid, ArchiveItem, ArchiveReport, FetchReport, ItemFailure, PluginRole,
    SourcePlugin, TargetPlugin,
};
use crate::error::PluginError;

#[derive(Debug, Deserialize)]
struct WireFailure {
    name: String,
    reason: String,
}

#[derive(Debug, Deserialize)]
struct FetchOutput {
    items: Vec<ArchiveItem>,
    #[serde(default)]
    failures: Vec<WireFailure>,
}

#[derive(Debug, Default, Deserialize)]
struct ArchiveOutput {
    #[serde(default)]
    archived: Vec<ArchiveItem>,
    #[serde(default)]
    failures: Vec<WireFailure>,
}

/// A plugin implemented by an external executable.
#[derive(Debug, Clone)]
pub struct ExternalPlugin {
    role: PluginRole,
    name: String,
    program: PathBuf,
}

impl ExternalPlugin {
    pub fn new(role: PluginRole, name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            role,
            name: name.into(),
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn run_validate(&self) -> bool {
        let status = Command::new(&self.program)
            .arg("validate")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .status()
            .await;
        match status {
            Ok(s) if s.success() => true,
            Ok(s) => {
                report_invalid(
                    self.role,
                    &self.name,
                    &format!("{} validate exited with {s}", self.program.display()),
                );
                false
            }
            Err(e) => {
                report_invalid(
                    self.role,
                    &self.name,
                    &format!("could not run {}: {e}", self.program.display()),
                );
                false
            }
        }
    }

    fn run_help(&self) -> String {
        match std::process::Command::new(&self.program)
            .arg("help")
            .stdin(Stdio::null())
            .output()
        {
            Ok(output) => String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
            Err(e) => format!(
                "{} plugin {} ({}): help unavailable: {e}",
                self.role,
                self.name,
                self.program.display()
            ),
        }
    }

    fn check_status(&self, verb: &str, status: std::process::ExitStatus) -> Result<(), PluginError> {
        if status.success() {
            Ok(())
        } else {
            Err(PluginError::Protocol(format!(
                "{} {verb} exited with {status}",
                self.program.display()
            )))
        }
    }
}

#[async_trait]
impl SourcePlugin for ExternalPlugin {
    async fn validate(&self) -> bool {
        self.run_validate().await
    }

    fn help(&self) -> String {
        self.run_help()
    }

    async fn fetch(&self) -> Result<FetchReport, PluginError> {
        info!(plugin = %self.name, program = %self.program.display(), "Running external fetch");
        let output = Command::new(&self.program)
            .arg("fetch")
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .await?;
        self.check_status("fetch", output.status)?;
        let parsed: FetchOutput = serde_json::from_slice(&output.stdout)?;
        Ok(FetchReport {
            items: parsed.items,
            failures: parsed
                .failures
                .into_iter()
                .map(|f| ItemFailure::retrieval(f.name, f.reason))
                .collect(),
        })
    }
}

#[async_trait]
impl TargetPlugin for ExternalPlugin {
    async fn validate(&self) -> bool {
        self.run_validate().await
    }

    fn help(&self) -> String {
        self.run_help()
    }

    async fn archive(&self, items: Vec<ArchiveItem>) -> Result<ArchiveReport, PluginError> {
        info!(
            plugin = %self.name,
            program = %self.program.display(),
            items = items.len(),
            "Running external archive"
        );
        let payload = serde_json::to_vec(&items)?;
        let mut child = Command::new(&self.program)
            .arg("archive")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PluginError::Protocol("stdin of external plugin unavailable".into()))?;

        let write = async move {
            let result = stdin.write_all(&payload).await;
            drop(stdin);
            result
        };
        let (written, output) = tokio::join!(write, child.wait_with_output());
        if let Err(e) = written {
            debug!(error = ?e, plugin = %self.name, "External plugin did not read all input");
        }
        let output = output?;
        self.check_status("archive", output.status)?;

        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(ArchiveReport {
                archived: items,
                failures: Vec::new(),
            });
        }
        let parsed: ArchiveOutput = serde_json::from_slice(&output.stdout)?;
        Ok(ArchiveReport {
            archived: parsed.archived,
            failures: parsed
                .failures
                .into_iter()
                .map(|f| ItemFailure::upload(f.name, f.reason))
                .collect(),
        })
    }
}
