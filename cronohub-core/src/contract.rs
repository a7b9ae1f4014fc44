//! # contract: plugin interfaces shared by sources, targets and the orchestrator
//!
//! This module defines the two plugin traits ([`SourcePlugin`], [`TargetPlugin`])
//! and the plain data types that travel between them.
//!
//! ## Interface & Extensibility
//! - Implement [`SourcePlugin`] to enumerate and retrieve items from an inventory
//!   (a code hosting account, a local folder, ...).
//! - Implement [`TargetPlugin`] to transmit retrieved artifacts somewhere durable.
//! - Register the implementation with [`crate::registry::PluginRegistry`], or ship it
//!   as an external executable (see [`crate::external`]).
//!
//! ## Mocking & Testing
//! - Both traits are annotated for `mockall`, so tests can build
//!   `MockSourcePlugin`/`MockTargetPlugin` and assert which operations ran.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::error::PluginError;
use crate::fetch::FetchSettings;

/// A named item flowing through the pipeline.
///
/// Before fetch `location` is a remote URL, after fetch it is a local path.
/// Items are never mutated: the fetch stage produces new ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveItem {
    pub name: String,
    pub location: String,
}

impl ArchiveItem {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
        }
    }

    /// The location interpreted as a local filesystem path.
    pub fn local_path(&self) -> PathBuf {
        PathBuf::from(&self.location)
    }
}

/// A retrievable reference to a not-yet-downloaded item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub url: String,
    pub name: String,
    /// Extra request headers, typically the upstream API credential.
    pub headers: BTreeMap<String, String>,
}

impl Locator {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Which stage an item failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Retrieval,
    Upload,
}

/// A single item that could not be processed. Never aborts the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub name: String,
    pub reason: String,
    pub kind: FailureKind,
}

impl ItemFailure {
    pub fn retrieval(name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            name: name.into(),
            reason: reason.to_string(),
            kind: FailureKind::Retrieval,
        }
    }

    pub fn upload(name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            name: name.into(),
            reason: reason.to_string(),
            kind: FailureKind::Upload,
        }
    }
}

/// Result of a source's fetch: the artifacts that landed plus the ones that did not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub items: Vec<ArchiveItem>,
    pub failures: Vec<ItemFailure>,
}

impl FetchReport {
    /// A report where every item is already local and nothing failed.
    pub fn complete(items: Vec<ArchiveItem>) -> Self {
        Self {
            items,
            failures: Vec::new(),
        }
    }
}

/// Result of a target's archive call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    pub archived: Vec<ArchiveItem>,
    pub failures: Vec<ItemFailure>,
}

impl ArchiveReport {
    pub fn record(&mut self, item: ArchiveItem, outcome: Result<(), PluginError>) {
        match outcome {
            Ok(()) => self.archived.push(item),
            Err(e) => self.failures.push(ItemFailure::upload(item.name, e)),
        }
    }
}

/// The role a plugin plays in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginRole {
    Source,
    Target,
}

impl PluginRole {
    /// Directory name used for this role under the plugin override directory.
    pub fn dir_name(&self) -> &'static str {
        match self {
            PluginRole::Source => "source",
            PluginRole::Target => "target",
        }
    }
}

impl fmt::Display for PluginRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Everything a plugin factory needs to build a plugin for one run.
#[derive(Debug, Clone)]
pub struct PluginContext {
    /// `~/.config/cronohub` unless overridden.
    pub config_dir: PathBuf,
    /// Where retrieved artifacts land.
    pub staging_dir: PathBuf,
    pub fetch: FetchSettings,
}

impl PluginContext {
    pub fn new(config_dir: impl Into<PathBuf>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            staging_dir: staging_dir.into(),
            fetch: FetchSettings::default(),
        }
    }

    /// Location of the inclusion filter file.
    pub fn filter_path(&self) -> PathBuf {
        self.config_dir.join(".repo_list")
    }

    /// Root of the user plugin override directories.
    pub fn plugin_dir(&self) -> PathBuf {
        self.config_dir.join("plugins")
    }
}

/// A component that enumerates and retrieves items from an external inventory.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SourcePlugin: Send + Sync {
    /// Check credentials and configuration. Never fails: on `false` a diagnostic
    /// has already been shown to the user.
    async fn validate(&self) -> bool;

    /// Human-readable description of what the plugin needs.
    fn help(&self) -> String;

    /// Enumerate, filter and retrieve items into local staging storage.
    async fn fetch(&self) -> Result<FetchReport, PluginError>;
}

/// A component that transmits retrieved artifacts to a durable destination.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait TargetPlugin: Send + Sync {
    /// Check credentials and configuration. Never fails: on `false` a diagnostic
    /// has already been shown to the user.
    async fn validate(&self) -> bool;

    /// Human-readable description of what the plugin needs.
    fn help(&self) -> String;

    /// Transmit every item. Per-item failures end up in the report; re-running
    /// with the same items is allowed.
    async fn archive(&self, items: Vec<ArchiveItem>) -> Result<ArchiveReport, PluginError>;
}

/// Reports a failed validation on stderr and in the log. Shared by plugins so
/// diagnostics look the same everywhere.
pub fn report_invalid(role: PluginRole, plugin: &str, message: &str) {
    tracing::error!(role = %role, plugin, message, "Plugin validation failed");
    eprintln!("[{role}:{plugin}] {message}");
}

/// Reads a required environment variable, reporting it when absent or empty.
pub fn require_env(role: PluginRole, plugin: &str, var: &str) -> Option<String> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => {
            report_invalid(
                role,
                plugin,
                &format!("Please set the {var} environment variable."),
            );
            None
        }
    }
}
