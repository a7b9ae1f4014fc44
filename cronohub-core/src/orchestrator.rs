//! High-level pipeline: resolve → validate → fetch → archive.
//!
//! This module drives a single run. It resolves one source and one target
//! plugin, validates both before any network work, fetches the whole batch,
//! then hands every retrieved artifact to the target.
//!
//! # States
//! `Init → SourceResolved → TargetResolved → SourceValidated → TargetValidated
//! → Fetched → Archived → Done`. A failed resolution or validation jumps to
//! `Aborted`; nothing is fetched or archived after that. A fetch stage that
//! errors, or retrieves nothing at all, also ends in `Aborted` before archive
//! is called. There is no retry loop and no rollback: once `archive` has been
//! called the run is final and always reaches `Done`, even when the target
//! reports a stage error.
//!
//! # Concurrency
//! Stages run strictly one after another on the calling task. Parallelism
//! lives inside the source's fetch (see [`crate::fetch::FetchEngine`]).
//! Fetch and archive are batch stages: archive sees the complete set.
//!
//! # Partial failures
//! Per-item failures from either stage do not stop the run; they are
//! collected in the [`RunReport`], which then asks for exit status 2. So does
//! an `archive` stage error. A fetch
//! that produced failures and no items skips archiving altogether.

use std::fmt;

use tracing::{error, info, warn};

use crate::contract::{ArchiveReport, ItemFailure, PluginContext, PluginRole};
use crate::error::RunError;
use crate::registry::{PluginRegistry, ResolvedSource, ResolvedTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    SourceResolved,
    TargetResolved,
    SourceValidated,
    TargetValidated,
    Fetched,
    Archived,
    Done,
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tracks the run's state transitions and logs each one.
#[derive(Debug)]
struct RunMachine {
    visited: Vec<RunState>,
}

impl RunMachine {
    fn new() -> Self {
        Self {
            visited: vec![RunState::Init],
        }
    }

    fn current(&self) -> RunState {
        self.visited.last().copied().unwrap_or(RunState::Init)
    }

    fn advance(&mut self, next: RunState) {
        info!(from = %self.current(), to = %next, "Run state transition");
        self.visited.push(next);
    }

    fn abort(&mut self, error: RunError) -> RunError {
        error!(
            from = %self.current(),
            code = error.code(),
            error = %error,
            "Run aborted"
        );
        self.visited.push(RunState::Aborted);
        error
    }
}

/// What a completed run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub source: String,
    pub target: String,
    pub fetched: usize,
    pub archived: usize,
    pub fetch_failures: Vec<ItemFailure>,
    pub archive_failures: Vec<ItemFailure>,
    /// Set when the target's `archive` call itself failed.
    pub archive_error: Option<String>,
    /// Every state visited, `Init` first and `Done` last.
    pub states: Vec<RunState>,
}

impl RunReport {
    pub fn is_complete_success(&self) -> bool {
        self.fetch_failures.is_empty()
            && self.archive_failures.is_empty()
            && self.archive_error.is_none()
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_complete_success() {
            0
        } else {
            2
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "source {} -> target {}: fetched {}, archived {}",
            self.source, self.target, self.fetched, self.archived
        )?;
        for failure in self.fetch_failures.iter().chain(&self.archive_failures) {
            writeln!(f, "  failed {:?} {}: {}", failure.kind, failure.name, failure.reason)?;
        }
        if let Some(error) = &self.archive_error {
            writeln!(f, "  archive with target {} failed: {error}", self.target)?;
        }
        Ok(())
    }
}

/// Resolves plugins through a registry and runs them.
pub struct Orchestrator<'a> {
    registry: &'a PluginRegistry,
    context: PluginContext,
}

impl<'a> Orchestrator<'a> {
    pub fn new(registry: &'a PluginRegistry, context: PluginContext) -> Self {
        Self { registry, context }
    }

    /// Resolves the named plugin and returns its help text. No validation,
    /// no fetching.
    pub fn help(&self, role: PluginRole, name: &str) -> Result<String, RunError> {
        let text = match role {
            PluginRole::Source => self
                .registry
                .resolve_source(name, &self.context)?
                .plugin
                .help(),
            PluginRole::Target => self
                .registry
                .resolve_target(name, &self.context)?
                .plugin
                .help(),
        };
        Ok(text)
    }

    pub async fn run(&self, source: &str, target: &str) -> Result<RunReport, RunError> {
        info!(source, target, "Starting archive run");
        let mut machine = RunMachine::new();

        let source = self
            .registry
            .resolve_source(source, &self.context)
            .map_err(|e| machine.abort(e.into()))?;
        machine.advance(RunState::SourceResolved);

        let target = self
            .registry
            .resolve_target(target, &self.context)
            .map_err(|e| machine.abort(e.into()))?;
        machine.advance(RunState::TargetResolved);

        drive(&mut machine, &source, &target).await
    }
}

/// Runs already-resolved plugins from validation onwards.
pub async fn run_resolved(
    source: &ResolvedSource,
    target: &ResolvedTarget,
) -> Result<RunReport, RunError> {
    let mut machine = RunMachine::new();
    machine.advance(RunState::SourceResolved);
    machine.advance(RunState::TargetResolved);
    drive(&mut machine, source, target).await
}

async fn drive(
    machine: &mut RunMachine,
    source: &ResolvedSource,
    target: &ResolvedTarget,
) -> Result<RunReport, RunError> {
    // Validate both before any expensive work.
    if !source.plugin.validate().await {
        return Err(machine.abort(RunError::ValidationFailed {
            role: PluginRole::Source,
            name: source.name().to_string(),
        }));
    }
    machine.advance(RunState::SourceValidated);

    if !target.plugin.validate().await {
        return Err(machine.abort(RunError::ValidationFailed {
            role: PluginRole::Target,
            name: target.name().to_string(),
        }));
    }
    machine.advance(RunState::TargetValidated);

    let fetched = source.plugin.fetch().await.map_err(|e| {
        machine.abort(RunError::Fetch {
            plugin: source.name().to_string(),
            source: e,
        })
    })?;
    info!(
        plugin = source.name(),
        items = fetched.items.len(),
        failures = fetched.failures.len(),
        "Fetch stage complete"
    );
    if fetched.items.is_empty() && !fetched.failures.is_empty() {
        return Err(machine.abort(RunError::NothingFetched {
            plugin: source.name().to_string(),
            failures: fetched.failures,
        }));
    }
    for failure in &fetched.failures {
        warn!(name = %failure.name, reason = %failure.reason, "Item not retrieved");
    }
    machine.advance(RunState::Fetched);

    let fetched_count = fetched.items.len();
    let (archived, archive_error) = match target.plugin.archive(fetched.items).await {
        Ok(archived) => (archived, None),
        Err(e) => {
            error!(plugin = target.name(), error = %e, "Archive stage failed");
            (ArchiveReport::default(), Some(e.to_string()))
        }
    };
    for failure in &archived.failures {
        warn!(name = %failure.name, reason = %failure.reason, "Item not archived");
    }
    machine.advance(RunState::Archived);
    machine.advance(RunState::Done);

    let report = RunReport {
        source: source.name().to_string(),
        target: target.name().to_string(),
        fetched: fetched_count,
        archived: archived.archived.len(),
        fetch_failures: fetched.failures,
        archive_failures: archived.failures,
        archive_error,
        states: machine.visited.clone(),
    };
    info!(
        fetched = report.fetched,
        archived = report.archived,
        failed = report.fetch_failures.len() + report.archive_failures.len(),
        "Archive run finished"
    );
    Ok(report)
}
