//! Local source: every file below `CRONOHUB_LOCAL_SOURCE` whose name has an
//! extension. Items are already local, so nothing is downloaded.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cronohub_core::contract::{
    report_invalid, require_env, ArchiveItem, FetchReport, ItemFailure, PluginContext, PluginRole,
    SourcePlugin,
};
use cronohub_core::error::PluginError;
use tracing::{info, warn};
use walkdir::WalkDir;

use super::{env_value, missing_env};

pub const NAME: &str = "local";
pub const SOURCE_ENV: &str = "CRONOHUB_LOCAL_SOURCE";

pub fn factory(_context: &PluginContext) -> Box<dyn SourcePlugin> {
    Box::new(LocalSource)
}

pub struct LocalSource;

#[async_trait]
impl SourcePlugin for LocalSource {
    async fn validate(&self) -> bool {
        let Some(dir) = require_env(PluginRole::Source, NAME, SOURCE_ENV) else {
            return false;
        };
        if !Path::new(&dir).is_dir() {
            report_invalid(
                PluginRole::Source,
                NAME,
                &format!("{SOURCE_ENV}={dir} is not a directory."),
            );
            return false;
        }
        true
    }

    fn help(&self) -> String {
        format!(
            "Define a local folder from which to upload all files to the target.\n  \
             {SOURCE_ENV}: the folder; every file with an extension below it is archived."
        )
    }

    async fn fetch(&self) -> Result<FetchReport, PluginError> {
        let root = PathBuf::from(env_value(SOURCE_ENV).ok_or_else(|| missing_env(SOURCE_ENV))?);
        let report = tokio::task::spawn_blocking(move || collect(&root))
            .await
            .map_err(|e| PluginError::Protocol(format!("directory walk did not complete: {e}")))?;
        info!(
            items = report.items.len(),
            failures = report.failures.len(),
            "Collected local files"
        );
        Ok(report)
    }
}

fn collect(root: &Path) -> FetchReport {
    let mut report = FetchReport::default();
    for entry in WalkDir::new(root).sort_by_file_name() {
        match entry {
            Ok(entry) if entry.file_type().is_file() => {
                let Some(name) = entry.file_name().to_str() else {
                    warn!(path = %entry.path().display(), "Skipping file with non UTF-8 name");
                    continue;
                };
                if name.contains('.') {
                    report.items.push(ArchiveItem::new(
                        name,
                        entry.path().to_string_lossy(),
                    ));
                }
            }
            Ok(_) => {}
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| root.display().to_string());
                warn!(path = %path, error = %e, "Could not read local file");
                report.failures.push(ItemFailure::retrieval(path, e));
            }
        }
    }
    report
}
