//! Target that archives nothing. Useful to dry-run a source.

use async_trait::async_trait;
use cronohub_core::contract::{ArchiveItem, ArchiveReport, PluginContext, TargetPlugin};
use cronohub_core::error::PluginError;
use tracing::info;

pub fn factory(_context: &PluginContext) -> Box<dyn TargetPlugin> {
    Box::new(NoOpTarget)
}

pub struct NoOpTarget;

#[async_trait]
impl TargetPlugin for NoOpTarget {
    async fn validate(&self) -> bool {
        true
    }

    fn help(&self) -> String {
        "No-Op means no operation.".to_string()
    }

    async fn archive(&self, items: Vec<ArchiveItem>) -> Result<ArchiveReport, PluginError> {
        for item in &items {
            info!(name = %item.name, file = %item.location, "Would archive");
        }
        Ok(ArchiveReport {
            archived: items,
            failures: Vec::new(),
        })
    }
}
