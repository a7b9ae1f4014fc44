//! Shared fetch flow for remote-listing sources.
//!
//! A listing source enumerates its inventory into locators; this module
//! applies the inclusion filter and hands the survivors to the fetch engine.

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use crate::contract::{FetchReport, Locator};
use crate::error::PluginError;
use crate::fetch::FetchEngine;
use crate::filter::InclusionFilter;

/// An external inventory that can be listed as downloadable locators.
#[async_trait]
pub trait Inventory: Send + Sync {
    async fn list(&self) -> Result<Vec<Locator>, PluginError>;
}

/// List, filter by exact name, then retrieve into `staging_dir`.
pub async fn fetch_listed(
    inventory: &dyn Inventory,
    filter: &InclusionFilter,
    engine: &FetchEngine,
    staging_dir: &Path,
) -> Result<FetchReport, PluginError> {
    let candidates = inventory.list().await?;
    let listed = candidates.len();
    let locators = filter.retain(candidates, |l| l.name.as_str());
    info!(
        listed,
        selected = locators.len(),
        filtered = !filter.is_unfiltered(),
        "Selected items for archiving"
    );
    engine.fetch_all(locators, staging_dir).await
}
