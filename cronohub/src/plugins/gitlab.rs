//! GitLab source: archives the projects owned by the token's user.

use std::path::PathBuf;

use async_trait::async_trait;
use cronohub_core::contract::{
    require_env, FetchReport, Locator, PluginContext, PluginRole, SourcePlugin,
};
use cronohub_core::error::PluginError;
use cronohub_core::fetch::{http_client, FetchEngine, FetchSettings};
use cronohub_core::filter::InclusionFilter;
use cronohub_core::listing::{fetch_listed, Inventory};
use cronohub_core::retry::{run_with_retry, RetryPolicy};
use serde::Deserialize;
use tracing::{debug, info};

use super::{ensure_success, env_value, missing_env};

pub const NAME: &str = "gitlab";
pub const TOKEN_ENV: &str = "CRONOHUB_GITLAB_TOKEN";
pub const URL_ENV: &str = "CRONOHUB_GITLAB_URL";
const DEFAULT_URL: &str = "https://gitlab.com";
const PER_PAGE: usize = 100;
const TOKEN_HEADER: &str = "PRIVATE-TOKEN";

pub fn factory(context: &PluginContext) -> Box<dyn SourcePlugin> {
    Box::new(GitlabSource::new(context))
}

#[derive(Debug, Deserialize)]
struct Project {
    id: u64,
    path: String,
}

pub struct GitlabSource {
    base_url: String,
    filter_path: PathBuf,
    staging_dir: PathBuf,
    settings: FetchSettings,
}

impl GitlabSource {
    pub fn new(context: &PluginContext) -> Self {
        let base_url = env_value(URL_ENV).unwrap_or_else(|| DEFAULT_URL.to_string());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            filter_path: context.filter_path(),
            staging_dir: context.staging_dir.clone(),
            settings: context.fetch.clone().with_extension(".zip"),
        }
    }
}

#[async_trait]
impl SourcePlugin for GitlabSource {
    async fn validate(&self) -> bool {
        require_env(PluginRole::Source, NAME, TOKEN_ENV).is_some()
    }

    fn help(&self) -> String {
        format!(
            "Help (gitlab source plugin):\n  \
             {TOKEN_ENV}: personal access token with read_api and read_repository scope.\n  \
             {URL_ENV}: instance URL (default {DEFAULT_URL}).\n  \
             Repository filter file (project paths, one per line): {}",
            self.filter_path.display()
        )
    }

    async fn fetch(&self) -> Result<FetchReport, PluginError> {
        let token = env_value(TOKEN_ENV).ok_or_else(|| missing_env(TOKEN_ENV))?;
        let filter = InclusionFilter::load(&self.filter_path)?;
        let inventory = GitlabInventory {
            client: http_client(self.settings.timeout)?,
            base_url: self.base_url.clone(),
            token,
            retry: self.settings.retry,
        };
        let engine = FetchEngine::http(&self.settings)?;
        fetch_listed(&inventory, &filter, &engine, &self.staging_dir).await
    }
}

struct GitlabInventory {
    client: reqwest::Client,
    base_url: String,
    token: String,
    retry: RetryPolicy,
}

impl GitlabInventory {
    async fn page(&self, page: u32) -> Result<Vec<Project>, PluginError> {
        let url = format!(
            "{}/api/v4/projects?owned=true&simple=true&per_page={PER_PAGE}&page={page}",
            self.base_url
        );
        debug!(url = %url, "Listing projects");
        let response = self
            .client
            .get(&url)
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await?;
        let response = ensure_success(NAME, response).await?;
        Ok(response.json().await?)
    }

    fn locator(&self, project: Project) -> Locator {
        Locator::new(
            format!(
                "{}/api/v4/projects/{}/repository/archive.zip",
                self.base_url, project.id
            ),
            project.path,
        )
        .with_header(TOKEN_HEADER, self.token.clone())
    }
}

#[async_trait]
impl Inventory for GitlabInventory {
    async fn list(&self) -> Result<Vec<Locator>, PluginError> {
        let mut locators = Vec::new();
        let mut page = 1u32;
        loop {
            let projects = run_with_retry(&self.retry, "gitlab project listing", |_| {
                self.page(page)
            })
            .await?;
            let count = projects.len();
            locators.extend(projects.into_iter().map(|p| self.locator(p)));
            if count < PER_PAGE {
                break;
            }
            page += 1;
        }
        info!(projects = locators.len(), "Listed GitLab projects");
        Ok(locators)
    }
}
