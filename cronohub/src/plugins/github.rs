//! GitHub source: archives the authenticated user's own repositories as zipballs.
//!
//! Forks are skipped. `~/.config/cronohub/.repo_list` restricts the set by
//! repository name.

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
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::{debug, info};

use super::{ensure_success, env_value, missing_env};

pub const NAME: &str = "github";
pub const TOKEN_ENV: &str = "CRONO_GITHUB_TOKEN";
/// Alternative API root, for GitHub Enterprise.
pub const API_ENV: &str = "CRONOHUB_GITHUB_API";
const DEFAULT_API: &str = "https://api.github.com";
const PER_PAGE: usize = 100;
const MEDIA_TYPE: &str = "application/vnd.github+json";

pub fn factory(context: &PluginContext) -> Box<dyn SourcePlugin> {
    Box::new(GithubSource::new(context))
}

#[derive(Debug, Deserialize)]
struct Repository {
    name: String,
    full_name: String,
    #[serde(default)]
    fork: bool,
}

pub struct GithubSource {
    api: String,
    filter_path: PathBuf,
    staging_dir: PathBuf,
    settings: FetchSettings,
}

impl GithubSource {
    pub fn new(context: &PluginContext) -> Self {
        let api = env_value(API_ENV).unwrap_or_else(|| DEFAULT_API.to_string());
        Self {
            api: api.trim_end_matches('/').to_string(),
            filter_path: context.filter_path(),
            staging_dir: context.staging_dir.clone(),
            settings: context.fetch.clone().with_extension(".zip"),
        }
    }
}

#[async_trait]
impl SourcePlugin for GithubSource {
    async fn validate(&self) -> bool {
        require_env(PluginRole::Source, NAME, TOKEN_ENV).is_some()
    }

    fn help(&self) -> String {
        format!(
            "Help (github source plugin):\n\
             \x20 - Environment:\n\
             \x20     {TOKEN_ENV}: a token with access to listing repositories for a given user.\n\
             \x20     {API_ENV}: optional API root (default {DEFAULT_API}).\n\
             \x20 - File that filters the list of repositories to archive. If not present, all will be archived:\n\
             \x20     {}",
            self.filter_path.display()
        )
    }

    async fn fetch(&self) -> Result<FetchReport, PluginError> {
        let token = env_value(TOKEN_ENV).ok_or_else(|| missing_env(TOKEN_ENV))?;
        let filter = InclusionFilter::load(&self.filter_path)?;
        let inventory = GithubInventory {
            client: http_client(self.settings.timeout)?,
            api: self.api.clone(),
            token,
            retry: self.settings.retry,
        };
        let engine = FetchEngine::http(&self.settings)?;
        fetch_listed(&inventory, &filter, &engine, &self.staging_dir).await
    }
}

struct GithubInventory {
    client: reqwest::Client,
    api: String,
    token: String,
    retry: RetryPolicy,
}

impl GithubInventory {
    async fn page(&self, page: u32) -> Result<Vec<Repository>, PluginError> {
        let url = format!(
            "{}/user/repos?type=owner&per_page={PER_PAGE}&page={page}",
            self.api
        );
        debug!(url = %url, "Listing repositories");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .header(ACCEPT, MEDIA_TYPE)
            .send()
            .await?;
        let response = ensure_success(NAME, response).await?;
        Ok(response.json().await?)
    }

    fn locator(&self, repo: Repository) -> Locator {
        Locator::new(
            format!("{}/repos/{}/zipball", self.api, repo.full_name),
            repo.name,
        )
        .with_header("Authorization", format!("Bearer {}", self.token))
        .with_header("Accept", MEDIA_TYPE)
    }
}

#[async_trait]
impl Inventory for GithubInventory {
    async fn list(&self) -> Result<Vec<Locator>, PluginError> {
        let mut locators = Vec::new();
        let mut forks = 0usize;
        let mut page = 1u32;
        loop {
            let repos = run_with_retry(&self.retry, "github repository listing", |_| {
                self.page(page)
            })
            .await?;
            let count = repos.len();
            for repo in repos {
                if repo.fork {
                    forks += 1;
                    continue;
                }
                locators.push(self.locator(repo));
            }
            if count < PER_PAGE {
                break;
            }
            page += 1;
        }
        info!(repositories = locators.len(), forks, "Listed GitHub repositories");
        Ok(locators)
    }
}
