//! ownCloud / Nextcloud target: WebDAV `PUT` of each artifact into the user's root folder.

use std::time::Duration;

use async_trait::async_trait;
use cronohub_core::contract::{
    require_env, ArchiveItem, ArchiveReport, PluginContext, PluginRole, TargetPlugin,
};
use cronohub_core::error::PluginError;
use cronohub_core::fetch::http_client;
use cronohub_core::retry::{run_with_retry, RetryPolicy};
use tracing::{info, warn};

use super::s3::uri_encode;
use super::{basename, ensure_success, env_value, missing_env};

pub const NAME: &str = "owncloud";
pub const URL_ENV: &str = "CRONOHUB_OWNCLOUD_URL";
pub const USERNAME_ENV: &str = "CRONOHUB_OWNCLOUD_USERNAME";
pub const PASSWORD_ENV: &str = "CRONOHUB_OWNCLOUD_PASSWORD";
const WEBDAV_PATH: &str = "remote.php/webdav";

pub fn factory(context: &PluginContext) -> Box<dyn TargetPlugin> {
    Box::new(OwncloudTarget {
        timeout: context.fetch.timeout,
        retry: context.fetch.retry,
    })
}

pub struct OwncloudTarget {
    timeout: Duration,
    retry: RetryPolicy,
}

/// `https://cloud.example.com` + `repo.zip` → `https://cloud.example.com/remote.php/webdav/repo.zip`
pub fn webdav_url(base: &str, file_name: &str) -> String {
    format!(
        "{}/{WEBDAV_PATH}/{}",
        base.trim_end_matches('/'),
        uri_encode(file_name)
    )
}

#[async_trait]
impl TargetPlugin for OwncloudTarget {
    async fn validate(&self) -> bool {
        [URL_ENV, USERNAME_ENV, PASSWORD_ENV]
            .into_iter()
            .all(|var| require_env(PluginRole::Target, NAME, var).is_some())
    }

    fn help(&self) -> String {
        format!(
            "Help (owncloud target plugin):\n  \
             OwnCloud location URL: {URL_ENV} (https://username.ocloud.de)\n  \
             OwnCloud Username: {USERNAME_ENV} (admin)\n  \
             OwnCloud Password: {PASSWORD_ENV} (admin)"
        )
    }

    async fn archive(&self, items: Vec<ArchiveItem>) -> Result<ArchiveReport, PluginError> {
        let base = env_value(URL_ENV).ok_or_else(|| missing_env(URL_ENV))?;
        let user = env_value(USERNAME_ENV).ok_or_else(|| missing_env(USERNAME_ENV))?;
        let password = env_value(PASSWORD_ENV).ok_or_else(|| missing_env(PASSWORD_ENV))?;
        let client = http_client(self.timeout)?;

        let mut report = ArchiveReport::default();
        for item in items {
            info!(name = %item.name, file = %item.location, "Uploading to ownCloud");
            let outcome = async {
                let url = webdav_url(&base, &basename(&item.location)?);
                let body = tokio::fs::read(&item.location).await?;
                run_with_retry(&self.retry, &item.name, |_| {
                    let request = client
                        .put(&url)
                        .basic_auth(&user, Some(&password))
                        .body(body.clone());
                    async move {
                        let response = request.send().await?;
                        ensure_success(NAME, response).await.map(|_| ())
                    }
                })
                .await
            }
            .await;
            if let Err(e) = &outcome {
                warn!(name = %item.name, error = %e, "ownCloud upload failed");
            }
            report.record(item, outcome);
        }
        Ok(report)
    }
}
