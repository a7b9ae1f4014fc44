//! Concurrent fetch engine: materialises remote locators into local staging.
//!
//! Every locator gets a deterministic artifact path
//! (`{staging}/{name}_{YYYYmmdd-HHMMSS}{ext}`) before any worker starts, so no
//! two artifacts of one batch share a path. At most `concurrency` retrievals
//! are in flight at once; when one finishes the next queued locator starts.
//! A failing (or panicking) retrieval is reported for its item only.

use std::collections::HashSet;
use std::io;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::contract::{ArchiveItem, FetchReport, ItemFailure, Locator};
use crate::error::{PluginError, RetrievalError};
use crate::retry::{run_with_retry, RetryPolicy};

/// Empirically safe for a single upstream API's rate limits.
pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    /// Upper bound of simultaneous retrievals. Zero is treated as one.
    pub concurrency: usize,
    /// Per-retrieval timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Appended to artifact file names, e.g. `.zip`.
    pub extension: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            extension: String::new(),
        }
    }
}

impl FetchSettings {
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }
}

/// Retrieves one locator into a local file, returning the number of bytes written.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, locator: &Locator, destination: &Path) -> Result<u64, RetrievalError>;
}

/// Shared HTTP client: fixed user agent (required by the GitHub API) and timeouts.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(concat!("cronohub/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(timeout.min(Duration::from_secs(30)))
        .timeout(timeout)
        .build()
}

/// Streams an HTTP(S) body to disk, retrying transient failures.
pub struct HttpRetriever {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpRetriever {
    pub fn new(settings: &FetchSettings) -> Result<Self, PluginError> {
        Ok(Self {
            client: http_client(settings.timeout)?,
            retry: settings.retry,
        })
    }

    async fn attempt(&self, locator: &Locator, destination: &Path) -> Result<u64, RetrievalError> {
        let mut request = self.client.get(&locator.url);
        for (key, value) in &locator.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        let mut response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::Status(status.as_u16()));
        }

        let mut file = tokio::fs::File::create(destination).await?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(RetrievalError::Interrupted)?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn retrieve(&self, locator: &Locator, destination: &Path) -> Result<u64, RetrievalError> {
        let result = run_with_retry(&self.retry, &locator.name, |_| {
            self.attempt(locator, destination)
        })
        .await;
        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(destination).await {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!(error = ?e, path = %destination.display(), "Could not remove partial artifact");
                }
            }
        }
        result
    }
}

/// Creates the staging directory. Tolerates it existing already, including
/// when it appears concurrently.
pub async fn ensure_staging_dir(dir: &Path) -> io::Result<()> {
    match tokio::fs::create_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Keeps artifact names filesystem-safe.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "item".to_string()
    } else {
        cleaned
    }
}

/// Assigns each locator a distinct artifact path. Collisions inside the batch,
/// or with files already on disk, get a `-N` suffix.
pub fn allocate_artifact_paths(
    locators: &[Locator],
    staging_dir: &Path,
    timestamp: &str,
    extension: &str,
) -> Vec<PathBuf> {
    let mut taken = HashSet::new();
    locators
        .iter()
        .map(|locator| {
            let stem = format!("{}_{}", sanitize_name(&locator.name), timestamp);
            let mut candidate = staging_dir.join(format!("{stem}{extension}"));
            let mut n = 1u32;
            while candidate.exists() || !taken.insert(candidate.clone()) {
                candidate = staging_dir.join(format!("{stem}-{n}{extension}"));
                n += 1;
            }
            candidate
        })
        .collect()
}

/// Bounded worker pool around a [`Retriever`].
#[derive(Clone)]
pub struct FetchEngine {
    retriever: Arc<dyn Retriever>,
    concurrency: usize,
    extension: String,
}

impl FetchEngine {
    pub fn new(retriever: Arc<dyn Retriever>, settings: &FetchSettings) -> Self {
        Self {
            retriever,
            concurrency: settings.concurrency.max(1),
            extension: settings.extension.clone(),
        }
    }

    /// Engine backed by [`HttpRetriever`].
    pub fn http(settings: &FetchSettings) -> Result<Self, PluginError> {
        let retriever = HttpRetriever::new(settings)?;
        Ok(Self::new(Arc::new(retriever), settings))
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Retrieves every locator into `staging_dir`. Only staging directory
    /// creation fails the whole call; item failures land in the report.
    /// Items are reported in completion order.
    pub async fn fetch_all(
        &self,
        locators: Vec<Locator>,
        staging_dir: &Path,
    ) -> Result<FetchReport, PluginError> {
        ensure_staging_dir(staging_dir).await?;

        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        let paths = allocate_artifact_paths(&locators, staging_dir, &timestamp, &self.extension);
        info!(
            total = locators.len(),
            concurrency = self.concurrency,
            staging_dir = %staging_dir.display(),
            "Fetching artifacts"
        );

        let mut queue = locators.into_iter().zip(paths);
        let mut join_set = JoinSet::new();
        let mut report = FetchReport::default();

        loop {
            while join_set.len() < self.concurrency {
                let Some((locator, path)) = queue.next() else {
                    break;
                };
                let retriever = Arc::clone(&self.retriever);
                join_set.spawn(async move {
                    debug!(name = %locator.name, url = %locator.url, path = %path.display(), "Retrieving");
                    let outcome = AssertUnwindSafe(retriever.retrieve(&locator, &path))
                        .catch_unwind()
                        .await
                        .unwrap_or(Err(RetrievalError::Panicked));
                    (locator, path, outcome)
                });
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            match joined {
                Ok((locator, path, Ok(bytes))) => {
                    info!(name = %locator.name, path = %path.display(), bytes, "Retrieved artifact");
                    report
                        .items
                        .push(ArchiveItem::new(locator.name, path.to_string_lossy()));
                }
                Ok((locator, _, Err(e))) => {
                    warn!(name = %locator.name, url = %locator.url, error = %e, "Retrieval failed");
                    report.failures.push(ItemFailure::retrieval(locator.name, e));
                }
                Err(e) => {
                    error!(error = %e, "Fetch worker did not complete");
                    report.failures.push(ItemFailure::retrieval("<unknown>", e));
                }
            }
        }

        info!(
            retrieved = report.items.len(),
            failed = report.failures.len(),
            "Fetch finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_path_separators() {
        assert_eq!(sanitize_name("org/repo:main"), "org_repo_main");
        assert_eq!(sanitize_name("my-repo.rs"), "my-repo.rs");
        assert_eq!(sanitize_name(""), "item");
    }

    #[test]
    fn duplicate_names_get_distinct_paths() {
        let dir = tempfile::tempdir().unwrap();
        let locators = vec![
            Locator::new("https://example.invalid/a", "dup"),
            Locator::new("https://example.invalid/b", "dup"),
            Locator::new("https://example.invalid/c", "other"),
        ];
        let paths = allocate_artifact_paths(&locators, dir.path(), "20240101-120000", ".zip");
        assert_eq!(paths[0], dir.path().join("dup_20240101-120000.zip"));
        assert_eq!(paths[1], dir.path().join("dup_20240101-120000-1.zip"));
        assert_eq!(paths[2], dir.path().join("other_20240101-120000.zip"));
    }

    #[test]
    fn existing_files_are_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("repo_20240101-120000"), b"old").unwrap();
        let locators = vec![Locator::new("https://example.invalid/a", "repo")];
        let paths = allocate_artifact_paths(&locators, dir.path(), "20240101-120000", "");
        assert_eq!(paths[0], dir.path().join("repo_20240101-120000-1"));
    }

    #[tokio::test]
    async fn staging_dir_creation_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("target");
        ensure_staging_dir(&staging).await.unwrap();
        ensure_staging_dir(&staging).await.unwrap();
        assert!(staging.is_dir());
    }
}
