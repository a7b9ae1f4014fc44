//! Error types for plugins, retrieval and whole runs.

use thiserror::Error;

use crate::contract::{ItemFailure, PluginRole};
use crate::retry::{classify_http_status, ErrorKind, Retryable};

/// Stage-level failure raised by a plugin's `fetch` or `archive`.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{service} returned HTTP {status}: {body}")]
    Api {
        service: String,
        status: u16,
        body: String,
    },
    #[error("invalid plugin output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("plugin protocol error: {0}")]
    Protocol(String),
}

impl Retryable for PluginError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            PluginError::Http(e) => classify_reqwest(e),
            PluginError::Api { status, .. } => classify_http_status(*status),
            _ => ErrorKind::Other,
        }
    }
}

/// Failure to materialise one locator on local storage.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered HTTP {0}")]
    Status(u16),
    /// The body stream broke off after the response started.
    #[error("download interrupted: {0}")]
    Interrupted(#[source] reqwest::Error),
    #[error("could not write artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("worker panicked")]
    Panicked,
}

impl Retryable for RetrievalError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            RetrievalError::Http(e) => classify_reqwest(e),
            RetrievalError::Status(code) => classify_http_status(*code),
            RetrievalError::Interrupted(_) => ErrorKind::Connection,
            RetrievalError::Io(_) | RetrievalError::Panicked => ErrorKind::Other,
        }
    }
}

pub(crate) fn classify_reqwest(e: &reqwest::Error) -> ErrorKind {
    if e.is_timeout() {
        return ErrorKind::Timeout;
    }
    if e.is_connect() || e.is_request() || e.is_body() {
        return ErrorKind::Connection;
    }
    match e.status() {
        Some(status) => classify_http_status(status.as_u16()),
        None => ErrorKind::Other,
    }
}

/// Plugin resolution failure.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{role} plugin not found: {name}")]
    NotFound { role: PluginRole, name: String },
}

/// Why a run did not complete. Every variant maps to a process exit status.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("{0}")]
    Configuration(String),
    #[error("{role} plugin not found: {name}")]
    PluginNotFound { role: PluginRole, name: String },
    #[error("{role} plugin {name} failed validation")]
    ValidationFailed { role: PluginRole, name: String },
    #[error("fetch with source plugin {plugin} failed: {source}")]
    Fetch {
        plugin: String,
        #[source]
        source: PluginError,
    },
    #[error("source plugin {plugin} retrieved nothing ({} failures)", .failures.len())]
    NothingFetched {
        plugin: String,
        failures: Vec<ItemFailure>,
    },
}

impl RunError {
    /// Stable machine-readable code, printed next to the diagnostic.
    pub fn code(&self) -> &'static str {
        match self {
            RunError::Configuration(_) => "configuration_error",
            RunError::PluginNotFound { .. } => "plugin_not_found",
            RunError::ValidationFailed { .. } => "validation_failed",
            RunError::Fetch { .. } => "fetch_failed",
            RunError::NothingFetched { .. } => "retrieval_failed",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Configuration(_)
            | RunError::PluginNotFound { .. }
            | RunError::ValidationFailed { .. } => 1,
            RunError::Fetch { .. } | RunError::NothingFetched { .. } => 2,
        }
    }
}

impl From<RegistryError> for RunError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound { role, name } => RunError::PluginNotFound { role, name },
        }
    }
}
