//! Bundled source and target plugins.
//!
//! Each submodule exposes a `factory` that builds its plugin from the run's
//! [`PluginContext`]. [`builtin_registry`] registers all of them under their
//! CLI names; executables in the user's plugin directory can still shadow any
//! of these (see `cronohub_core::registry`).

pub mod github;
pub mod gitlab;
pub mod local;
pub mod no_op;
pub mod owncloud;
pub mod s3;
pub mod scp;

use std::path::PathBuf;

use cronohub_core::error::PluginError;
use cronohub_core::registry::PluginRegistry;
use reqwest::Response;

pub const DEFAULT_SOURCE: &str = "github";
pub const DEFAULT_TARGET: &str = "scp";

/// Registry with every bundled plugin, overridable from `plugin_dir`.
pub fn builtin_registry(plugin_dir: impl Into<PathBuf>) -> PluginRegistry {
    let mut registry = PluginRegistry::new().with_override_dir(plugin_dir);
    registry.register_source("github", github::factory);
    registry.register_source("gitlab", gitlab::factory);
    registry.register_source("local", local::factory);
    registry.register_target("scp", scp::factory);
    registry.register_target("s3", s3::factory);
    registry.register_target("owncloud", owncloud::factory);
    registry.register_target("no_op", no_op::factory);
    registry
}

/// Non-empty value of an environment variable.
pub(crate) fn env_value(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

pub(crate) fn missing_env(var: &str) -> PluginError {
    PluginError::Configuration(format!("{var} is not set"))
}

/// Passes successful responses through, turns anything else into [`PluginError::Api`].
pub(crate) async fn ensure_success(service: &str, response: Response) -> Result<Response, PluginError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PluginError::Api {
        service: service.to_string(),
        status: status.as_u16(),
        body,
    })
}

/// Final path component of a local artifact, used as the remote object name.
pub(crate) fn basename(location: &str) -> Result<String, PluginError> {
    std::path::Path::new(location)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| PluginError::Configuration(format!("{location} has no file name")))
}
