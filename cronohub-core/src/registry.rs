//! Plugin resolution by role and exact name.
//!
//! Search order:
//! 1. the user override directory, `<config>/plugins/<role>/`, for an
//!    executable whose file name equals the requested name
//!    (see [`crate::external`]);
//! 2. the bundled plugins registered at startup as named factories.
//!
//! A hit in step 1 wins; step 2 is then never consulted. Names are matched
//! exactly, so asking for `s3` never picks up `s3_test` or `s3.bak`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::contract::{PluginContext, PluginRole, SourcePlugin, TargetPlugin};
use crate::error::RegistryError;
use crate::external::ExternalPlugin;

pub type SourceFactory = Box<dyn Fn(&PluginContext) -> Box<dyn SourcePlugin> + Send + Sync>;
pub type TargetFactory = Box<dyn Fn(&PluginContext) -> Box<dyn TargetPlugin> + Send + Sync>;

/// Where a resolved plugin came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginOrigin {
    Bundled,
    External(PathBuf),
}

impl fmt::Display for PluginOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginOrigin::Bundled => f.write_str("bundled"),
            PluginOrigin::External(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub role: PluginRole,
    pub name: String,
    pub origin: PluginOrigin,
}

/// A descriptor together with the loaded plugin, owned by the orchestrator for one run.
pub struct Resolved<P: ?Sized> {
    pub descriptor: PluginDescriptor,
    pub plugin: Box<P>,
}

pub type ResolvedSource = Resolved<dyn SourcePlugin>;
pub type ResolvedTarget = Resolved<dyn TargetPlugin>;

impl<P: ?Sized> Resolved<P> {
    pub fn new(role: PluginRole, name: impl Into<String>, origin: PluginOrigin, plugin: Box<P>) -> Self {
        Self {
            descriptor: PluginDescriptor {
                role,
                name: name.into(),
                origin,
            },
            plugin,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

#[derive(Default)]
pub struct PluginRegistry {
    override_dir: Option<PathBuf>,
    sources: BTreeMap<String, SourceFactory>,
    targets: BTreeMap<String, TargetFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root of the per-role override directories (`.../plugins`).
    pub fn with_override_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.override_dir = Some(dir.into());
        self
    }

    pub fn register_source<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&PluginContext) -> Box<dyn SourcePlugin> + Send + Sync + 'static,
    {
        self.sources.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_target<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&PluginContext) -> Box<dyn TargetPlugin> + Send + Sync + 'static,
    {
        self.targets.insert(name.to_string(), Box::new(factory));
    }

    pub fn resolve_source(
        &self,
        name: &str,
        context: &PluginContext,
    ) -> Result<ResolvedSource, RegistryError> {
        let role = PluginRole::Source;
        if let Some(program) = self.find_external(role, name) {
            info!(role = %role, plugin = name, path = %program.display(), "Loaded external plugin");
            let plugin: Box<dyn SourcePlugin> = Box::new(ExternalPlugin::new(role, name, &program));
            return Ok(Resolved::new(role, name, PluginOrigin::External(program), plugin));
        }
        match self.sources.get(name) {
            Some(factory) => {
                info!(role = %role, plugin = name, "Loaded bundled plugin");
                Ok(Resolved::new(role, name, PluginOrigin::Bundled, factory(context)))
            }
            None => Err(RegistryError::NotFound {
                role,
                name: name.to_string(),
            }),
        }
    }

    pub fn resolve_target(
        &self,
        name: &str,
        context: &PluginContext,
    ) -> Result<ResolvedTarget, RegistryError> {
        let role = PluginRole::Target;
        if let Some(program) = self.find_external(role, name) {
            info!(role = %role, plugin = name, path = %program.display(), "Loaded external plugin");
            let plugin: Box<dyn TargetPlugin> = Box::new(ExternalPlugin::new(role, name, &program));
            return Ok(Resolved::new(role, name, PluginOrigin::External(program), plugin));
        }
        match self.targets.get(name) {
            Some(factory) => {
                info!(role = %role, plugin = name, "Loaded bundled plugin");
                Ok(Resolved::new(role, name, PluginOrigin::Bundled, factory(context)))
            }
            None => Err(RegistryError::NotFound {
                role,
                name: name.to_string(),
            }),
        }
    }

    /// Every plugin name resolvable for `role`, external ones shadowing bundled ones.
    pub fn available(&self, role: PluginRole) -> Vec<PluginDescriptor> {
        let mut found: BTreeMap<String, PluginOrigin> = BTreeMap::new();
        let bundled: Vec<&String> = match role {
            PluginRole::Source => self.sources.keys().collect(),
            PluginRole::Target => self.targets.keys().collect(),
        };
        for name in bundled {
            found.insert(name.clone(), PluginOrigin::Bundled);
        }
        for program in self.external_candidates(role) {
            if let Some(name) = plugin_name(&program) {
                found.insert(name.to_string(), PluginOrigin::External(program.clone()));
            }
        }
        found
            .into_iter()
            .map(|(name, origin)| PluginDescriptor { role, name, origin })
            .collect()
    }

    fn role_dir(&self, role: PluginRole) -> Option<PathBuf> {
        self.override_dir.as_ref().map(|d| d.join(role.dir_name()))
    }

    /// Executables in the role's override directory, sorted by path.
    fn external_candidates(&self, role: PluginRole) -> Vec<PathBuf> {
        let Some(dir) = self.role_dir(role) else {
            return Vec::new();
        };
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(path = %dir.display(), error = %e, "No plugin override directory");
                return Vec::new();
            }
        };
        let mut programs: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| {
                let executable = is_executable(path);
                if !executable {
                    warn!(path = %path.display(), "Ignoring non-executable file in plugin directory");
                }
                executable
            })
            .collect();
        programs.sort();
        programs
    }

    fn find_external(&self, role: PluginRole, name: &str) -> Option<PathBuf> {
        self.external_candidates(role)
            .into_iter()
            .find(|path| plugin_name(path) == Some(name))
    }
}

fn plugin_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
