//! Sorter registry and dispatch
//!
//! Maps sorter names to adapters and owns each adapter's installation state.
//! Install paths resolve as: explicit path, then the adapter's environment
//! variable, then `[sorters.<name>] path` in the config file. The only way to
//! change installation state afterwards is [`SorterRegistry::set_install_path`].

use crate::adapter::SorterAdapter;
use crate::error::{Result, SorterError};
use crate::kilosort::KilosortAdapter;
use crate::kilosort2::Kilosort2Adapter;
use crate::lifecycle::{SorterLifecycle, SorterOptions};
use crate::params::ParamSet;
use once_cell::sync::OnceCell;
use spikesort_common::config::{load_config, SpikesortConfig};
use spikesort_common::{Recording, Sorting};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Resolved install location and probe result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Installation {
    pub path: Option<PathBuf>,
    pub installed: bool,
}

/// One registered adapter with its installation state
pub struct RegistryEntry {
    adapter: Arc<dyn SorterAdapter>,
    installation: RwLock<Installation>,
}

impl RegistryEntry {
    fn new(adapter: Arc<dyn SorterAdapter>, path: Option<PathBuf>) -> Self {
        let installed = adapter.check_installed(path.as_deref());
        Self {
            adapter,
            installation: RwLock::new(Installation { path, installed }),
        }
    }

    pub fn adapter(&self) -> &Arc<dyn SorterAdapter> {
        &self.adapter
    }

    pub fn installation(&self) -> Installation {
        self.installation
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn update(&self, installation: Installation) {
        *self.installation.write().unwrap_or_else(|e| e.into_inner()) = installation;
    }

    /// Probe the current path again and store the result
    fn reprobe(&self) -> bool {
        let path = self.installation().path;
        let installed = self.adapter.check_installed(path.as_deref());
        self.update(Installation { path, installed });
        installed
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("name", &self.adapter.name())
            .field("installation", &self.installation())
            .finish()
    }
}

/// Sorter selected by name or by adapter instance
#[derive(Clone)]
pub enum SorterRef {
    Name(String),
    Adapter(Arc<dyn SorterAdapter>),
}

impl fmt::Display for SorterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SorterRef::Name(name) => write!(f, "{}", name),
            SorterRef::Adapter(adapter) => write!(f, "{}", adapter.name()),
        }
    }
}

impl From<&str> for SorterRef {
    fn from(name: &str) -> Self {
        SorterRef::Name(name.to_string())
    }
}

impl From<String> for SorterRef {
    fn from(name: String) -> Self {
        SorterRef::Name(name)
    }
}

impl From<Arc<dyn SorterAdapter>> for SorterRef {
    fn from(adapter: Arc<dyn SorterAdapter>) -> Self {
        SorterRef::Adapter(adapter)
    }
}

/// Registered sorters in registration order
#[derive(Debug, Default)]
pub struct SorterRegistry {
    entries: Vec<Arc<RegistryEntry>>,
    by_name: HashMap<String, usize>,
}

impl SorterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in adapter, install paths from env and `config`
    pub fn with_builtin_sorters(config: &SpikesortConfig) -> Self {
        let mut registry = Self::new();
        let builtins: Vec<Arc<dyn SorterAdapter>> =
            vec![Arc::new(KilosortAdapter), Arc::new(Kilosort2Adapter)];
        for adapter in builtins {
            let path = resolve_install_path(adapter.as_ref(), None, Some(config));
            registry.insert(adapter, path);
        }
        registry
    }

    /// Register an adapter, install path from its environment variable
    pub fn register(&mut self, adapter: Arc<dyn SorterAdapter>) {
        let path = resolve_install_path(adapter.as_ref(), None, None);
        self.insert(adapter, path);
    }

    /// Register an adapter with an explicit install path
    pub fn register_with_path(&mut self, adapter: Arc<dyn SorterAdapter>, path: Option<PathBuf>) {
        let path = resolve_install_path(adapter.as_ref(), path, None);
        self.insert(adapter, path);
    }

    fn insert(&mut self, adapter: Arc<dyn SorterAdapter>, path: Option<PathBuf>) {
        let name = adapter.name().to_string();
        let entry = Arc::new(RegistryEntry::new(adapter, path));
        debug!(sorter = %name, installation = ?entry.installation(), "Registered sorter");

        match self.by_name.get(&name) {
            Some(&index) => {
                warn!(sorter = %name, "Sorter registered twice, replacing earlier registration");
                self.entries[index] = entry;
            }
            None => {
                self.by_name.insert(name, self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// All registered sorter names, sorted
    pub fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of sorters whose tool is installed right now, sorted
    pub fn installed(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.reprobe())
            .map(|e| e.adapter.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Point a sorter at a new install folder and re-probe it
    ///
    /// Returns the new installed flag.
    pub fn set_install_path(&self, name: &str, path: impl Into<PathBuf>) -> Result<bool> {
        let entry = self.resolve(&SorterRef::from(name))?;
        let path = path.into();
        let installed = entry.adapter.check_installed(Some(&path));
        info!(sorter = %name, path = %path.display(), installed, "Set install path");
        entry.update(Installation {
            path: Some(path),
            installed,
        });
        Ok(installed)
    }

    pub fn resolve(&self, sorter: &SorterRef) -> Result<Arc<RegistryEntry>> {
        let entry = match sorter {
            SorterRef::Name(name) => self.by_name.get(name).map(|&i| &self.entries[i]),
            SorterRef::Adapter(adapter) => {
                let wanted = Arc::as_ptr(adapter) as *const ();
                self.entries
                    .iter()
                    .find(|e| Arc::as_ptr(&e.adapter) as *const () == wanted)
            }
        };
        entry
            .cloned()
            .ok_or_else(|| SorterError::UnknownSorter(sorter.to_string()))
    }

    pub fn installation(&self, sorter: &SorterRef) -> Result<Installation> {
        Ok(self.resolve(sorter)?.installation())
    }

    /// Construct a lifecycle for a registered sorter
    pub fn build_sorter(
        &self,
        sorter: &SorterRef,
        recording: Arc<dyn Recording>,
        options: SorterOptions,
    ) -> Result<SorterLifecycle> {
        let entry = self.resolve(sorter)?;
        SorterLifecycle::new(
            Arc::clone(&entry.adapter),
            entry.installation(),
            recording,
            options,
        )
    }

    /// Construct, configure, run and collect in one call
    pub async fn run_sorter(
        &self,
        sorter: impl Into<SorterRef>,
        recording: Arc<dyn Recording>,
        options: SorterOptions,
        params: ParamSet,
    ) -> Result<Box<dyn Sorting>> {
        let sorter = sorter.into();
        let mut lifecycle = self.build_sorter(&sorter, recording, options)?;
        lifecycle.set_params(params)?;
        lifecycle.run().await?;
        lifecycle.get_result()
    }

    pub fn get_default_params(&self, sorter: impl Into<SorterRef>) -> Result<ParamSet> {
        Ok(self.resolve(&sorter.into())?.adapter.default_params())
    }

    pub async fn sorter_version(&self, sorter: impl Into<SorterRef>) -> Result<Option<String>> {
        let entry = self.resolve(&sorter.into())?;
        let path = entry.installation().path;
        Ok(entry.adapter.version(path.as_deref()).await)
    }
}

/// Install path priority: explicit, environment variable, config file
pub fn resolve_install_path(
    adapter: &dyn SorterAdapter,
    explicit: Option<PathBuf>,
    config: Option<&SpikesortConfig>,
) -> Option<PathBuf> {
    explicit
        .or_else(|| {
            adapter
                .install_env_var()
                .and_then(|var| std::env::var(var).ok())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        })
        .or_else(|| {
            config
                .and_then(|c| c.tool_path(adapter.name()))
                .map(|p| p.to_path_buf())
        })
}

static DEFAULT_REGISTRY: OnceCell<SorterRegistry> = OnceCell::new();

/// Build the process-wide registry from `config`
///
/// Has no effect if the registry already exists.
pub fn init_default_registry(config: &SpikesortConfig) -> &'static SorterRegistry {
    DEFAULT_REGISTRY.get_or_init(|| SorterRegistry::with_builtin_sorters(config))
}

/// Process-wide registry, built on first use from the default config file
pub fn default_registry() -> &'static SorterRegistry {
    DEFAULT_REGISTRY.get_or_init(|| {
        let config = load_config(None).unwrap_or_else(|e| {
            warn!(error = %e, "Config load failed, using defaults");
            SpikesortConfig::default()
        });
        SorterRegistry::with_builtin_sorters(&config)
    })
}

pub async fn run_sorter(
    sorter: impl Into<SorterRef>,
    recording: Arc<dyn Recording>,
    options: SorterOptions,
    params: ParamSet,
) -> Result<Box<dyn Sorting>> {
    default_registry()
        .run_sorter(sorter, recording, options, params)
        .await
}

pub fn available_sorters() -> Vec<String> {
    default_registry().available()
}

pub fn installed_sorters() -> Vec<String> {
    default_registry().installed()
}

pub fn get_default_params(sorter: impl Into<SorterRef>) -> Result<ParamSet> {
    default_registry().get_default_params(sorter)
}

pub async fn run_kilosort(
    recording: Arc<dyn Recording>,
    options: SorterOptions,
    params: ParamSet,
) -> Result<Box<dyn Sorting>> {
    run_sorter("kilosort", recording, options, params).await
}

pub async fn run_kilosort2(
    recording: Arc<dyn Recording>,
    options: SorterOptions,
    params: ParamSet,
) -> Result<Box<dyn Sorting>> {
    run_sorter("kilosort2", recording, options, params).await
}
