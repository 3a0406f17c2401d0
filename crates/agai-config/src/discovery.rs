//! Config file discovery and layered merging.
//!
//! Layers, later overriding earlier:
//! 1. `config.toml` in the user config dir (`$AGAI_CONFIG_DIR`, else
//!    `~/.config/agai`)
//! 2. `agai.toml` in the project dir
//! 3. Environment variables (see [`crate::env`])
//!
//! An explicit file ([`ConfigLoader::file`]) replaces both file layers.
//! Files are merged key by key, so a project file setting only
//! `server.port` keeps the user file's `server.host`. CLI flags are applied
//! by the caller on top of the result.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::env::{self, EnvReport};
use crate::{AgaiConfig, ConfigError, Result};

const PROJECT_CONFIG_FILE: &str = "agai.toml";
const USER_CONFIG_FILE: &str = "config.toml";
const APP_NAME: &str = "agai";
const CONFIG_DIR_ENV: &str = "AGAI_CONFIG_DIR";

/// Which layer a [`ConfigSource`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayer {
    User,
    Project,
    /// A file named on the command line.
    Explicit,
    Env,
}

impl fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigLayer::User => "user",
            ConfigLayer::Project => "project",
            ConfigLayer::Explicit => "file",
            ConfigLayer::Env => "env",
        };
        f.write_str(name)
    }
}

/// One layer that was consulted while loading.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSource {
    pub layer: ConfigLayer,
    /// The file behind a file layer.
    pub path: Option<PathBuf>,
    /// Whether the layer contributed anything.
    pub loaded: bool,
    /// Dotted keys this layer set, e.g. `server.port`.
    pub keys: Vec<String>,
}

/// The merged configuration and where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AgaiConfig,
    /// Layers in the order they were applied.
    pub sources: Vec<ConfigSource>,
    /// Unreadable discovered files and unparseable env values.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Paths of the files that were loaded.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .filter_map(|s| s.path.as_deref())
            .collect()
    }

    /// The layer that set `key` last, or `None` if it is a default.
    pub fn origin(&self, key: &str) -> Option<&ConfigSource> {
        self.sources
            .iter()
            .rev()
            .find(|s| s.keys.iter().any(|k| k == key))
    }
}

#[derive(Debug, Clone)]
enum EnvSource {
    Process,
    Vars(HashMap<String, String>),
    Disabled,
}

/// Builder for a config load.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    user_dir: Option<PathBuf>,
    project_dir: PathBuf,
    explicit: Option<PathBuf>,
    env: EnvSource,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// User config dir from the environment, project dir `.`, process env.
    pub fn new() -> Self {
        Self {
            user_dir: xdg_config_dir(),
            project_dir: PathBuf::from("."),
            explicit: None,
            env: EnvSource::Process,
        }
    }

    pub fn user_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_dir = Some(dir.into());
        self
    }

    pub fn project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = dir.into();
        self
    }

    /// Load exactly this file instead of discovering. Unlike discovered
    /// files, a missing or invalid explicit file is an error.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit = Some(path.into());
        self
    }

    /// Read overrides from `vars` instead of the process environment.
    pub fn env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = EnvSource::Vars(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    /// Skip the environment layer.
    pub fn without_env(mut self) -> Self {
        self.env = EnvSource::Disabled;
        self
    }

    pub fn load(&self) -> Result<LoadedConfig> {
        let mut merged = toml::Table::new();
        let mut sources = Vec::new();
        let mut warnings = Vec::new();

        match &self.explicit {
            Some(path) => {
                let table = read_table(path)?;
                sources.push(merge_layer(&mut merged, ConfigLayer::Explicit, path, table));
            }
            None => {
                if let Some(dir) = &self.user_dir {
                    let path = dir.join(USER_CONFIG_FILE);
                    sources.push(discover(&mut merged, ConfigLayer::User, &path, &mut warnings));
                }
                let path = self.project_dir.join(PROJECT_CONFIG_FILE);
                sources.push(discover(&mut merged, ConfigLayer::Project, &path, &mut warnings));
            }
        }

        let mut config = toml::Value::Table(merged).try_into::<AgaiConfig>()?;

        let report = match &self.env {
            EnvSource::Process => env::apply_process_env(&mut config),
            EnvSource::Vars(vars) => env::apply_env_overrides(&mut config, |k| vars.get(k).cloned()),
            EnvSource::Disabled => EnvReport::default(),
        };
        warnings.extend(report.warnings);
        sources.push(ConfigSource {
            layer: ConfigLayer::Env,
            path: None,
            loaded: !report.applied.is_empty(),
            keys: report.applied.iter().map(|k| k.to_string()).collect(),
        });

        Ok(LoadedConfig {
            config,
            sources,
            warnings,
        })
    }
}

/// Discover config in `project_dir` (default `.`) and the user config dir,
/// then apply the process environment.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(dir) = project_dir {
        loader = loader.project_dir(dir);
    }
    loader.load()
}

/// Parse one config file on its own.
pub fn load_config_file(path: &Path) -> Result<AgaiConfig> {
    AgaiConfig::from_toml(&read_file(path)?)
}

/// Write `config` to `path`, creating parent directories.
pub fn save_config(config: &AgaiConfig, path: &Path) -> Result<()> {
    let write_err = |path: &Path, source| ConfigError::WriteFile {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| write_err(parent, e))?;
    }
    std::fs::write(path, config.to_toml()?).map_err(|e| write_err(path, e))
}

/// Path of the user config file.
pub fn xdg_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// User config directory: `AGAI_CONFIG_DIR` if set, else the platform
/// default (`~/.config/agai` on Linux).
pub fn xdg_config_dir() -> Option<PathBuf> {
    match std::env::var(CONFIG_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|d| d.join(APP_NAME)),
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })
}

/// Read a layer as a raw table, rejecting files that do not fit the schema.
fn read_table(path: &Path) -> Result<toml::Table> {
    let contents = read_file(path)?;
    AgaiConfig::from_toml(&contents)?;
    Ok(contents.parse()?)
}

/// Merge a discovered file if present. A broken file is skipped with a
/// warning so one bad layer does not stop the server.
fn discover(
    merged: &mut toml::Table,
    layer: ConfigLayer,
    path: &Path,
    warnings: &mut Vec<String>,
) -> ConfigSource {
    let skipped = ConfigSource {
        layer,
        path: Some(path.to_path_buf()),
        loaded: false,
        keys: Vec::new(),
    };
    if !path.is_file() {
        return skipped;
    }
    match read_table(path) {
        Ok(table) => merge_layer(merged, layer, path, table),
        Err(e) => {
            warnings.push(format!("skipping {}: {}", path.display(), e));
            skipped
        }
    }
}

fn merge_layer(
    merged: &mut toml::Table,
    layer: ConfigLayer,
    path: &Path,
    table: toml::Table,
) -> ConfigSource {
    let mut keys = Vec::new();
    merge_table(merged, table, "", &mut keys);
    ConfigSource {
        layer,
        path: Some(path.to_path_buf()),
        loaded: true,
        keys,
    }
}

/// Deep-merge `layer` into `base`, collecting the dotted keys it set.
fn merge_table(base: &mut toml::Table, layer: toml::Table, prefix: &str, keys: &mut Vec<String>) {
    for (key, value) in layer {
        let dotted = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            toml::Value::Table(table) => {
                let entry = base
                    .entry(key)
                    .or_insert_with(|| toml::Value::Table(toml::Table::new()));
                if !entry.is_table() {
                    *entry = toml::Value::Table(toml::Table::new());
                }
                if let toml::Value::Table(existing) = entry {
                    merge_table(existing, table, &dotted, keys);
                }
            }
            value => {
                keys.push(dotted);
                base.insert(key, value);
            }
        }
    }
}
