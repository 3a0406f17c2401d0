//! Configuration system for the agai session server.
//!
//! Provides TOML-based configuration with:
//! - `[server]` listener settings and `[session]` registry settings
//! - Config file layering (XDG user config + project-local overrides)
//! - Environment variable overrides applied on top of the files
//! - Per-key provenance, so callers can report which layer set a value

pub mod discovery;
pub mod env;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigLayer, ConfigLoader, ConfigSource, LoadedConfig, load_config, load_config_file,
    save_config, xdg_config_dir, xdg_config_path,
};
pub use env::{ENV_VARS, EnvReport, apply_env_overrides, apply_process_env, env_var_for};
pub use error::{ConfigError, Result};
pub use types::*;
