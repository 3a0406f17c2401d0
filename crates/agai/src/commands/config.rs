//! Config command - configuration management.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};

use agai_config::{AgaiConfig, ConfigLayer, LoadedConfig};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration and where it came from
    Show,

    /// Initialize a config file with defaults
    Init {
        /// Create project-local config (./agai.toml) instead of user config
        #[arg(long)]
        local: bool,
    },

    /// Show configuration file path
    Path,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Init { local } => cmd_init(local),
        ConfigCommand::Path => cmd_path(),
    }
}

/// Settings listed by `config show`, in output order.
const SHOWN_KEYS: &[&str] = &[
    "server.host",
    "server.port",
    "server.https",
    "server.request_logging",
    "session.max_session_count",
    "session.store_type",
    "session.store_path",
    "session.update_channel_capacity",
    "session.persist_debounce_ms",
];

fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = agai_config::load_config(None)?;

    // Fill in defaults so every effective value is visible.
    let mut effective = AgaiConfig::with_defaults();
    effective.merge(loaded.config.clone());

    let origins: Vec<(&str, String)> = SHOWN_KEYS
        .iter()
        .map(|key| (*key, origin_label(&loaded, key)))
        .collect();

    if ctx.json_output {
        let out = serde_json::json!({
            "sources": loaded.loaded_from(),
            "warnings": loaded.warnings,
            "server": effective.server(),
            "session": effective.session(),
            "origins": origins.iter().cloned().collect::<std::collections::BTreeMap<_, _>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("# agai Configuration\n");

    let sources = loaded.loaded_from();
    if sources.is_empty() {
        println!("No config files loaded (using defaults)\n");
    } else {
        println!("Config files:");
        for source in &sources {
            println!("  {}", source.display());
        }
        println!();
    }

    if ctx.verbose {
        println!("Search order (later overrides earlier):");
        for source in &loaded.sources {
            let status = if source.loaded { "loaded" } else { "not found" };
            match &source.path {
                Some(path) => println!("  {:<8} {:<10} {}", source.layer, status, path.display()),
                None => println!("  {:<8} {:<10} {} value(s)", source.layer, status, source.keys.len()),
            }
        }
        println!();
    }

    if !loaded.warnings.is_empty() {
        println!("Warnings:");
        for w in &loaded.warnings {
            println!("  {}", w);
        }
        println!();
    }

    println!("Values:");
    for (key, origin) in &origins {
        println!("  {:<34} {}", key, origin);
    }
    println!();

    print!("{}", effective.to_toml()?);

    Ok(())
}

/// Where `key` got its value: a file path, an env var, or the default.
fn origin_label(loaded: &LoadedConfig, key: &str) -> String {
    match loaded.origin(key) {
        None => "default".to_string(),
        Some(source) if source.layer == ConfigLayer::Env => {
            format!("env {}", agai_config::env_var_for(key).unwrap_or("?"))
        }
        Some(source) => match &source.path {
            Some(path) => format!("{} {}", source.layer, path.display()),
            None => source.layer.to_string(),
        },
    }
}

fn cmd_init(local: bool) -> Result<()> {
    let path = if local {
        PathBuf::from("agai.toml")
    } else {
        agai_config::xdg_config_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
    };

    if path.exists() {
        println!("Config file already exists: {}", path.display());
        return Ok(());
    }

    agai_config::save_config(&AgaiConfig::with_defaults(), &path)?;
    println!("Created config file: {}", path.display());
    println!();
    println!("Next steps:");
    println!("  agai config show    # verify configuration");
    println!("  agai start          # run the server");

    Ok(())
}

fn cmd_path() -> Result<()> {
    match agai_config::xdg_config_path() {
        Some(path) => println!("{}", path.display()),
        None => eprintln!("Could not determine config directory"),
    }
    Ok(())
}
