//! Start command - launches the agai server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Args;

use agai_config::{AgaiConfig, ConfigLoader};
use agai_server::{Server, ServerConfig};
use agai_session::{SessionConfig, SessionManager, StoreType};

use super::Context;

/// Arguments for the start command.
///
/// CLI arguments override config file and environment values.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind to (overrides config)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Mark session cookies Secure and HttpOnly
    #[arg(long)]
    pub https: bool,

    /// Maximum number of live sessions before LRU eviction
    #[arg(long)]
    pub max_sessions: Option<usize>,

    /// Session store: memory or disk
    #[arg(long, value_parser = parse_store_type)]
    pub store: Option<StoreType>,

    /// Snapshot file for the disk store
    #[arg(long)]
    pub store_path: Option<PathBuf>,

    /// Path to config file (overrides default discovery)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

fn parse_store_type(s: &str) -> std::result::Result<StoreType, String> {
    s.parse()
}

/// Run the start command.
pub async fn run(args: StartArgs, ctx: &Context) -> Result<()> {
    // ── Load configuration ──────────────────────────────────────────────

    let mut loader = ConfigLoader::new();
    if let Some(ref config_path) = args.config {
        loader = loader.file(config_path);
    }
    let mut loaded = loader.load()?;

    for warning in &loaded.warnings {
        eprintln!("warning: {}", warning);
    }

    apply_cli_overrides(&mut loaded.config, &args);

    let (session_config, server_config) = build_configs(&loaded.config).await?;

    if ctx.verbose {
        for path in loaded.loaded_from() {
            tracing::debug!(path = %path.display(), "Loaded config file");
        }
    }

    // ── Session registry ────────────────────────────────────────────────

    let sessions = SessionManager::start(session_config).await;
    tracing::info!(
        store = %sessions.config().store_type,
        max_sessions = sessions.config().max_sessions,
        restored = sessions.len(),
        "Session registry ready"
    );

    // ── Serve ───────────────────────────────────────────────────────────

    let addr = server_config.bind_address;
    let server = Server::new(sessions.clone(), server_config);

    println!("agai server starting on http://{}", addr);
    println!("Press Ctrl+C to stop");

    let result = server.run_until(addr, shutdown_signal()).await;

    sessions.shutdown().await;
    result?;

    Ok(())
}

/// Fold CLI flags into the loaded config.
fn apply_cli_overrides(config: &mut AgaiConfig, args: &StartArgs) {
    let server = config.server_mut();
    if let Some(port) = args.port {
        server.port = port;
    }
    if let Some(ref bind) = args.bind {
        server.host = bind.clone();
    }
    if args.https {
        server.https = true;
    }

    let session = config.session_mut();
    if let Some(max) = args.max_sessions {
        session.max_session_count = max;
    }
    if let Some(store) = args.store {
        session.store_type = store.to_string();
    }
    if let Some(ref path) = args.store_path {
        session.store_path = path.clone();
    }
}

/// Turn the merged config into the session and server configs.
async fn build_configs(config: &AgaiConfig) -> Result<(SessionConfig, ServerConfig)> {
    let session = config.session();
    session.validate()?;

    let store_type: StoreType = session
        .store_type
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let mut session_config = SessionConfig::new()
        .with_max_sessions(session.max_session_count)
        .with_update_channel_capacity(session.update_channel_capacity)
        .with_persist_debounce(Duration::from_millis(session.persist_debounce_ms));
    session_config = match store_type {
        StoreType::Disk => session_config.with_disk_store(session.store_path.clone()),
        StoreType::Memory => session_config.with_store_type(StoreType::Memory),
    };

    let server = config.server();
    let bind_address = resolve_bind_address(&server.bind_address()).await?;
    let server_config = ServerConfig::new()
        .with_bind_address(bind_address)
        .with_https(server.https)
        .with_request_logging(server.request_logging);

    Ok((session_config, server_config))
}

/// Resolve `host:port`, accepting hostnames such as `localhost`.
async fn resolve_bind_address(bind: &str) -> Result<SocketAddr> {
    if let Ok(addr) = bind.parse() {
        return Ok(addr);
    }
    tokio::net::lookup_host(bind)
        .await
        .with_context(|| format!("Invalid bind address: {bind}"))?
        .next()
        .with_context(|| format!("Bind address resolved to nothing: {bind}"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    println!();
    println!("Shutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> StartArgs {
        StartArgs {
            port: None,
            bind: None,
            https: false,
            max_sessions: None,
            store: None,
            store_path: None,
            config: None,
        }
    }

    #[test]
    fn test_cli_overrides_config() {
        let mut config = AgaiConfig::with_defaults();
        let args = StartArgs {
            port: Some(9100),
            bind: Some("0.0.0.0".to_string()),
            https: true,
            max_sessions: Some(10),
            store: Some(StoreType::Disk),
            store_path: Some(PathBuf::from("/tmp/agai.data")),
            ..args()
        };

        apply_cli_overrides(&mut config, &args);

        let server = config.server();
        assert_eq!(server.bind_address(), "0.0.0.0:9100");
        assert!(server.https);
        let session = config.session();
        assert_eq!(session.max_session_count, 10);
        assert_eq!(session.store_type, "disk");
        assert_eq!(session.store_path, PathBuf::from("/tmp/agai.data"));
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let mut config = AgaiConfig::from_toml("[server]\nport = 7000\nhttps = true\n").unwrap();
        apply_cli_overrides(&mut config, &args());

        assert_eq!(config.server().port, 7000);
        assert!(config.server().https);
    }

    #[tokio::test]
    async fn test_build_configs_disk_store() {
        let config = AgaiConfig::from_toml(
            "[session]\nmax_session_count = 3\nstore_type = \"storage\"\nstore_path = \"s.data\"\n",
        )
        .unwrap();

        let (session, server) = build_configs(&config).await.unwrap();
        assert_eq!(session.max_sessions, 3);
        assert_eq!(session.store_type, StoreType::Disk);
        assert_eq!(session.store_path, PathBuf::from("s.data"));
        assert_eq!(server.bind_address.port(), 8080);
    }

    #[tokio::test]
    async fn test_build_configs_rejects_bad_values() {
        let config = AgaiConfig::from_toml("[session]\nstore_type = \"redis\"\n").unwrap();
        let err = build_configs(&config).await.unwrap_err();
        assert!(err.to_string().contains("unknown session store type"));

        let config = AgaiConfig::from_toml("[session]\nmax_session_count = 0\n").unwrap();
        assert!(build_configs(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_bind_address() {
        let addr = resolve_bind_address("127.0.0.1:8080").await.unwrap();
        assert_eq!(addr.port(), 8080);
        assert!(resolve_bind_address("not an address").await.is_err());
    }
}
