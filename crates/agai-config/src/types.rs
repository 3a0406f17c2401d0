//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [server]     # listener settings
//! [session]    # session registry settings
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Default port to listen on.
pub const DEFAULT_PORT: u16 = 8080;

/// Default address to bind to.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgaiConfig {
    /// HTTP listener configuration.
    pub server: Option<ServerSection>,

    /// Session registry configuration.
    pub session: Option<SessionSection>,
}

impl AgaiConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Config with every section filled with defaults, as written by
    /// `agai config init`.
    pub fn with_defaults() -> Self {
        Self {
            server: Some(ServerSection::default()),
            session: Some(SessionSection::default()),
        }
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole, as in the file a section came from.
    pub fn merge(&mut self, other: AgaiConfig) {
        if other.server.is_some() {
            self.server = other.server;
        }
        if other.session.is_some() {
            self.session = other.session;
        }
    }

    /// The server section, or defaults.
    pub fn server(&self) -> ServerSection {
        self.server.clone().unwrap_or_default()
    }

    /// The session section, or defaults.
    pub fn session(&self) -> SessionSection {
        self.session.clone().unwrap_or_default()
    }

    /// Mutable server section, inserting defaults if absent.
    pub fn server_mut(&mut self) -> &mut ServerSection {
        self.server.get_or_insert_with(ServerSection::default)
    }

    /// Mutable session section, inserting defaults if absent.
    pub fn session_mut(&mut self) -> &mut SessionSection {
        self.session.get_or_insert_with(SessionSection::default)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Whether the server sits behind HTTPS. Marks the session cookie
    /// `Secure`.
    pub https: bool,
    /// Enable request logging.
    pub request_logging: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            https: false,
            request_logging: true,
        }
    }
}

impl ServerSection {
    /// `host:port` as a bind string.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Session registry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Maximum number of live sessions before LRU eviction.
    pub max_session_count: usize,
    /// `memory` or `disk` (`storage` is accepted as an alias).
    pub store_type: String,
    /// Snapshot file for disk mode.
    pub store_path: PathBuf,
    /// Capacity of the LRU update channel.
    pub update_channel_capacity: usize,
    /// Delay between a mutation and the snapshot write it triggers.
    pub persist_debounce_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            max_session_count: 50_000,
            store_type: "memory".to_string(),
            store_path: PathBuf::from("sessions.data"),
            update_channel_capacity: 1000,
            persist_debounce_ms: 100,
        }
    }
}

impl SessionSection {
    /// Reject values the session registry cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_session_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.max_session_count".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.update_channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.update_channel_capacity".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = AgaiConfig::from_toml(
            r#"
[server]
host = "0.0.0.0"
port = 9000
https = true

[session]
max_session_count = 10
store_type = "disk"
store_path = "/var/lib/agai/sessions.data"
"#,
        )
        .unwrap();

        let server = config.server();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 9000);
        assert!(server.https);
        assert!(server.request_logging);

        let session = config.session();
        assert_eq!(session.max_session_count, 10);
        assert_eq!(session.store_type, "disk");
        assert_eq!(session.update_channel_capacity, 1000);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AgaiConfig::from_toml("").unwrap();
        assert!(config.server.is_none());
        assert_eq!(config.server().bind_address(), "127.0.0.1:8080");
        assert_eq!(config.session().max_session_count, 50_000);
        assert_eq!(config.session().store_type, "memory");
    }

    #[test]
    fn test_merge_replaces_present_sections() {
        let mut base = AgaiConfig::with_defaults();
        let overlay = AgaiConfig::from_toml("[server]\nport = 1234\n").unwrap();
        base.merge(overlay);

        assert_eq!(base.server().port, 1234);
        assert_eq!(base.session(), SessionSection::default());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AgaiConfig::with_defaults();
        let text = config.to_toml().unwrap();
        assert!(text.contains("[session]"));
        assert_eq!(AgaiConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let session = SessionSection {
            max_session_count: 0,
            ..SessionSection::default()
        };
        assert!(matches!(
            session.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(SessionSection::default().validate().is_ok());
    }
}
