//! Application state shared across handlers.

use std::sync::Arc;

use agai_session::SessionManager;

use crate::config::ServerConfig;

/// Application state shared across all handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// The session registry.
    pub sessions: SessionManager,

    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(sessions: SessionManager, config: ServerConfig) -> Self {
        Self {
            sessions,
            config: Arc::new(config),
        }
    }
}
