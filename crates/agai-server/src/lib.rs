//! HTTP server for agai.
//!
//! This crate puts the session registry on the wire:
//!
//! - Session middleware resolving the `sessionid` cookie per request
//! - Session endpoints (`/session`, `/login`, `/logout`, `/session/data`)
//! - Health and registry stats endpoints
//! - Request logging
//!
//! # Example
//!
//! ```ignore
//! use agai_server::{Server, ServerConfig};
//! use agai_session::{SessionConfig, SessionManager};
//!
//! let sessions = SessionManager::start(SessionConfig::default()).await;
//! let config = ServerConfig::new().with_bind_address("127.0.0.1:8080".parse()?);
//!
//! Server::new(sessions, config).run().await?;
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod routes;
pub mod session;
pub mod state;

pub use config::ServerConfig;
pub use error::{ErrorResponse, Result, ServerError};
pub use logging::request_logging_middleware;
pub use session::{RequestSession, SESSION_COOKIE, session_middleware};
pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;

use agai_session::SessionManager;
use axum::{Router, http::Uri, middleware};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// The agai HTTP server.
pub struct Server {
    /// Application state.
    state: AppState,
}

impl Server {
    /// Create a new server around a session manager.
    pub fn new(sessions: SessionManager, config: ServerConfig) -> Self {
        Self {
            state: AppState::new(sessions, config),
        }
    }

    /// Create a server from a pre-built application state.
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        Router::new()
            .merge(routes::health_routes())
            .merge(routes::stats_routes())
            .merge(routes::session_routes(self.state.clone()))
            .fallback(not_found)
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                logging::request_logging_middleware,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Run the server on the configured address until the process ends.
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.bind_address;
        self.run_until(addr, std::future::pending()).await
    }

    /// Run the server on a specific address (useful for testing).
    pub async fn run_on(self, addr: SocketAddr) -> Result<()> {
        self.run_until(addr, std::future::pending()).await
    }

    /// Run until `shutdown` resolves, then stop accepting connections and
    /// let in-flight requests finish.
    pub async fn run_until<F>(self, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to bind {addr}: {e}")))?;
        let local = listener.local_addr().unwrap_or(addr);
        info!(address = %local, "Server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Internal(format!("Server error: {e}")))?;

        info!("Server stopped");
        Ok(())
    }

    /// Get the configured bind address.
    pub fn bind_address(&self) -> SocketAddr {
        self.state.config.bind_address
    }

    /// The session manager behind this server.
    pub fn sessions(&self) -> &SessionManager {
        &self.state.sessions
    }
}

async fn not_found(uri: Uri) -> ServerError {
    ServerError::NotFound(format!("no route for {}", uri.path()))
}
