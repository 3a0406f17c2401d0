//! Session registry counters.

use agai_session::SessionStats;
use axum::{Json, Router, extract::State, routing::get};

use crate::state::AppState;

/// Current registry counters, including dropped LRU updates.
pub async fn stats_handler(State(state): State<AppState>) -> Json<SessionStats> {
    Json(state.sessions.stats())
}

pub fn stats_routes() -> Router<AppState> {
    Router::new().route("/stats", get(stats_handler))
}
