//! Session endpoints.
//!
//! Every route here runs behind the session middleware, so a client without
//! a valid cookie gets a new session on its first request.

use std::collections::HashMap;

use agai_session::{Session, UID_KEY};
use axum::{
    Json, Router,
    extract::Path,
    middleware,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ServerError};
use crate::session::{RequestSession, session_middleware};
use crate::state::AppState;

/// What a client can see of its session.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionView {
    pub id: String,
    pub logged_in: bool,
    pub uid: Option<Value>,
    pub expiry: DateTime<Utc>,
    pub store: HashMap<String, Value>,
    /// Query parameters of this request.
    pub query: HashMap<String, String>,
    /// Form parameters of this request.
    pub form: HashMap<String, String>,
}

impl From<Session> for SessionView {
    fn from(session: Session) -> Self {
        Self {
            uid: session.get_stored_data(UID_KEY).cloned(),
            id: session.id,
            logged_in: session.logged_in,
            expiry: session.expiry,
            store: session.store,
            query: session.get,
            form: session.post,
        }
    }
}

/// Body of `POST /session/data`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoreDataRequest {
    pub key: String,
    pub value: Value,
}

/// Plain status reply.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

/// `GET /session`
pub async fn session_handler(session: RequestSession) -> Json<SessionView> {
    Json(session.snapshot().into())
}

/// `POST /login`
pub async fn login_handler(session: RequestSession) -> Json<SessionView> {
    let uid = session
        .form_param("uid")
        .or_else(|| session.query_param("uid"))
        .filter(|uid| !uid.is_empty());
    if let Some(uid) = uid {
        session.store_data(UID_KEY, uid);
    }
    session.login();
    Json(session.snapshot().into())
}

/// `POST /logout`
pub async fn logout_handler(session: RequestSession) -> Json<StatusResponse> {
    session.logout();
    Json(StatusResponse {
        status: "logged_out".to_string(),
    })
}

/// `POST /session/data`
pub async fn store_data_handler(
    session: RequestSession,
    Json(req): Json<StoreDataRequest>,
) -> Result<Json<SessionView>> {
    if req.key.is_empty() {
        return Err(ServerError::BadRequest("key must not be empty".to_string()));
    }
    session.store_data(req.key, req.value);
    Ok(Json(session.snapshot().into()))
}

/// `GET /session/data/{key}`
pub async fn get_data_handler(
    session: RequestSession,
    Path(key): Path<String>,
) -> Result<Json<Value>> {
    session
        .get_stored_data(&key)
        .map(Json)
        .ok_or_else(|| ServerError::NotFound(format!("no session data under '{key}'")))
}

/// Session routes with the session middleware applied.
pub fn session_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/session", get(session_handler))
        .route("/session/data", post(store_data_handler))
        .route("/session/data/{key}", get(get_data_handler))
        .route("/login", post(login_handler))
        .route("/logout", post(logout_handler))
        .route_layer(middleware::from_fn_with_state(state, session_middleware))
}
