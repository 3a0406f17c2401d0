//! Session middleware and the request-scoped session handle.
//!
//! The middleware resolves the `sessionid` cookie through the
//! [`SessionManager`](agai_session::SessionManager), parses the query string
//! and any urlencoded form body into the session, and exposes it to handlers
//! as a [`RequestSession`]. After the handler returns, a modified session is
//! written back, a logged-out session is removed, and `Set-Cookie` is emitted
//! when the cookie changed.

use std::sync::Arc;

use agai_session::{EXPIRE_SENTINEL, Session};
use axum::{
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, HeaderValue, Method, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use http_body_util::LengthLimitError;
use parking_lot::Mutex;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;

use crate::error::{Result, ServerError};
use crate::state::AppState;

/// Name of the cookie carrying the session ID.
pub const SESSION_COOKIE: &str = "sessionid";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug)]
struct Slot {
    session: Session,
    dirty: bool,
    ended: bool,
    /// Created by this request rather than resolved from the cookie.
    issued: bool,
    issue_cookie: bool,
}

/// The current request's session.
///
/// Handlers work on a copy of the registry entry; the middleware stores it
/// back once the handler is done. Clones share the same copy, and the
/// handle is dropped with the request.
#[derive(Debug, Clone)]
pub struct RequestSession {
    slot: Arc<Mutex<Slot>>,
}

impl RequestSession {
    fn new(session: Session, issue_cookie: bool) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                session,
                dirty: false,
                ended: false,
                issued: issue_cookie,
                issue_cookie,
            })),
        }
    }

    /// The session ID.
    pub fn id(&self) -> String {
        self.slot.lock().session.id.clone()
    }

    /// Mark the session as authenticated. Extends its expiry and re-issues
    /// the cookie.
    pub fn login(&self) {
        let mut slot = self.slot.lock();
        slot.session.login();
        slot.dirty = true;
        slot.issue_cookie = true;
    }

    /// End the session: it is removed from the registry and the client's
    /// cookie is replaced with the `expire` sentinel.
    pub fn logout(&self) {
        let mut slot = self.slot.lock();
        slot.session.logout();
        slot.ended = true;
    }

    /// Whether the session has logged in.
    pub fn is_logged_in(&self) -> bool {
        self.slot.lock().session.is_logged_in()
    }

    /// Write a value into the session store.
    pub fn store_data(&self, key: impl Into<String>, value: impl Into<Value>) {
        let mut slot = self.slot.lock();
        slot.session.store_data(key, value);
        slot.dirty = true;
    }

    /// Read a value from the session store.
    pub fn get_stored_data(&self, key: &str) -> Option<Value> {
        self.slot.lock().session.get_stored_data(key).cloned()
    }

    /// A query string parameter of this request.
    pub fn query_param(&self, key: &str) -> Option<String> {
        self.slot.lock().session.get.get(key).cloned()
    }

    /// A form parameter of this request.
    pub fn form_param(&self, key: &str) -> Option<String> {
        self.slot.lock().session.post.get(key).cloned()
    }

    /// Copy of the session as it stands now.
    pub fn snapshot(&self) -> Session {
        self.slot.lock().session.clone()
    }
}

impl<S> FromRequestParts<S> for RequestSession
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestSession>()
            .cloned()
            .ok_or_else(|| ServerError::Internal("session middleware not installed".to_string()))
    }
}

/// Session middleware. See the module docs.
pub async fn session_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    match run_with_session(&state, &jar, request, next).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn run_with_session(
    state: &AppState,
    jar: &CookieJar,
    request: Request,
    next: Next,
) -> Result<Response> {
    let cookie = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());
    let started = state.sessions.start_session(cookie.as_deref())?;

    let (mut parts, body) = request.into_parts();
    let query = parts
        .uri
        .query()
        .map(|q| parse_pairs(q.as_bytes()))
        .unwrap_or_default();

    let (form, body) = if is_form_post(&parts) {
        let limit = state.config.max_body_size;
        let bytes = axum::body::to_bytes(body, limit)
            .await
            .map_err(|e| body_read_error(e, limit))?;
        (parse_pairs(&bytes), Body::from(bytes))
    } else {
        (Vec::new(), body)
    };

    let mut session = started.session;
    session.parse_request(query, form);
    let handle = RequestSession::new(session, started.issued);
    parts.extensions.insert(handle.clone());

    let mut response = next.run(Request::from_parts(parts, body)).await;
    finish(state, &handle, response.headers_mut())?;
    Ok(response)
}

/// Write the session back (or remove it) and emit cookie headers.
fn finish(state: &AppState, handle: &RequestSession, headers: &mut HeaderMap) -> Result<()> {
    let https = state.config.https;
    let slot = handle.slot.lock();
    let id = slot.session.id.as_str();

    if slot.ended {
        state.sessions.remove(id);
        debug!(session_id = %id, "Session ended");

        append_cookie(headers, expired_cookie(https))?;
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate, max-age=0"),
        );
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
        return Ok(());
    }

    if slot.dirty {
        if slot.issued {
            state.sessions.store(id, slot.session.clone());
        } else if !state.sessions.update(id, slot.session.clone()) {
            // Removed while the handler ran. The client's cookie now
            // resolves to a fresh session on its next request.
            debug!(session_id = %id, "Session gone before write-back, dropping changes");
            return Ok(());
        }
    }
    if slot.issue_cookie {
        append_cookie(headers, session_cookie(&slot.session, https))?;
    }
    Ok(())
}

/// Tell an over-limit body apart from one that failed to arrive.
fn body_read_error(err: axum::Error, limit: usize) -> ServerError {
    let inner = err.into_inner();
    if inner.downcast_ref::<LengthLimitError>().is_some() {
        ServerError::PayloadTooLarge(format!("form body over {limit} bytes"))
    } else {
        ServerError::BadRequest(format!("failed to read form body: {inner}"))
    }
}

fn is_form_post(parts: &Parts) -> bool {
    parts.method == Method::POST
        && parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with(FORM_CONTENT_TYPE))
}

fn parse_pairs(input: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(input).into_owned().collect()
}

/// Cookie carrying the session ID, expiring with the session.
fn session_cookie(session: &Session, https: bool) -> Cookie<'static> {
    let expires = OffsetDateTime::from_unix_timestamp(session.expiry.timestamp())
        .unwrap_or_else(|_| OffsetDateTime::now_utc());

    Cookie::build((SESSION_COOKIE, session.id.clone()))
        .path("/")
        .http_only(https)
        .secure(https)
        .expires(expires)
        .build()
}

/// Cookie telling the client to drop its session.
fn expired_cookie(https: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, EXPIRE_SENTINEL))
        .path("/")
        .http_only(https)
        .secure(https)
        .max_age(time::Duration::ZERO)
        .build()
}

fn append_cookie(headers: &mut HeaderMap, cookie: Cookie<'static>) -> Result<()> {
    let value = HeaderValue::from_str(&cookie.to_string())
        .map_err(|e| ServerError::Internal(format!("invalid cookie header: {e}")))?;
    headers.append(header::SET_COOKIE, value);
    Ok(())
}
