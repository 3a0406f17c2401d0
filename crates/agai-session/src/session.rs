//! The session entity and session ID generation.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::TryRngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{NEW_SESSION_TTL, SESSION_TTL};
use crate::error::{Error, Result};

/// Number of random bytes in a session ID (128 bits).
const SESSION_ID_BYTES: usize = 16;

/// Key under which the user identity is kept in the session store.
pub const UID_KEY: &str = "uid";

/// Identity stored for sessions that have not logged in.
pub const GUEST_UID: &str = "Guest";

/// Generate a new random session ID.
///
/// The ID is 128 bits from the OS entropy source, hex encoded. Failure of
/// the entropy source is reported rather than falling back to a weaker
/// generator.
pub fn generate_session_id() -> Result<String> {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::IdGeneration(e.to_string()))?;
    Ok(hex::encode(bytes))
}

/// Compute `now + ttl`, saturating on absurdly large durations.
pub(crate) fn deadline_after(ttl: Duration) -> DateTime<Utc> {
    let delta = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
    Utc::now()
        .checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Server-side state for one client.
///
/// The registry owns `Session` values; callers work on clones and hand
/// them back with [`SessionManager::store`](crate::SessionManager::store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque random identifier, also used as the cookie value.
    pub id: String,

    /// Sticky key-value data that lives as long as the session.
    pub store: HashMap<String, Value>,

    /// Query parameters of the current request.
    #[serde(skip)]
    pub get: HashMap<String, String>,

    /// Form parameters of the current request.
    #[serde(skip)]
    pub post: HashMap<String, String>,

    /// Set by [`Session::login`], cleared by [`Session::logout`].
    pub logged_in: bool,

    /// Absolute time after which the expiry scheduler removes the session.
    pub expiry: DateTime<Utc>,

    /// Last time the session was touched.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a guest session with a fresh random ID and a short expiry.
    pub fn new() -> Result<Self> {
        Ok(Self::with_id(generate_session_id()?))
    }

    /// Create a guest session with the given ID and a short expiry.
    pub fn with_id(id: impl Into<String>) -> Self {
        let mut store = HashMap::new();
        store.insert(UID_KEY.to_string(), Value::from(GUEST_UID));

        Self {
            id: id.into(),
            store,
            get: HashMap::new(),
            post: HashMap::new(),
            logged_in: false,
            expiry: deadline_after(NEW_SESSION_TTL),
            updated_at: Utc::now(),
        }
    }

    /// Set an explicit expiry.
    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = expiry;
        self
    }

    /// Push the expiry to `now + ttl`.
    pub fn refresh_expiry(&mut self, ttl: Duration) {
        self.expiry = deadline_after(ttl);
    }

    /// Extend the session to the cookie lifetime. Called whenever a cookie
    /// carrying this session's ID is issued.
    pub fn issue(&mut self) {
        self.refresh_expiry(SESSION_TTL);
        self.touch();
    }

    /// Refresh the bookkeeping timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Mark the session as authenticated and extend its lifetime.
    pub fn login(&mut self) {
        self.logged_in = true;
        self.issue();
    }

    /// Clear the authentication flag.
    pub fn logout(&mut self) {
        self.logged_in = false;
        self.touch();
    }

    /// Whether [`Session::login`] has been called since the last logout.
    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    /// Write a value into the sticky store.
    pub fn store_data(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.store.insert(key.into(), value.into());
    }

    /// Read a value from the sticky store.
    pub fn get_stored_data(&self, key: &str) -> Option<&Value> {
        self.store.get(key)
    }

    /// Whether the expiry has passed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }

    /// Rebuild the GET and POST maps from the current request.
    ///
    /// Both maps are cleared first. A key that appears once maps to its
    /// value; a key that appears several times maps to a JSON array of all
    /// its values in order.
    pub fn parse_request<Q, F, K, V>(&mut self, query: Q, form: F)
    where
        Q: IntoIterator<Item = (K, V)>,
        F: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.get = collect_params(query);
        self.post = collect_params(form);
    }
}

fn collect_params<I, K, V>(pairs: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for (key, value) in pairs {
        grouped.entry(key.into()).or_default().push(value.into());
    }

    grouped
        .into_iter()
        .map(|(key, mut values)| {
            let value = if values.len() == 1 {
                values.pop().unwrap_or_default()
            } else {
                serde_json::to_string(&values).unwrap_or_else(|_| values.join(","))
            };
            (key, value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_hex_and_distinct() {
        let a = generate_session_id().unwrap();
        let b = generate_session_id().unwrap();

        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_new_session_defaults() {
        let session = Session::new().unwrap();

        assert!(!session.is_logged_in());
        assert_eq!(session.get_stored_data(UID_KEY), Some(&Value::from("Guest")));

        let remaining = session.expiry - Utc::now();
        assert!(remaining <= TimeDelta::seconds(30));
        assert!(remaining > TimeDelta::seconds(25));
    }

    #[test]
    fn test_login_extends_expiry() {
        let mut session = Session::with_id("abc");
        session.login();

        assert!(session.is_logged_in());
        let remaining = session.expiry - Utc::now();
        assert!(remaining > TimeDelta::minutes(29));
    }

    #[test]
    fn test_logout_clears_flag_but_keeps_store() {
        let mut session = Session::with_id("abc");
        session.login();
        session.store_data("cart", 3);
        session.logout();

        assert!(!session.is_logged_in());
        assert_eq!(session.get_stored_data("cart"), Some(&Value::from(3)));
    }

    #[test]
    fn test_parse_request_single_and_multi_values() {
        let mut session = Session::with_id("abc");
        session.parse_request(
            vec![("q", "rust"), ("tag", "a"), ("tag", "b")],
            vec![("name", "alice")],
        );

        assert_eq!(session.get.get("q").map(String::as_str), Some("rust"));
        assert_eq!(
            session.get.get("tag").map(String::as_str),
            Some(r#"["a","b"]"#)
        );
        assert_eq!(session.post.get("name").map(String::as_str), Some("alice"));
    }

    #[test]
    fn test_parse_request_resets_params_not_store() {
        let mut session = Session::with_id("abc");
        session.store_data("theme", "dark");
        session.parse_request(vec![("page", "1")], Vec::<(&str, &str)>::new());
        session.parse_request(Vec::<(&str, &str)>::new(), Vec::<(&str, &str)>::new());

        assert!(session.get.is_empty());
        assert!(session.post.is_empty());
        assert_eq!(session.get_stored_data("theme"), Some(&Value::from("dark")));
    }

    #[test]
    fn test_params_not_serialized() {
        let mut session = Session::with_id("abc");
        session.parse_request(vec![("q", "x")], vec![("p", "y")]);

        let json = serde_json::to_string(&session).unwrap();
        let restored: Session = serde_json::from_str(&json).unwrap();

        assert!(restored.get.is_empty());
        assert!(restored.post.is_empty());
        assert_eq!(restored.id, "abc");
        assert_eq!(restored.expiry, session.expiry);
    }
}
