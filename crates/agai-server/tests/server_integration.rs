//! Server integration tests.
//!
//! These tests drive the session flow over real HTTP with a cookie-keeping
//! client.

mod common;

use anyhow::Result;
use serde_json::{Value, json};

#[tokio::test]
async fn test_server_starts_and_responds_to_health() -> Result<()> {
    let server = common::TestServer::start().await?;

    let resp = server.get("/health").send().await?;
    assert!(resp.status().is_success());

    let body: Value = resp.json().await?;
    assert_eq!(body["status"], "ok");
    assert!(body.get("version").is_some());
    Ok(())
}

#[tokio::test]
async fn test_cookie_keeps_the_same_session() -> Result<()> {
    let server = common::TestServer::start().await?;

    let first: Value = server.get("/session").send().await?.json().await?;
    let second: Value = server.get("/session").send().await?.json().await?;

    assert_eq!(first["id"], second["id"]);
    assert_eq!(server.sessions.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_store_and_read_session_data() -> Result<()> {
    let server = common::TestServer::start().await?;

    let resp = server
        .post("/session/data")
        .json(&json!({ "key": "cart", "value": [1, 2, 3] }))
        .send()
        .await?;
    assert!(resp.status().is_success());

    let value: Value = server.get("/session/data/cart").send().await?.json().await?;
    assert_eq!(value, json!([1, 2, 3]));

    let missing = server.get("/session/data/nothing").send().await?;
    assert_eq!(missing.status().as_u16(), 404);
    let body: Value = missing.json().await?;
    assert_eq!(body["code"], "not_found");
    Ok(())
}

#[tokio::test]
async fn test_login_then_logout() -> Result<()> {
    let server = common::TestServer::start().await?;

    let login = server.post("/login").form(&[("uid", "alice")]).send().await?;
    assert!(common::session_set_cookie(&login).is_some());
    let view: Value = login.json().await?;
    assert_eq!(view["logged_in"], true);
    assert_eq!(view["uid"], "alice");
    let id = view["id"].as_str().unwrap_or_default().to_string();

    let again: Value = server.get("/session").send().await?.json().await?;
    assert_eq!(again["id"], id.as_str());
    assert_eq!(again["logged_in"], true);

    let logout = server.post("/logout").send().await?;
    let cookie = common::session_set_cookie(&logout).unwrap_or_default();
    assert!(cookie.starts_with("sessionid=expire"));
    assert!(cookie.contains("Max-Age=0"));
    assert_eq!(
        logout.headers()["cache-control"],
        "no-store, no-cache, must-revalidate, max-age=0"
    );
    assert!(!server.sessions.contains(&id));

    let fresh: Value = server.get("/session").send().await?.json().await?;
    assert_ne!(fresh["id"], id.as_str());
    assert_eq!(fresh["logged_in"], false);
    Ok(())
}

#[tokio::test]
async fn test_expire_cookie_starts_over() -> Result<()> {
    let server = common::TestServer::start().await?;
    let client = server.bare_client();
    let url = format!("{}/session", server.base_url());

    let first = client.get(&url).send().await?;
    let first: Value = first.json().await?;

    let resp = client
        .get(&url)
        .header("Cookie", "sessionid=expire")
        .send()
        .await?;
    let cookie = common::session_set_cookie(&resp).unwrap_or_default();
    let second: Value = resp.json().await?;

    assert_ne!(second["id"], first["id"]);
    assert_ne!(second["id"], "expire");
    assert!(cookie.starts_with(&format!("sessionid={}", second["id"].as_str().unwrap_or(""))));
    Ok(())
}

#[tokio::test]
async fn test_unknown_cookie_gets_new_session() -> Result<()> {
    let server = common::TestServer::start().await?;
    let resp = server
        .bare_client()
        .get(format!("{}/session", server.base_url()))
        .header("Cookie", "sessionid=deadbeef")
        .send()
        .await?;

    assert!(common::session_set_cookie(&resp).is_some());
    let body: Value = resp.json().await?;
    assert_ne!(body["id"], "deadbeef");
    Ok(())
}

#[tokio::test]
async fn test_stats_reports_registry() -> Result<()> {
    let server = common::TestServer::start().await?;
    server.get("/session").send().await?;

    let stats: Value = server.get("/stats").send().await?.json().await?;
    assert_eq!(stats["sessions"], 1);
    assert_eq!(stats["max_sessions"], 1000);
    assert_eq!(stats["store_type"], "memory");
    Ok(())
}
