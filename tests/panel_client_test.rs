//! Hiddify REST client against a mock panel

use std::net::TcpListener;
use assert_matches::assert_matches;
use hiddify_bot::config::PanelConfig;
use hiddify_bot::services::panel::{AccountSpec, HiddifyPanel, VpnPanel};
use hiddify_bot::utils::errors::PanelError;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "panel-secret";

fn panel_for(server: &MockServer) -> HiddifyPanel {
    panel_at(&server.uri())
}

fn panel_at(base_url: &str) -> HiddifyPanel {
    HiddifyPanel::new(&PanelConfig {
        api_url: format!("{}/api/", base_url),
        api_token: TOKEN.to_string(),
        timeout_seconds: 5,
        max_retries: 1,
        retry_base_delay_ms: 1,
        protocols: vec!["vless_reality".to_string()],
    })
    .unwrap()
}

fn spec(enabled: bool) -> AccountSpec {
    AccountSpec {
        username: "tg_100".to_string(),
        data_limit: 53_687_091_200,
        expire_days: 30,
        enabled,
    }
}

#[tokio::test]
async fn test_create_account_posts_spec() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/users"))
        .and(header("authorization", format!("Bearer {}", TOKEN).as_str()))
        .and(body_partial_json(json!({
            "username": "tg_100",
            "data_limit": 53_687_091_200u64,
            "expire_days": 30,
            "protocols": ["vless_reality"]
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "uuid": "3f1c",
            "subscription_link": "https://panel/3f1c"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let account = panel_for(&server).create_account(&spec(true)).await.unwrap();
    assert_eq!(account.uuid, "3f1c");
    assert_eq!(account.subscription_link.as_deref(), Some("https://panel/3f1c"));
}

#[tokio::test]
async fn test_update_account_sends_enable_flag() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/users/3f1c"))
        .and(body_partial_json(json!({ "enable": false, "expire_days": 30 })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    panel_for(&server).update_account("3f1c", &spec(false)).await.unwrap();
}

#[tokio::test]
async fn test_delete_missing_account_is_ok() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/users/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    panel_for(&server).delete_account("gone").await.unwrap();
}

#[tokio::test]
async fn test_usage_accepts_used_traffic_alias() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/users/3f1c"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "used_traffic": 1_048_576u64,
            "data_limit": 53_687_091_200u64
        })))
        .mount(&server)
        .await;

    let usage = panel_for(&server).get_account_usage("3f1c").await.unwrap();
    assert_eq!(usage.used_bytes, 1_048_576);
    assert_eq!(usage.data_limit, Some(53_687_091_200));
}

#[tokio::test]
async fn test_error_statuses_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/users/denied"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/users/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database is locked"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/users/garbled"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;
    let panel = panel_for(&server);

    let denied = panel.update_account("denied", &spec(true)).await.unwrap_err();
    assert_matches!(denied, PanelError::Unauthorized);
    assert!(!denied.is_transient());

    let broken = panel.update_account("broken", &spec(true)).await.unwrap_err();
    assert_matches!(&broken, PanelError::Api { status: 500, message } if message == "database is locked");
    assert!(broken.is_transient());

    assert_matches!(panel.get_account_usage("garbled").await, Err(PanelError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_unreachable_panel_is_transient() {
    // a port nothing listens on once the listener is gone
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let panel = panel_at(&format!("http://127.0.0.1:{}", port));

    let error = panel.delete_account("3f1c").await.unwrap_err();
    assert_matches!(error, PanelError::Connection(_) | PanelError::Timeout);
    assert!(error.is_transient());
}
