#![allow(clippy::unwrap_used, clippy::expect_used)]

use atelier_adapters::AdapterRouter;
use atelier_config::{
    parse_connector_allowlist, parse_connector_policies, parse_connector_profiles,
    parse_connector_secrets,
};
use atelier_gateway::{GatewayServer, IngestPipeline, IngestSettings, MemoryCounterStore};
use atelier_security::{canonical_json, compute_signature, parse_global_secret_list, TelemetryCapture, TelemetryLog};
use atelier_session::{derive_session_id, NullStore, SessionStore};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Helper: start a gateway on a random port with the given settings.
async fn start_server(
    settings: IngestSettings,
) -> (String, Arc<SessionStore>, TelemetryCapture) {
    let (telemetry, capture) = TelemetryLog::in_memory();
    let telemetry = Arc::new(telemetry);
    let store = Arc::new(SessionStore::new(Arc::new(NullStore)));
    let router = Arc::new(AdapterRouter::new(store.clone(), telemetry.clone()));
    let pipeline = IngestPipeline::new(
        settings,
        router,
        Arc::new(MemoryCounterStore::new()),
        telemetry,
    );
    let app = GatewayServer::build(pipeline);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Small yield to let the server task start
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    (addr, store, capture)
}

fn global_settings() -> IngestSettings {
    IngestSettings {
        global_secrets: parse_global_secret_list(Some("global-secret"), None),
        ..IngestSettings::default()
    }
}

/// POST a signed ingest request.
async fn post_signed(addr: &str, body: &Value, secret: &str) -> reqwest::Response {
    let timestamp = chrono::Utc::now().timestamp();
    let signature = compute_signature(secret, timestamp, &canonical_json(body));
    reqwest::Client::new()
        .post(format!("http://{addr}/agent-gateway/adapters/ingest"))
        .header("x-gateway-signature", format!("v1={signature}"))
        .header("x-gateway-timestamp", timestamp.to_string())
        .json(body)
        .send()
        .await
        .unwrap()
}

fn telegram_body(event_id: &str) -> Value {
    json!({
        "connectorId": "telegram-main",
        "payload": {"message": {"chat": {"id": -100123456_i64}}},
        "eventId": event_id,
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let (addr, _store, _capture) = start_server(global_settings()).await;
    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "atelier");
}

#[tokio::test]
async fn test_telegram_end_to_end() {
    // The full connector configuration path: secrets, policy, and profile
    // all parsed from their operator-facing JSON shapes.
    let settings = IngestSettings {
        connector_secrets: parse_connector_secrets(r#"{"telegram-main": "tg-secret"}"#).unwrap(),
        connector_policies: parse_connector_policies(
            r#"{"telegram-main": {"riskLevel": "trusted", "rateLimitMax": 25}}"#,
        )
        .unwrap(),
        connector_profiles: parse_connector_profiles(
            r#"{"telegram-main": {"adapter": "external_webhook", "channel": "telegram", "fromRole": "observer", "toRole": "author", "type": "observer_message"}}"#,
        )
        .unwrap(),
        global_secrets: parse_global_secret_list(Some("global-secret"), None),
        ..IngestSettings::default()
    };
    let (addr, store, capture) = start_server(settings).await;

    let resp = post_signed(&addr, &telegram_body("evt-1"), "tg-secret").await;
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["applied"], true);
    assert_eq!(body["deduplicated"], false);
    assert_eq!(body["adapter"], "external_webhook");
    assert_eq!(body["channel"], "telegram");
    assert_eq!(body["connectorId"], "telegram-main");
    assert_eq!(body["event"]["fromRole"], "observer");
    assert_eq!(body["event"]["toRole"], "author");
    assert_eq!(body["event"]["type"], "observer_message");

    // The session identity is the deterministic hash of the derived
    // external id, so any retry lands on the same session.
    let expected_session = derive_session_id("telegram", "telegram_chat:-100123456");
    assert_eq!(body["sessionId"], expected_session.as_str());

    let session = store.get_session(&expected_session).unwrap();
    assert_eq!(
        session.external_session_id.as_deref(),
        Some("telegram_chat:-100123456")
    );
    assert_eq!(session.metadata["riskLevel"], "trusted");
    assert_eq!(session.metadata["signature"]["source"], "connector");

    assert!(capture.kinds().contains(&"ingest_accepted".to_string()));
}

#[tokio::test]
async fn test_replay_is_deduplicated() {
    let (addr, store, capture) = start_server(global_settings()).await;
    let body = json!({
        "channel": "telegram",
        "fromRole": "observer",
        "type": "observer_message",
        "payload": {"message": {"chat": {"id": -7}}},
        "eventId": "evt-dup",
    });

    let first = post_signed(&addr, &body, "global-secret").await;
    assert_eq!(first.status(), 201);
    let first: Value = first.json().await.unwrap();
    let session_id = first["sessionId"].as_str().unwrap().to_string();

    let second = post_signed(&addr, &body, "global-secret").await;
    assert_eq!(second.status(), 200);
    let second: Value = second.json().await.unwrap();
    assert_eq!(second["applied"], false);
    assert_eq!(second["deduplicated"], true);
    assert_eq!(second["eventId"], "evt-dup");

    // No second event was created.
    assert_eq!(store.events(&session_id).len(), 1);
    assert!(capture.kinds().contains(&"ingest_replayed".to_string()));
}

#[tokio::test]
async fn test_secret_rotation_overlap() {
    let settings = IngestSettings {
        connector_secrets: parse_connector_secrets(
            r#"{"telegram-main": ["old-secret", "new-secret"]}"#,
        )
        .unwrap(),
        ..global_settings()
    };
    let (addr, _store, _capture) = start_server(settings).await;

    let resp = post_signed(&addr, &telegram_body("evt-old"), "old-secret").await;
    assert_eq!(resp.status(), 201);

    let resp = post_signed(&addr, &telegram_body("evt-new"), "new-secret").await;
    assert_eq!(resp.status(), 201);

    let resp = post_signed(&addr, &telegram_body("evt-bad"), "neither-secret").await;
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "SIGNATURE_INVALID");
}

#[tokio::test]
async fn test_connector_secret_required_rejects_global_signature() {
    let settings = IngestSettings {
        connector_policies: parse_connector_policies(
            r#"{"telegram-main": {"requireConnectorSecret": true}}"#,
        )
        .unwrap(),
        ..global_settings()
    };
    let (addr, _store, _capture) = start_server(settings).await;

    // The global secret would verify, but the policy demands a
    // connector-scoped secret that was never configured.
    let resp = post_signed(&addr, &telegram_body("evt-1"), "global-secret").await;
    assert_eq!(resp.status(), 403);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "CONNECTOR_SECRET_REQUIRED");
}

#[tokio::test]
async fn test_rate_limit_rejects_third_request_in_window() {
    let settings = IngestSettings {
        connector_policies: parse_connector_policies(r#"{"telegram-main": {"rateLimitMax": 2}}"#)
            .unwrap(),
        ..global_settings()
    };
    let (addr, _store, _capture) = start_server(settings).await;

    for i in 0..2 {
        let resp = post_signed(&addr, &telegram_body(&format!("evt-{i}")), "global-secret").await;
        assert_eq!(resp.status(), 201);
    }

    let resp = post_signed(&addr, &telegram_body("evt-3"), "global-secret").await;
    assert_eq!(resp.status(), 429);
    let retry_after: u64 = resp
        .headers()
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 1 && retry_after <= 60);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "RATE_LIMITED");
}

#[tokio::test]
async fn test_unknown_fields_rejected() {
    let (addr, _store, _capture) = start_server(global_settings()).await;

    let body = json!({
        "channel": "telegram",
        "fromRole": "observer",
        "type": "observer_message",
        "eventId": "evt-1",
        "surprise": true,
    });
    let resp = post_signed(&addr, &body, "global-secret").await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "INVALID_FIELDS");
}

#[tokio::test]
async fn test_query_parameters_rejected() {
    let (addr, _store, _capture) = start_server(global_settings()).await;
    let body = telegram_body("evt-1");
    let timestamp = chrono::Utc::now().timestamp();
    let signature = compute_signature("global-secret", timestamp, &canonical_json(&body));

    let resp = reqwest::Client::new()
        .post(format!(
            "http://{addr}/agent-gateway/adapters/ingest?debug=1"
        ))
        .header("x-gateway-signature", format!("v1={signature}"))
        .header("x-gateway-timestamp", timestamp.to_string())
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "INVALID_QUERY_FIELDS");
}

#[tokio::test]
async fn test_allowlist_forbids_unlisted_connector() {
    let settings = IngestSettings {
        connector_allowlist: parse_connector_allowlist(Some("slack-bot, discord-hook")),
        ..global_settings()
    };
    let (addr, _store, _capture) = start_server(settings).await;

    let resp = post_signed(&addr, &telegram_body("evt-1"), "global-secret").await;
    assert_eq!(resp.status(), 403);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "CONNECTOR_FORBIDDEN");
}

#[tokio::test]
async fn test_idempotency_key_header_fallback() {
    let (addr, _store, _capture) = start_server(global_settings()).await;
    let body = json!({
        "channel": "telegram",
        "fromRole": "observer",
        "type": "observer_message",
        "payload": {"message": {"chat": {"id": -9}}},
    });
    let timestamp = chrono::Utc::now().timestamp();
    let signature = compute_signature("global-secret", timestamp, &canonical_json(&body));

    let send = || async {
        reqwest::Client::new()
            .post(format!("http://{addr}/agent-gateway/adapters/ingest"))
            .header("x-gateway-signature", format!("v1={signature}"))
            .header("x-gateway-timestamp", timestamp.to_string())
            .header("x-idempotency-key", "hdr-evt-1")
            .json(&body)
            .send()
            .await
            .unwrap()
    };

    let first = send().await;
    assert_eq!(first.status(), 201);
    let first: Value = first.json().await.unwrap();
    assert_eq!(first["eventId"], "hdr-evt-1");

    let second = send().await;
    assert_eq!(second.status(), 200);
    let second: Value = second.json().await.unwrap();
    assert_eq!(second["deduplicated"], true);
}

#[tokio::test]
async fn test_missing_event_id_rejected() {
    let (addr, _store, _capture) = start_server(global_settings()).await;
    let body = json!({
        "channel": "telegram",
        "fromRole": "observer",
        "type": "observer_message",
        "payload": {"message": {"chat": {"id": -9}}},
    });
    let resp = post_signed(&addr, &body, "global-secret").await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "EVENT_ID_REQUIRED");
}

#[tokio::test]
async fn test_keyed_rotation_pins_secret() {
    let settings = IngestSettings {
        connector_secrets: parse_connector_secrets(
            r#"{"telegram-main": {"k1": "first-secret", "k2": "second-secret"}}"#,
        )
        .unwrap(),
        ..global_settings()
    };
    let (addr, _store, _capture) = start_server(settings).await;

    let body = telegram_body("evt-keyed");
    let timestamp = chrono::Utc::now().timestamp();
    let signature = compute_signature("second-secret", timestamp, &canonical_json(&body));

    // Pinned to k2: only the second secret verifies.
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/agent-gateway/adapters/ingest"))
        .header("x-gateway-signature", format!("v1={signature}"))
        .header("x-gateway-timestamp", timestamp.to_string())
        .header("x-gateway-key-id", "k2")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    // Pinned to an unknown key id: no candidates remain.
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/agent-gateway/adapters/ingest"))
        .header("x-gateway-signature", format!("v1={signature}"))
        .header("x-gateway-timestamp", timestamp.to_string())
        .header("x-gateway-key-id", "k9")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "SIGNATURE_KEY_UNKNOWN");
}
