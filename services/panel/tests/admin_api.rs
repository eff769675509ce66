//! Integration tests for the admin HTTP surface and the dashboard stream.
mod common;

use common::{change_port, report_result, seed_node, start_panel, TENANT, TOKEN};
use panel::model::{ChangeType, ConfigVersion, NodeStatus};
use panel_protocol::{ConnectionInfo, WsMessage};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

fn reality_candidate(private_key: Option<&str>) -> Value {
    let mut reality = json!({
        "dest": "www.example.com:443",
        "serverNames": ["www.example.com"],
        "shortIds": ["0123abcd"]
    });
    if let Some(key) = private_key {
        reality["privateKey"] = json!(key);
    }
    json!({
        "inbounds": [{
            "tag": "vless-in",
            "protocol": "vless",
            "port": 443,
            "settings": {
                "decryption": "none",
                "clients": [{
                    "id": "2f9a0d1e-5b8c-4e7f-9a3d-6c1b0e2f4a58",
                    "email": "alice@example.com",
                    "flow": "xtls-rprx-vision"
                }]
            },
            "streamSettings": {
                "network": "tcp",
                "security": "reality",
                "realitySettings": reality
            }
        }],
        "outbounds": [{ "tag": "direct", "protocol": "freedom" }]
    })
}

#[tokio::test]
async fn validate_reports_missing_reality_private_key() {
    let panel = start_panel().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(panel.http_url("/api/v1/admin/config/validate"))
        .json(&reality_candidate(None))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["valid"], false);
    let codes: Vec<&str> = body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["code"].as_str())
        .collect();
    assert!(codes.contains(&"REALITY_NO_PRIVATE_KEY"), "{codes:?}");

    let resp = client
        .post(panel.http_url("/api/v1/admin/config/validate"))
        .json(&reality_candidate(Some(
            "cKx0yUQ0m2ZxA1iF8g3C2Q7bSVrrkLJ4Q0B2OXd4U1k",
        )))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["valid"], true, "{body}");
}

#[tokio::test]
async fn validate_flags_malformed_candidates() {
    let panel = start_panel().await;
    let resp = reqwest::Client::new()
        .post(panel.http_url("/api/v1/admin/config/validate"))
        .json(&json!({ "inbounds": "nope" }))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["valid"], false);
    assert_eq!(body["errors"][0]["code"], "MALFORMED_CONFIG");
}

#[tokio::test]
async fn push_history_compare_and_manual_rollback() {
    let panel = start_panel().await;
    seed_node(&panel.store, "node-1");
    let http = reqwest::Client::new();
    let (mut agent, first) = panel.connect_agent("node-1").await;
    report_result(&mut agent, first.version_id, None).await;

    // Push through the bus.
    change_port(&panel.store, "node-1", 8443);
    let resp = http
        .post(panel.http_url("/api/v1/admin/nodes/node-1/push"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let second = agent.recv_config().await.unwrap();
    assert_eq!(second.version, 2);
    report_result(&mut agent, second.version_id, None).await;

    let body: Value = http
        .get(panel.http_url("/api/v1/admin/nodes/node-1/versions?limit=10"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let versions: Vec<ConfigVersion> = serde_json::from_value(body["versions"].clone()).unwrap();
    assert_eq!(
        versions.iter().map(|v| v.version).collect::<Vec<_>>(),
        vec![2, 1]
    );

    let v1 = first.version_id.unwrap();
    let v2 = second.version_id.unwrap();
    let cmp: Value = http
        .get(panel.http_url(&format!("/api/v1/admin/versions/compare?v1={v1}&v2={v2}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cmp["identical"], false);
    assert_eq!(cmp["v1_fingerprint"], first.fingerprint);

    // Rollback scoped to another tenant is not found.
    let resp = http
        .post(panel.http_url(&format!("/api/v1/admin/versions/{v1}/rollback")))
        .json(&json!({ "tenant_id": "tenant-b" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = http
        .post(panel.http_url(&format!("/api/v1/admin/versions/{v1}/rollback")))
        .json(&json!({ "tenant_id": TENANT, "reason": "revert port", "changed_by": "ops" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: ConfigVersion = resp.json().await.unwrap();
    assert_eq!(created.version, 3);
    assert_eq!(created.change.change_type, ChangeType::Rollback);
    assert_eq!(created.change.changed_by.as_deref(), Some("ops"));

    let rollback = agent.recv_config().await.unwrap();
    assert!(rollback.is_rollback);
    assert_eq!(rollback.version_id, Some(created.version_id));
    assert_eq!(rollback.fingerprint, first.fingerprint);
}

#[tokio::test]
async fn push_for_unknown_node_is_not_found() {
    let panel = start_panel().await;
    let resp = reqwest::Client::new()
        .post(panel.http_url("/api/v1/admin/nodes/ghost/push"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn published_kick_reaches_the_connected_agent() {
    let panel = start_panel().await;
    seed_node(&panel.store, "node-1");
    let (mut agent, _) = panel.connect_agent("node-1").await;

    let resp = reqwest::Client::new()
        .post(panel.http_url("/api/v1/admin/events"))
        .json(&json!({
            "type": "kick_user",
            "node_id": "node-1",
            "emails": ["alice@example.com"],
            "reason": "quota exceeded"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    match agent.recv_message().await.unwrap() {
        WsMessage::Kick(kick) => {
            assert_eq!(kick.emails, vec!["alice@example.com".to_owned()]);
            assert_eq!(kick.reason, "quota exceeded");
        }
        other => panic!("expected kick, got {other:?}"),
    }
}

#[tokio::test]
async fn connections_are_listed_per_tenant() {
    let panel = start_panel().await;
    seed_node(&panel.store, "node-1");
    seed_node(&panel.store, "node-2");
    panel
        .store
        .add_node("node-2", "tenant-b", TOKEN, NodeStatus::Offline);
    let (_a, _) = panel.connect_agent("node-1").await;
    let (_b, _) = panel.connect_agent("node-2").await;

    let http = reqwest::Client::new();
    let all: Value = http
        .get(panel.http_url("/api/v1/admin/connections"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all["connections"].as_array().unwrap().len(), 2);

    let body: Value = http
        .get(panel.http_url("/api/v1/admin/connections?tenant_id=tenant-b"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let listed: Vec<ConnectionInfo> = serde_json::from_value(body["connections"].clone()).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].node_id, "node-2");
    assert_eq!(listed[0].tenant_id, "tenant-b");
}

#[tokio::test]
async fn dashboard_stream_reports_node_connected() {
    let panel = start_panel().await;
    seed_node(&panel.store, "node-1");

    let mut resp = reqwest::Client::new()
        .get(panel.http_url("/api/v1/events"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let (_agent, _) = panel.connect_agent("node-1").await;

    let mut collected = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !collected.contains("event: node_connected") {
        let chunk = tokio::time::timeout_at(deadline, resp.chunk())
            .await
            .expect("timed out waiting for node_connected")
            .unwrap()
            .expect("stream ended");
        collected.push_str(&String::from_utf8_lossy(&chunk));
    }
    assert!(collected.contains("\"node_id\":\"node-1\""));
}

#[tokio::test]
async fn health_probes_answer_ok() {
    let panel = start_panel().await;
    let http = reqwest::Client::new();
    for path in ["/healthz", "/readyz"] {
        let resp = http.get(panel.http_url(path)).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{path}");
        assert_eq!(resp.text().await.unwrap(), "ok");
    }
}
