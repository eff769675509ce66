//! Integration tests for the agent WebSocket session.
mod common;

use common::{change_port, report_result, seed_node, start_panel, sync, TOKEN};
use panel::alerts::Alert;
use panel::model::{ChangeMeta, ChangeType, NodeStatus, VersionStatus};
use panel_protocol::*;
use panel_test_utils::MockAgentClient;
use std::time::Duration;

async fn wait_for_status(panel: &common::TestPanel, node_id: &str, status: NodeStatus) {
    for _ in 0..100 {
        if panel.store.node(node_id).map(|n| n.status) == Some(status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("node {node_id} never reached {status:?}");
}

#[tokio::test]
async fn register_marks_online_and_sends_exactly_one_initial_config() {
    let panel = start_panel().await;
    seed_node(&panel.store, "node-1");

    let (mut client, push) = panel.connect_agent("node-1").await;
    assert_eq!(push.version, 1);
    assert!(push.version_id.is_some());
    assert!(!push.is_rollback);
    assert_eq!(push.config["inbounds"][0]["port"], 443);

    assert!(panel.state.registry.is_connected("node-1"));
    assert_eq!(panel.store.node("node-1").unwrap().status, NodeStatus::Online);
    assert_eq!(
        panel.store.agent_version("node-1").as_deref(),
        Some("test-agent")
    );

    let extra = client
        .recv_message_timeout(Duration::from_millis(200))
        .await
        .unwrap();
    assert!(extra.is_none(), "unexpected message after initial push: {extra:?}");

    let versions = panel.store.versions("node-1");
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].status, VersionStatus::Pushing);
}

#[tokio::test]
async fn register_result_carries_reporting_intervals() {
    let panel = start_panel().await;
    seed_node(&panel.store, "node-1");

    let mut client = MockAgentClient::connect(&panel.ws_url()).await.unwrap();
    let result = client.register("node-1", TOKEN).await.unwrap();
    assert!(result.success);
    let intervals = result.intervals.expect("intervals on success");
    assert_eq!(intervals.alive_secs, 30);
    assert_eq!(intervals.status_secs, 60);
}

#[tokio::test]
async fn bad_token_is_rejected_without_registry_entry() {
    let panel = start_panel().await;
    seed_node(&panel.store, "node-1");

    let mut client = MockAgentClient::connect(&panel.ws_url()).await.unwrap();
    let result = client.register("node-1", "wrong-token").await.unwrap();
    assert!(!result.success);
    assert_eq!(result.code.as_deref(), Some(error_codes::INVALID_TOKEN));
    assert!(!panel.state.registry.is_connected("node-1"));
    assert_eq!(panel.store.node("node-1").unwrap().status, NodeStatus::Offline);
    assert!(panel.store.versions("node-1").is_empty());
}

#[tokio::test]
async fn unknown_and_maintenance_nodes_are_refused() {
    let panel = start_panel().await;
    seed_node(&panel.store, "node-1");
    panel.store.set_node_status("node-1", NodeStatus::Maintenance);

    let mut client = MockAgentClient::connect(&panel.ws_url()).await.unwrap();
    let result = client.register("node-1", TOKEN).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.code.as_deref(), Some(error_codes::NODE_MAINTENANCE));

    let mut client = MockAgentClient::connect(&panel.ws_url()).await.unwrap();
    let result = client.register("ghost", TOKEN).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.code.as_deref(), Some(error_codes::NODE_NOT_FOUND));

    assert!(panel.state.registry.is_empty());
}

#[tokio::test]
async fn first_message_other_than_register_is_a_protocol_error() {
    let panel = start_panel().await;
    let mut client = MockAgentClient::connect(&panel.ws_url()).await.unwrap();
    client
        .send_message(&WsMessage::Alive(Alive::default()))
        .await
        .unwrap();
    match client.recv_message().await.unwrap() {
        WsMessage::Error(e) => {
            assert_eq!(e.code, error_codes::PROTOCOL_ERROR);
            assert!(!e.retryable);
        }
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn alive_is_acknowledged() {
    let panel = start_panel().await;
    seed_node(&panel.store, "node-1");
    let (mut client, _) = panel.connect_agent("node-1").await;

    client
        .send_message(&WsMessage::Alive(Alive {
            sent_at_ms: Some(1),
        }))
        .await
        .unwrap();
    match client.recv_message().await.unwrap() {
        WsMessage::AliveAck(ack) => assert!(ack.server_time_ms > 0),
        other => panic!("expected alive_ack, got {other:?}"),
    }
}

#[tokio::test]
async fn status_and_traffic_reports_are_stored() {
    let panel = start_panel().await;
    seed_node(&panel.store, "node-1");
    let (mut client, _) = panel.connect_agent("node-1").await;

    client
        .send_message(&WsMessage::Status(StatusReport {
            cpu: 12.5,
            mem: 40.0,
            disk: 10.0,
            uptime_secs: 3600,
            connections: 7,
        }))
        .await
        .unwrap();
    client
        .send_message(&WsMessage::Traffic(TrafficReport {
            users: vec![UserTraffic {
                email: "alice@example.com".to_owned(),
                upload: 100,
                download: 200,
            }],
            ..TrafficReport::default()
        }))
        .await
        .unwrap();
    sync(&mut client).await;

    let info = panel.store.system_info("node-1").expect("status stored");
    assert_eq!(info.connections, 7);
    let rows = panel.store.traffic_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].node_id, "node-1");
}

#[tokio::test]
async fn applied_result_marks_version_applied() {
    let panel = start_panel().await;
    seed_node(&panel.store, "node-1");
    let (mut client, push) = panel.connect_agent("node-1").await;

    report_result(&mut client, push.version_id, None).await;

    let current = panel
        .state
        .versions
        .get_current_version("node-1")
        .await
        .unwrap()
        .expect("current version");
    assert_eq!(Some(current.version_id), push.version_id);
    assert!(current.applied_at.is_some());
}

#[tokio::test]
async fn result_for_another_nodes_version_is_ignored() {
    let panel = start_panel().await;
    seed_node(&panel.store, "node-1");
    seed_node(&panel.store, "node-2");
    let (mut agent, _) = panel.connect_agent("node-1").await;
    let (_other, theirs) = panel.connect_agent("node-2").await;

    agent
        .send_message(&WsMessage::ConfigResult(ConfigResult {
            success: true,
            version_id: theirs.version_id,
            error_message: None,
        }))
        .await
        .unwrap();
    sync(&mut agent).await;

    let versions = panel.store.versions("node-2");
    assert_eq!(versions[0].status, VersionStatus::Pushing);
    assert!(panel
        .state
        .versions
        .get_current_version("node-2")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn port_change_is_pushed_as_next_version() {
    let panel = start_panel().await;
    seed_node(&panel.store, "node-1");
    let (mut client, first) = panel.connect_agent("node-1").await;
    report_result(&mut client, first.version_id, None).await;

    change_port(&panel.store, "node-1", 8443);
    let receipt = panel
        .state
        .engine
        .push_config("node-1", ChangeMeta::update())
        .await
        .unwrap();
    assert_eq!(receipt.version, 2);
    assert!(!receipt.reused);

    let second = client.recv_config().await.unwrap();
    assert_eq!(second.version, 2);
    assert_ne!(second.fingerprint, first.fingerprint);
    assert_eq!(second.config["inbounds"][0]["port"], 8443);
    report_result(&mut client, second.version_id, None).await;

    let versions = panel.store.versions("node-1");
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[1].status, VersionStatus::Applied);
}

#[tokio::test]
async fn rejected_config_is_rolled_back_to_last_applied() {
    let panel = start_panel().await;
    seed_node(&panel.store, "node-1");
    let (mut client, first) = panel.connect_agent("node-1").await;
    report_result(&mut client, first.version_id, None).await;

    change_port(&panel.store, "node-1", 8443);
    panel
        .state
        .engine
        .push_config("node-1", ChangeMeta::update())
        .await
        .unwrap();
    let second = client.recv_config().await.unwrap();

    client
        .send_message(&WsMessage::ConfigResult(ConfigResult {
            success: false,
            version_id: second.version_id,
            error_message: Some("port in use".to_owned()),
        }))
        .await
        .unwrap();
    let rollback = client.recv_config().await.unwrap();
    sync(&mut client).await;
    assert!(rollback.is_rollback);
    assert_eq!(rollback.version, 3);
    assert_eq!(rollback.fingerprint, first.fingerprint);

    let versions = panel.store.versions("node-1");
    assert_eq!(versions[1].status, VersionStatus::Failed);
    assert_eq!(versions[1].error_message.as_deref(), Some("port in use"));
    assert_eq!(versions[2].change.change_type, ChangeType::Rollback);

    let alerts = panel.alerts.alerts();
    assert!(alerts.iter().any(|a| matches!(
        a,
        Alert::ConfigFailed { rollback_pushed: true, version: 2, .. }
    )));
}

#[tokio::test]
async fn disconnect_marks_node_offline() {
    let panel = start_panel().await;
    seed_node(&panel.store, "node-1");
    let (mut client, _) = panel.connect_agent("node-1").await;
    assert!(panel.state.registry.is_connected("node-1"));

    client.close().await.unwrap();
    wait_for_status(&panel, "node-1", NodeStatus::Offline).await;
    assert!(!panel.state.registry.is_connected("node-1"));
}

#[tokio::test]
async fn newer_registration_supersedes_older_session() {
    let panel = start_panel().await;
    seed_node(&panel.store, "node-1");
    let (mut old, _) = panel.connect_agent("node-1").await;
    let first_session = panel.state.registry.get("node-1").unwrap().handle.session_id;

    let (_new, push) = panel.connect_agent("node-1").await;
    // Same desired config: the pending row is reused.
    assert_eq!(push.version, 1);
    let second_session = panel.state.registry.get("node-1").unwrap().handle.session_id;
    assert_ne!(first_session, second_session);

    // The old stream is closed by the panel.
    assert!(old.recv_message().await.is_err());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(panel.state.registry.is_connected("node-1"));
    assert_eq!(panel.store.node("node-1").unwrap().status, NodeStatus::Online);
}
