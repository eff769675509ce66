/// Contract golden tests: load each JSON example file, deserialize to Rust types,
/// serialize back to JSON, and verify round-trip fidelity.
use panel_protocol::{WsMessage, error_codes};

/// Helper: load a JSON example file and assert round-trip.
///
/// Returns the deserialized value so callers can inspect fields.
fn round_trip(relative_path: &str) -> WsMessage {
    // Example files live next to the workspace root, not the crate root.
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let workspace_root = std::path::Path::new(manifest_dir)
        .parent()
        .expect("crates/")
        .parent()
        .expect("workspace root");

    let file_path = workspace_root.join(relative_path);
    let json_text = std::fs::read_to_string(&file_path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", file_path.display(), e));

    let value: WsMessage = serde_json::from_str(&json_text)
        .unwrap_or_else(|e| panic!("Failed to deserialize {}: {}", file_path.display(), e));

    let serialized = serde_json::to_string(&value)
        .unwrap_or_else(|e| panic!("Failed to serialize {}: {}", file_path.display(), e));

    let original_json: serde_json::Value = serde_json::from_str(&json_text).unwrap();
    let roundtrip_json: serde_json::Value = serde_json::from_str(&serialized).unwrap();
    assert_eq!(
        original_json,
        roundtrip_json,
        "Round-trip mismatch for {}",
        file_path.display()
    );

    value
}

#[test]
fn register_round_trip() {
    match round_trip("contracts/ws/v1/examples/register.json") {
        WsMessage::Register(inner) => {
            assert_eq!(inner.node_id, "node-fra-01");
            assert!(!inner.token.is_empty());
            let core = inner.core_info.expect("core_info present");
            assert_eq!(core.core_type, "xray");
        }
        other => panic!("Expected Register, got {:?}", other),
    }
}

#[test]
fn register_result_success_carries_intervals() {
    match round_trip("contracts/ws/v1/examples/register_result_ok.json") {
        WsMessage::RegisterResult(inner) => {
            assert!(inner.success);
            assert_eq!(inner.code, None);
            let intervals = inner.intervals.expect("intervals on success");
            assert_eq!(intervals.alive_secs, 30);
        }
        other => panic!("Expected RegisterResult, got {:?}", other),
    }
}

#[test]
fn register_result_rejection_carries_code() {
    match round_trip("contracts/ws/v1/examples/register_result_rejected.json") {
        WsMessage::RegisterResult(inner) => {
            assert!(!inner.success);
            assert_eq!(inner.code.as_deref(), Some(error_codes::NODE_MAINTENANCE));
            assert!(inner.intervals.is_none());
        }
        other => panic!("Expected RegisterResult, got {:?}", other),
    }
}

#[test]
fn status_round_trip() {
    match round_trip("contracts/ws/v1/examples/status.json") {
        WsMessage::Status(inner) => {
            assert_eq!(inner.uptime_secs, 86400);
            assert_eq!(inner.connections, 152);
        }
        other => panic!("Expected Status, got {:?}", other),
    }
}

#[test]
fn traffic_round_trip() {
    match round_trip("contracts/ws/v1/examples/traffic.json") {
        WsMessage::Traffic(inner) => {
            assert_eq!(inner.users.len(), 1);
            assert_eq!(inner.users[0].download, 8192);
            assert_eq!(inner.inbounds[0].tag, "vless-reality");
        }
        other => panic!("Expected Traffic, got {:?}", other),
    }
}

#[test]
fn alive_and_ack_round_trip() {
    assert!(matches!(
        round_trip("contracts/ws/v1/examples/alive.json"),
        WsMessage::Alive(_)
    ));
    match round_trip("contracts/ws/v1/examples/alive_ack.json") {
        WsMessage::AliveAck(ack) => assert!(ack.server_time_ms > 0),
        other => panic!("Expected AliveAck, got {:?}", other),
    }
}

#[test]
fn config_result_failure_round_trip() {
    match round_trip("contracts/ws/v1/examples/config_result_failed.json") {
        WsMessage::ConfigResult(inner) => {
            assert!(!inner.success);
            assert!(inner.version_id.is_some());
            assert_eq!(inner.error_message.as_deref(), Some("port in use"));
        }
        other => panic!("Expected ConfigResult, got {:?}", other),
    }
}

#[test]
fn config_round_trip() {
    match round_trip("contracts/ws/v1/examples/config.json") {
        WsMessage::Config(inner) => {
            assert_eq!(inner.version, 7);
            assert_eq!(inner.fingerprint.len(), 64);
            assert!(!inner.is_rollback);
            assert!(inner.config["inbounds"].is_array());
        }
        other => panic!("Expected Config, got {:?}", other),
    }
}

#[test]
fn users_kick_and_rate_limit_round_trip() {
    match round_trip("contracts/ws/v1/examples/users.json") {
        WsMessage::Users(inner) => {
            assert_eq!(inner.added.len(), 1);
            assert_eq!(inner.removed, vec!["carol@example.com".to_owned()]);
        }
        other => panic!("Expected Users, got {:?}", other),
    }
    match round_trip("contracts/ws/v1/examples/kick.json") {
        WsMessage::Kick(inner) => assert_eq!(inner.emails.len(), 1),
        other => panic!("Expected Kick, got {:?}", other),
    }
    match round_trip("contracts/ws/v1/examples/rate_limit.json") {
        WsMessage::RateLimit(inner) => {
            assert_eq!(inner.upload_limit, Some(1_048_576));
            assert_eq!(inner.download_limit, None);
        }
        other => panic!("Expected RateLimit, got {:?}", other),
    }
}

#[test]
fn error_round_trip() {
    match round_trip("contracts/ws/v1/examples/error.json") {
        WsMessage::Error(inner) => {
            assert_eq!(inner.code, error_codes::PROTOCOL_ERROR);
            assert!(!inner.retryable);
        }
        other => panic!("Expected Error, got {:?}", other),
    }
}
