//! Shared fixtures: an in-memory panel served on an ephemeral port.
#![allow(dead_code)]

use panel::alerts::RecordingAlertSink;
use panel::bus::{spawn_event_dispatcher, EventBus, LocalEventBus};
use panel::clock::SystemClock;
use panel::model::{ClientRecord, InboundRecord, NodeStatus, OutboundRecord};
use panel::repo::memory::MemoryStore;
use panel::state::{AppState, SessionSettings};
use panel_protocol::{ConfigResult, WsMessage};
use panel_test_utils::MockAgentClient;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub const TENANT: &str = "tenant-a";
pub const TOKEN: &str = "node-token-123";

pub struct TestPanel {
    pub addr: SocketAddr,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub alerts: Arc<RecordingAlertSink>,
}

impl TestPanel {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws/v1/agents", self.addr)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Connects and registers `node_id`, returning the client after the
    /// initial config push has been read.
    pub async fn connect_agent(&self, node_id: &str) -> (MockAgentClient, panel_protocol::ConfigPush) {
        let mut client = MockAgentClient::connect(&self.ws_url()).await.unwrap();
        let result = client.register(node_id, TOKEN).await.unwrap();
        assert!(result.success, "register failed: {}", result.message);
        let push = client.recv_config().await.unwrap();
        (client, push)
    }
}

pub async fn start_panel() -> TestPanel {
    let store = Arc::new(MemoryStore::new());
    let alerts = Arc::new(RecordingAlertSink::new());
    let bus: Arc<dyn EventBus> = Arc::new(LocalEventBus::default());
    let settings = SessionSettings {
        register_timeout: Duration::from_secs(2),
        ..SessionSettings::default()
    };
    let state = AppState::with_parts(
        store.clone(),
        bus.clone(),
        Arc::new(SystemClock),
        alerts.clone(),
        settings,
    );
    spawn_event_dispatcher(bus.as_ref(), state.engine.clone())
        .await
        .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = panel::build_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    TestPanel {
        addr,
        state,
        store,
        alerts,
    }
}

pub fn vless_inbound(port: i64) -> InboundRecord {
    InboundRecord {
        tag: "vless-in".to_owned(),
        protocol: "vless".to_owned(),
        listen: None,
        port: Some(port),
        settings: json!({ "decryption": "none" }),
        stream_settings: Some(json!({
            "network": "tcp",
            "security": "reality",
            "realitySettings": {
                "dest": "www.example.com:443",
                "privateKey": "cKx0yUQ0m2ZxA1iF8g3C2Q7bSVrrkLJ4Q0B2OXd4U1k",
                "serverNames": ["www.example.com"],
                "shortIds": ["0123abcd"]
            }
        })),
        sniffing: None,
    }
}

/// One VLESS+Reality inbound with a single user and a direct outbound.
pub fn seed_node(store: &MemoryStore, node_id: &str) {
    store.add_node(node_id, TENANT, TOKEN, NodeStatus::Offline);
    store.add_inbound(node_id, vless_inbound(443));
    store.add_outbound(
        node_id,
        OutboundRecord {
            tag: "direct".to_owned(),
            protocol: "freedom".to_owned(),
            settings: json!({}),
            stream_settings: None,
        },
    );
    store.add_client(
        node_id,
        ClientRecord {
            inbound_tag: "vless-in".to_owned(),
            email: "alice@example.com".to_owned(),
            credential: "2f9a0d1e-5b8c-4e7f-9a3d-6c1b0e2f4a58".to_owned(),
            flow: Some("xtls-rprx-vision".to_owned()),
        },
    );
}

pub fn change_port(store: &MemoryStore, node_id: &str, port: i64) {
    let mut records = store.node_config(node_id);
    if let Some(inbound) = records.inbounds.first_mut() {
        inbound.port = Some(port);
    }
    store.set_node_config(node_id, records);
}

/// Sends a `config_result` and waits until the panel has processed it.
/// Returns whatever the panel sent in the meantime.
pub async fn report_result(
    client: &mut MockAgentClient,
    version_id: Option<uuid::Uuid>,
    error: Option<&str>,
) -> Vec<WsMessage> {
    client
        .send_message(&WsMessage::ConfigResult(ConfigResult {
            success: error.is_none(),
            version_id,
            error_message: error.map(ToOwned::to_owned),
        }))
        .await
        .unwrap();
    sync(client).await
}

/// Round-trips an `alive`; messages on one stream are handled in order, so
/// everything sent before has been processed when the ack arrives.
/// Returns the messages that preceded the ack.
pub async fn sync(client: &mut MockAgentClient) -> Vec<WsMessage> {
    client
        .send_message(&WsMessage::Alive(panel_protocol::Alive::default()))
        .await
        .unwrap();
    let mut before = Vec::new();
    loop {
        match client.recv_message().await.unwrap() {
            WsMessage::AliveAck(_) => return before,
            other => before.push(other),
        }
    }
}
