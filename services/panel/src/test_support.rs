//! Fixtures shared by unit tests.

use crate::clock::ManualClock;
use crate::model::{ClientRecord, InboundRecord, NodeStatus, OutboundRecord, RoutingRuleRecord};
use crate::repo::memory::MemoryStore;
use chrono::TimeZone;
use serde_json::json;
use std::sync::Arc;

pub const TENANT: &str = "tenant-a";
pub const TOKEN: &str = "node-token-123";

pub fn clock() -> Arc<ManualClock> {
    let start = chrono::Utc
        .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default();
    Arc::new(ManualClock::new(start))
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

/// A node with one VLESS+Reality inbound, one user, and direct/block
/// outbounds.
pub fn store_with_node(node_id: &str) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    seed_node(&store, node_id);
    store
}

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
    store.add_outbound(
        node_id,
        OutboundRecord {
            tag: "block".to_owned(),
            protocol: "blackhole".to_owned(),
            settings: json!({}),
            stream_settings: None,
        },
    );
    store.add_routing_rule(
        node_id,
        RoutingRuleRecord {
            outbound_tag: Some("block".to_owned()),
            ip: vec!["geoip:private".to_owned()],
            ..Default::default()
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

/// Moves the node's only inbound to `port`.
pub fn change_port(store: &MemoryStore, node_id: &str, port: i64) {
    let mut records = store.node_config(node_id);
    if let Some(inbound) = records.inbounds.first_mut() {
        inbound.port = Some(port);
    }
    store.set_node_config(node_id, records);
}
