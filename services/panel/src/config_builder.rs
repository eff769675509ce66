//! Assembles a node's desired records into one engine document and computes
//! its fingerprint.

use crate::model::{ClientRecord, InboundRecord, NodeConfigRecords, OutboundRecord, RoutingRuleRecord};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

/// The engine-facing view of a node's configuration, with users already
/// merged into their inbounds' `settings.clients`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProxyConfig {
    pub inbounds: Vec<InboundRecord>,
    pub outbounds: Vec<OutboundRecord>,
    pub routing_rules: Vec<RoutingRuleRecord>,
}

#[derive(Deserialize)]
struct EngineDocument {
    #[serde(default)]
    inbounds: Vec<InboundRecord>,
    #[serde(default)]
    outbounds: Vec<OutboundRecord>,
    #[serde(default)]
    routing: Option<EngineRouting>,
}

#[derive(Deserialize)]
struct EngineRouting {
    #[serde(default)]
    rules: Vec<RoutingRuleRecord>,
}

impl ProxyConfig {
    pub fn from_records(records: NodeConfigRecords) -> Self {
        let NodeConfigRecords {
            mut inbounds,
            outbounds,
            routing_rules,
            clients,
        } = records;

        for client in &clients {
            match inbounds.iter_mut().find(|i| i.tag == client.inbound_tag) {
                Some(inbound) => attach_client(inbound, client),
                None => debug!(
                    email = %client.email,
                    inbound_tag = %client.inbound_tag,
                    "client references an inbound that is not enabled; skipping"
                ),
            }
        }

        Self {
            inbounds,
            outbounds,
            routing_rules,
        }
    }

    /// Decodes a document previously produced by [`render`](Self::render)
    /// (or written by hand in the same shape).
    pub fn from_engine_json(raw: &Value) -> Result<Self, serde_json::Error> {
        let doc = EngineDocument::deserialize(raw)?;
        Ok(Self {
            inbounds: doc.inbounds,
            outbounds: doc.outbounds,
            routing_rules: doc.routing.map(|r| r.rules).unwrap_or_default(),
        })
    }

    /// Renders the full engine document, including the stats and policy
    /// sections traffic reporting depends on.
    pub fn render(&self) -> Value {
        let rules: Vec<Value> = self
            .routing_rules
            .iter()
            .map(|rule| {
                let mut value = serde_json::to_value(rule).unwrap_or_else(|_| json!({}));
                if let Value::Object(map) = &mut value {
                    map.insert("type".to_owned(), json!("field"));
                }
                value
            })
            .collect();

        json!({
            "log": { "loglevel": "warning" },
            "stats": {},
            "policy": {
                "levels": {
                    "0": { "statsUserUplink": true, "statsUserDownlink": true }
                },
                "system": {
                    "statsInboundUplink": true,
                    "statsInboundDownlink": true,
                    "statsOutboundUplink": true,
                    "statsOutboundDownlink": true
                }
            },
            "inbounds": self.inbounds,
            "outbounds": self.outbounds,
            "routing": {
                "domainStrategy": "AsIs",
                "rules": rules
            }
        })
    }
}

fn attach_client(inbound: &mut InboundRecord, client: &ClientRecord) {
    let entry = match inbound.protocol.as_str() {
        "vless" => {
            let mut entry = json!({ "id": client.credential, "email": client.email });
            if let Some(flow) = client.flow.as_deref().filter(|f| !f.is_empty()) {
                entry["flow"] = json!(flow);
            }
            entry
        }
        "vmess" => json!({ "id": client.credential, "email": client.email }),
        "trojan" | "shadowsocks" => json!({ "password": client.credential, "email": client.email }),
        other => {
            debug!(
                email = %client.email,
                protocol = other,
                "protocol has no per-user clients; skipping"
            );
            return;
        }
    };

    if inbound.settings.is_null() {
        inbound.settings = Value::Object(Map::new());
    }
    let Value::Object(settings) = &mut inbound.settings else {
        // The validator reports non-object settings.
        return;
    };
    let clients = settings
        .entry("clients")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !clients.is_array() {
        *clients = Value::Array(Vec::new());
    }
    if let Value::Array(list) = clients {
        list.push(entry);
    }
}

/// Serializes `value` with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    sorted(value).to_string()
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), sorted(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// Lowercase hex SHA-256 of the canonical serialization.
pub fn fingerprint(value: &Value) -> String {
    hex::encode(Sha256::digest(canonical_json(value).as_bytes()))
}
