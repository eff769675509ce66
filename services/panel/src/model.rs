//! Records read from and written to the record store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Online,
    Offline,
    Maintenance,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            "maintenance" => Ok(Self::Maintenance),
            other => Err(format!("unknown node status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub node_id: String,
    pub tenant_id: String,
    /// SHA-256 of the node's shared token.
    pub token_hash: Vec<u8>,
    pub status: NodeStatus,
    pub last_seen_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Desired configuration records
// ---------------------------------------------------------------------------

/// Serializes in the engine's inbound shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundRecord {
    #[serde(default)]
    pub tag: String,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
    /// Kept wide so out-of-range values reach the validator instead of
    /// failing at decode time.
    #[serde(default)]
    pub port: Option<i64>,
    #[serde(default)]
    pub settings: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_settings: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sniffing: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundRecord {
    #[serde(default)]
    pub tag: String,
    pub protocol: String,
    #[serde(default)]
    pub settings: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_settings: Option<serde_json::Value>,
}

/// One routing rule in Xray's `field` rule shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRuleRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balancer_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inbound_tag: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domain: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protocol: Vec<String>,
}

/// A proxy user attached to one inbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub inbound_tag: String,
    pub email: String,
    /// UUID for vless/vmess, password for trojan/shadowsocks.
    pub credential: String,
    pub flow: Option<String>,
}

/// Everything enabled for one node, in configured order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeConfigRecords {
    pub inbounds: Vec<InboundRecord>,
    pub outbounds: Vec<OutboundRecord>,
    pub routing_rules: Vec<RoutingRuleRecord>,
    pub clients: Vec<ClientRecord>,
}

// ---------------------------------------------------------------------------
// Config versions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Pending,
    Pushing,
    Applied,
    Failed,
}

impl VersionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Pushing => "pushing",
            Self::Applied => "applied",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VersionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "pushing" => Ok(Self::Pushing),
            "applied" => Ok(Self::Applied),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown version status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Desired configuration changed (or first push).
    Update,
    /// Payload copied from an earlier version.
    Rollback,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Rollback => "rollback",
        }
    }
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "update" => Ok(Self::Update),
            "rollback" => Ok(Self::Rollback),
            other => Err(format!("unknown change type '{other}'")),
        }
    }
}

/// Who changed what and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMeta {
    pub change_type: ChangeType,
    pub changed_by: Option<String>,
    pub reason: Option<String>,
}

impl ChangeMeta {
    pub fn update() -> Self {
        Self {
            change_type: ChangeType::Update,
            changed_by: None,
            reason: None,
        }
    }

    pub fn rollback(changed_by: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            change_type: ChangeType::Rollback,
            changed_by,
            reason: Some(reason.into()),
        }
    }

    pub fn by(mut self, who: impl Into<String>) -> Self {
        self.changed_by = Some(who.into());
        self
    }

    pub fn because(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

impl Default for ChangeMeta {
    fn default() -> Self {
        Self::update()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigVersion {
    pub version_id: Uuid,
    pub tenant_id: String,
    pub node_id: String,
    pub version: i64,
    pub payload: serde_json::Value,
    pub fingerprint: String,
    pub status: VersionStatus,
    pub error_message: Option<String>,
    pub change: ChangeMeta,
    pub created_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
}

/// A version row about to be inserted; the store assigns the number.
#[derive(Debug, Clone, PartialEq)]
pub struct NewVersion {
    pub version_id: Uuid,
    pub tenant_id: String,
    pub node_id: String,
    pub payload: serde_json::Value,
    pub fingerprint: String,
    pub change: ChangeMeta,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in [
            VersionStatus::Pending,
            VersionStatus::Pushing,
            VersionStatus::Applied,
            VersionStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<VersionStatus>(), Ok(status));
        }
        for status in [NodeStatus::Online, NodeStatus::Offline, NodeStatus::Maintenance] {
            assert_eq!(status.as_str().parse::<NodeStatus>(), Ok(status));
        }
        assert!("paused".parse::<NodeStatus>().is_err());
    }

    #[test]
    fn inbound_uses_engine_field_names() {
        let inbound = InboundRecord {
            tag: "in-1".to_owned(),
            protocol: "vless".to_owned(),
            listen: None,
            port: Some(443),
            settings: serde_json::json!({}),
            stream_settings: Some(serde_json::json!({ "network": "ws" })),
            sniffing: None,
        };
        let json = serde_json::to_value(&inbound).unwrap();
        assert_eq!(json["streamSettings"]["network"], "ws");
        assert!(json.get("listen").is_none());
        assert!(json.get("sniffing").is_none());
    }

    #[test]
    fn routing_rule_uses_engine_field_names() {
        let rule = RoutingRuleRecord {
            outbound_tag: Some("direct".to_owned()),
            inbound_tag: vec!["in-1".to_owned()],
            ..Default::default()
        };
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["outboundTag"], "direct");
        assert_eq!(json["inboundTag"][0], "in-1");
        assert!(json.get("domain").is_none());
    }
}
