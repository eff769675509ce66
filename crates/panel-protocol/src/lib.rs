// panel-protocol: Panel <-> Agent control protocol types and serialization.
//
// All WebSocket messages use a top-level `kind` field for discriminated
// deserialization.  The enum variants map 1:1 to the v1 message kinds.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Agent -> Panel messages
// ---------------------------------------------------------------------------

/// Build information about the proxy engine the Agent drives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreInfo {
    /// E.g. "xray" or "sing-box".
    pub core_type: String,
    pub core_version: String,
}

/// First message on every Agent stream.
///
/// The Panel answers with exactly one `register_result`.  Any other first
/// message is a protocol error and closes the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    pub node_id: String,
    /// Shared secret issued when the node was created.
    pub token: String,
    pub agent_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_info: Option<CoreInfo>,
}

/// Periodic host snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Percent, 0-100.
    pub cpu: f64,
    /// Percent, 0-100.
    pub mem: f64,
    /// Percent, 0-100.
    pub disk: f64,
    pub uptime_secs: u64,
    /// Open client connections through the proxy engine.
    pub connections: u64,
}

/// Byte counters for one user since the previous report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTraffic {
    pub email: String,
    pub upload: u64,
    pub download: u64,
}

/// Byte counters for one inbound or outbound tag since the previous report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagTraffic {
    pub tag: String,
    pub upload: u64,
    pub download: u64,
}

/// Batched traffic counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficReport {
    #[serde(default)]
    pub users: Vec<UserTraffic>,
    #[serde(default)]
    pub inbounds: Vec<TagTraffic>,
    #[serde(default)]
    pub outbounds: Vec<TagTraffic>,
}

/// Agent heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alive {
    /// Agent wall clock in epoch milliseconds, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at_ms: Option<i64>,
}

/// Outcome of applying a `config` push.
///
/// `version_id` is absent when the push it answers carried no version id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigResult {
    pub success: bool,
    #[serde(default)]
    pub version_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// Panel -> Agent messages
// ---------------------------------------------------------------------------

/// How often the Agent should send each periodic report, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportIntervals {
    pub status_secs: u64,
    pub traffic_secs: u64,
    pub alive_secs: u64,
}

/// Answer to `register`.
///
/// On failure `code` is one of [`error_codes`] and the Panel closes the
/// stream right after sending it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intervals: Option<ReportIntervals>,
}

/// Answer to `alive`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliveAck {
    /// Panel wall clock in epoch milliseconds.
    pub server_time_ms: i64,
}

/// A full configuration for the proxy engine.
///
/// `version_id` is `None` and `version` is 0 when the Panel could not record
/// a version for this payload.  Agents compare `version` numbers, never
/// arrival order, to decide recency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigPush {
    pub version_id: Option<Uuid>,
    pub version: u64,
    /// Hex SHA-256 of the canonical serialization of `config`.
    pub fingerprint: String,
    /// Engine configuration, opaque to the protocol.
    pub config: serde_json::Value,
    #[serde(default)]
    pub is_rollback: bool,
}

/// A user to add to a running inbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub email: String,
    pub inbound_tag: String,
    /// UUID for vless/vmess, password for trojan/shadowsocks.
    pub credential: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
}

/// Incremental user changes, applied without a full config reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsersUpdate {
    #[serde(default)]
    pub added: Vec<UserEntry>,
    /// Emails.
    #[serde(default)]
    pub removed: Vec<String>,
}

/// Drop live sessions of the listed users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kick {
    pub emails: Vec<String>,
    pub reason: String,
}

/// Per-user bandwidth caps in bytes per second.  `None` removes the cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub email: String,
    pub upload_limit: Option<u64>,
    pub download_limit: Option<u64>,
}

/// Error codes carried in `error` messages and failed `register_result`s.
pub mod error_codes {
    pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
    pub const NODE_NOT_FOUND: &str = "NODE_NOT_FOUND";
    pub const NODE_MAINTENANCE: &str = "NODE_MAINTENANCE";
    pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Protocol error message (panel -> agent).
///
/// | Code              | Retryable |
/// |-------------------|-----------|
/// | INVALID_TOKEN     | false     |
/// | NODE_NOT_FOUND    | false     |
/// | NODE_MAINTENANCE  | true      |
/// | PROTOCOL_ERROR    | false     |
/// | INTERNAL_ERROR    | true      |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

// ---------------------------------------------------------------------------
// Top-level discriminated union
// ---------------------------------------------------------------------------

/// All WebSocket message kinds in the v1 protocol.
///
/// ```json
/// { "kind": "register", "node_id": "n1", ... }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
#[serde(rename_all = "snake_case")]
pub enum WsMessage {
    Register(Register),
    Status(StatusReport),
    Traffic(TrafficReport),
    Alive(Alive),
    ConfigResult(ConfigResult),
    RegisterResult(RegisterResult),
    AliveAck(AliveAck),
    Config(ConfigPush),
    Users(UsersUpdate),
    Kick(Kick),
    RateLimit(RateLimit),
    Error(ErrorMessage),
}

impl WsMessage {
    /// The `kind` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register(_) => "register",
            Self::Status(_) => "status",
            Self::Traffic(_) => "traffic",
            Self::Alive(_) => "alive",
            Self::ConfigResult(_) => "config_result",
            Self::RegisterResult(_) => "register_result",
            Self::AliveAck(_) => "alive_ack",
            Self::Config(_) => "config",
            Self::Users(_) => "users",
            Self::Kick(_) => "kick",
            Self::RateLimit(_) => "rate_limit",
            Self::Error(_) => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP API types
// ---------------------------------------------------------------------------

/// JSON error envelope used by all non-2xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// One entry in the `GET /api/v1/admin/connections` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub node_id: String,
    pub tenant_id: String,
    pub session_id: Uuid,
    /// RFC 3339.
    pub connected_at: String,
    /// RFC 3339.
    pub last_heartbeat: String,
}
