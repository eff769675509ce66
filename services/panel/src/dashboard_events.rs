use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardEvent {
    NodeConnected {
        node_id: String,
        tenant_id: String,
        session_id: Uuid,
    },
    NodeDisconnected {
        node_id: String,
        session_id: Uuid,
    },
    VersionStatusChanged {
        node_id: String,
        version_id: Uuid,
        version: i64,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    /// Sent to a subscriber that fell behind; it should refetch state.
    Resync,
}

impl DashboardEvent {
    /// SSE `event:` name.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::NodeConnected { .. } => "node_connected",
            Self::NodeDisconnected { .. } => "node_disconnected",
            Self::VersionStatusChanged { .. } => "version_status_changed",
            Self::Resync => "resync",
        }
    }
}

pub type DashboardSender = tokio::sync::broadcast::Sender<DashboardEvent>;

pub fn version_changed(version: &crate::model::ConfigVersion) -> DashboardEvent {
    DashboardEvent::VersionStatusChanged {
        node_id: version.node_id.clone(),
        version_id: version.version_id,
        version: version.version,
        status: version.status.as_str().to_owned(),
        error_message: version.error_message.clone(),
    }
}
