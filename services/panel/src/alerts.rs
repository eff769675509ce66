use crate::validator::ValidationResult;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    /// An agent rejected a pushed configuration.
    ConfigFailed {
        node_id: String,
        version_id: Uuid,
        version: i64,
        error_message: String,
        rollback_to: Option<Uuid>,
        /// `false` when no rollback was attempted.
        rollback_pushed: bool,
    },
    /// A push was aborted because the desired configuration is invalid.
    ValidationFailed {
        node_id: String,
        result: ValidationResult,
    },
    /// An outbound operation targeted a node with no live connection here.
    Unreachable { node_id: String, operation: String },
    /// A stream failed or could not be written.
    TransportError { node_id: String, error: String },
}

pub trait AlertSink: Send + Sync {
    fn emit(&self, alert: Alert);
}

/// Writes alerts as structured log events.
#[derive(Debug, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn emit(&self, alert: Alert) {
        match &alert {
            Alert::ConfigFailed {
                node_id,
                version_id,
                version,
                error_message,
                rollback_to,
                rollback_pushed,
            } => error!(
                node_id = %node_id,
                version_id = %version_id,
                version = *version,
                error = %error_message,
                rollback_to = ?rollback_to,
                rollback_pushed = *rollback_pushed,
                "configuration failed on node"
            ),
            Alert::ValidationFailed { node_id, result } => warn!(
                node_id = %node_id,
                errors = result.errors.len(),
                detail = %result.summary(),
                "push aborted: invalid configuration"
            ),
            Alert::Unreachable { node_id, operation } => warn!(
                node_id = %node_id,
                operation = %operation,
                "node has no live connection"
            ),
            Alert::TransportError { node_id, error } => warn!(
                node_id = %node_id,
                error = %error,
                "agent transport error"
            ),
        }
    }
}

/// Keeps every alert in memory.
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }
}

impl AlertSink for RecordingAlertSink {
    fn emit(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }
}
