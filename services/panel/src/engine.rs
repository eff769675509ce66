//! Outbound operations towards connected agents and handling of their
//! apply reports.
//!
//! Every outbound operation fails immediately when this replica holds no
//! live connection for the node.  There is no internal retry: agents
//! reconnect and receive a fresh initial push.

use crate::alerts::{Alert, AlertSink};
use crate::dashboard_events::{version_changed, DashboardSender};
use crate::model::{ChangeMeta, ConfigVersion, VersionStatus};
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::rollback::{RollbackController, RollbackOutcome};
use crate::validator::ValidationResult;
use crate::versions::{VersionError, VersionStore};
use panel_protocol::{ConfigPush, ConfigResult, Kick, RateLimit, UsersUpdate, WsMessage};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("node {0} has no live connection on this replica")]
    NotConnected(String),
    #[error("configuration is invalid: {}", .0.summary())]
    Invalid(ValidationResult),
    #[error(transparent)]
    Version(#[from] VersionError),
    #[error("send to node {node_id} failed: {reason}")]
    SendFailed { node_id: String, reason: String },
}

/// What was sent by a config push.
#[derive(Debug, Clone, PartialEq)]
pub struct PushReceipt {
    /// `None` when the version could not be recorded and the push went out
    /// untracked.
    pub version_id: Option<Uuid>,
    pub version: i64,
    pub fingerprint: String,
    /// The desired config matched an existing row.
    pub reused: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigResultOutcome {
    Applied(ConfigVersion),
    Failed(RollbackOutcome),
    /// The report referred to an untracked push.
    Untracked,
}

#[derive(Clone)]
pub struct PushEngine {
    registry: ConnectionRegistry,
    versions: VersionStore,
    rollback: RollbackController,
    alerts: Arc<dyn AlertSink>,
    dashboard: DashboardSender,
}

impl PushEngine {
    pub fn new(
        registry: ConnectionRegistry,
        versions: VersionStore,
        alerts: Arc<dyn AlertSink>,
        dashboard: DashboardSender,
    ) -> Self {
        let rollback = RollbackController::new(versions.clone(), alerts.clone());
        Self {
            registry,
            versions,
            rollback,
            alerts,
            dashboard,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    /// Builds, validates, records and sends the node's desired configuration.
    ///
    /// Returns once the message is queued on the node's stream; the apply
    /// outcome arrives later as a `config_result`.
    pub async fn push_config(
        &self,
        node_id: &str,
        meta: ChangeMeta,
    ) -> Result<PushReceipt, PushError> {
        let conn = self.connection(node_id, "push_config")?;

        let prepared = match self.versions.prepare(node_id).await {
            Ok(prepared) => prepared,
            Err(VersionError::Invalid(result)) => {
                self.alerts.emit(Alert::ValidationFailed {
                    node_id: node_id.to_owned(),
                    result: result.clone(),
                });
                return Err(PushError::Invalid(result));
            }
            Err(e) => return Err(e.into()),
        };

        let created = match self
            .versions
            .commit(&conn.tenant_id, node_id, &prepared, meta)
            .await
        {
            Ok(created) => created,
            Err(e) => {
                // The node still gets its configuration; only the history
                // entry is missing.
                warn!(node_id = %node_id, error = %e, "could not record config version; pushing untracked");
                let push = ConfigPush {
                    version_id: None,
                    version: 0,
                    fingerprint: prepared.fingerprint.clone(),
                    config: prepared.payload,
                    is_rollback: false,
                };
                self.send(node_id, &conn.handle, WsMessage::Config(push))?;
                return Ok(PushReceipt {
                    version_id: None,
                    version: 0,
                    fingerprint: prepared.fingerprint,
                    reused: false,
                });
            }
        };

        let version = created.version;
        self.send_version(node_id, &conn.handle, &version, false)
            .await?;
        Ok(PushReceipt {
            version_id: Some(version.version_id),
            version: version.version,
            fingerprint: version.fingerprint,
            reused: created.reused,
        })
    }

    /// Sends an already-recorded version, e.g. a rollback target.
    pub async fn push_version(
        &self,
        node_id: &str,
        version: &ConfigVersion,
        is_rollback: bool,
    ) -> Result<(), PushError> {
        let operation = if is_rollback { "push_rollback" } else { "push_version" };
        let conn = self.connection(node_id, operation)?;
        self.send_version(node_id, &conn.handle, version, is_rollback)
            .await
    }

    async fn send_version(
        &self,
        node_id: &str,
        handle: &ConnectionHandle,
        version: &ConfigVersion,
        is_rollback: bool,
    ) -> Result<(), PushError> {
        // An applied row is already live; re-marking it would demote it.
        if version.status != VersionStatus::Applied {
            match self.versions.mark_pushing(version.version_id).await {
                Ok(pushing) => self.notify_version(&pushing),
                Err(e) => warn!(node_id = %node_id, version = version.version, error = %e, "could not mark version pushing"),
            }
        }
        let push = ConfigPush {
            version_id: Some(version.version_id),
            version: u64::try_from(version.version).unwrap_or_default(),
            fingerprint: version.fingerprint.clone(),
            config: version.payload.clone(),
            is_rollback,
        };
        self.send(node_id, handle, WsMessage::Config(push))?;
        info!(
            node_id = %node_id,
            version = version.version,
            fingerprint = %version.fingerprint,
            is_rollback,
            "config pushed"
        );
        Ok(())
    }

    pub fn push_users_update(&self, node_id: &str, update: UsersUpdate) -> Result<(), PushError> {
        let conn = self.connection(node_id, "push_users_update")?;
        self.send(node_id, &conn.handle, WsMessage::Users(update))
    }

    pub fn kick_users(&self, node_id: &str, kick: Kick) -> Result<(), PushError> {
        let conn = self.connection(node_id, "kick_users")?;
        self.send(node_id, &conn.handle, WsMessage::Kick(kick))
    }

    pub fn update_rate_limit(&self, node_id: &str, limit: RateLimit) -> Result<(), PushError> {
        let conn = self.connection(node_id, "update_rate_limit")?;
        self.send(node_id, &conn.handle, WsMessage::RateLimit(limit))
    }

    /// Applies an agent's `config_result`.
    pub async fn handle_config_result(
        &self,
        node_id: &str,
        result: ConfigResult,
    ) -> Result<ConfigResultOutcome, PushError> {
        let Some(version_id) = result.version_id else {
            if result.success {
                debug!(node_id = %node_id, "untracked config applied");
            } else {
                warn!(
                    node_id = %node_id,
                    error = result.error_message.as_deref().unwrap_or(""),
                    "untracked config failed"
                );
            }
            return Ok(ConfigResultOutcome::Untracked);
        };

        if result.success {
            let applied = self.versions.mark_applied(node_id, version_id).await?;
            info!(node_id = %node_id, version = applied.version, "config applied");
            self.notify_version(&applied);
            return Ok(ConfigResultOutcome::Applied(applied));
        }

        let error = result
            .error_message
            .unwrap_or_else(|| "agent reported failure without a message".to_owned());
        let outcome = self
            .rollback
            .handle_failure(self, node_id, version_id, &error)
            .await?;
        Ok(ConfigResultOutcome::Failed(outcome))
    }

    pub(crate) fn notify_version(&self, version: &ConfigVersion) {
        let _ = self.dashboard.send(version_changed(version));
    }

    fn connection(
        &self,
        node_id: &str,
        operation: &str,
    ) -> Result<crate::registry::Connection, PushError> {
        self.registry.get(node_id).ok_or_else(|| {
            self.alerts.emit(Alert::Unreachable {
                node_id: node_id.to_owned(),
                operation: operation.to_owned(),
            });
            PushError::NotConnected(node_id.to_owned())
        })
    }

    fn send(
        &self,
        node_id: &str,
        handle: &ConnectionHandle,
        msg: WsMessage,
    ) -> Result<(), PushError> {
        let kind = msg.kind();
        let reason = match handle.outbound.try_send(msg) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(_)) => format!("outbound queue full while sending {kind}"),
            Err(TrySendError::Closed(_)) => format!("stream closed while sending {kind}"),
        };
        self.alerts.emit(Alert::TransportError {
            node_id: node_id.to_owned(),
            error: reason.clone(),
        });
        Err(PushError::SendFailed {
            node_id: node_id.to_owned(),
            reason,
        })
    }
}
