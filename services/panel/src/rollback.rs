//! Reaction to a failed apply: mark the version failed, re-push the last
//! applied configuration once, and alert.

use crate::alerts::{Alert, AlertSink};
use crate::engine::{PushEngine, PushError};
use crate::model::{ChangeMeta, ConfigVersion};
use crate::versions::{VersionError, VersionStore};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, PartialEq)]
pub enum RollbackOutcome {
    /// A rollback row was created and sent.
    RolledBack {
        failed: ConfigVersion,
        target: ConfigVersion,
        rollback: ConfigVersion,
    },
    /// No applied version exists to return to.
    NoTarget { failed: ConfigVersion },
    /// The target is the configuration that just failed.
    SameFingerprint {
        failed: ConfigVersion,
        target: ConfigVersion,
    },
    /// A rollback row exists but could not be sent.
    PushFailed {
        failed: ConfigVersion,
        target: ConfigVersion,
        error: String,
    },
}

#[derive(Clone)]
pub struct RollbackController {
    versions: VersionStore,
    alerts: Arc<dyn AlertSink>,
}

impl RollbackController {
    pub fn new(versions: VersionStore, alerts: Arc<dyn AlertSink>) -> Self {
        Self { versions, alerts }
    }

    /// Single-shot: at most one rollback push per failure, never retried.
    pub async fn handle_failure(
        &self,
        engine: &PushEngine,
        node_id: &str,
        version_id: Uuid,
        error: &str,
    ) -> Result<RollbackOutcome, VersionError> {
        let (failed, target) = self.versions.mark_failed(node_id, version_id, error).await?;
        engine.notify_version(&failed);
        warn!(node_id = %node_id, version = failed.version, error = %error, "agent rejected config");

        let outcome = match target {
            None => RollbackOutcome::NoTarget { failed },
            Some(target) if target.fingerprint == failed.fingerprint => {
                RollbackOutcome::SameFingerprint { failed, target }
            }
            Some(target) => self.roll_back(engine, node_id, failed, target, error).await?,
        };

        let (failed, rollback_to, rollback_pushed) = match &outcome {
            RollbackOutcome::RolledBack { failed, target, .. } => (failed, Some(target.version_id), true),
            RollbackOutcome::NoTarget { failed } => (failed, None, false),
            RollbackOutcome::SameFingerprint { failed, target }
            | RollbackOutcome::PushFailed { failed, target, .. } => {
                (failed, Some(target.version_id), false)
            }
        };
        self.alerts.emit(Alert::ConfigFailed {
            node_id: node_id.to_owned(),
            version_id: failed.version_id,
            version: failed.version,
            error_message: error.to_owned(),
            rollback_to,
            rollback_pushed,
        });
        Ok(outcome)
    }

    async fn roll_back(
        &self,
        engine: &PushEngine,
        node_id: &str,
        failed: ConfigVersion,
        target: ConfigVersion,
        error: &str,
    ) -> Result<RollbackOutcome, VersionError> {
        let meta = ChangeMeta::rollback(
            Some(SYSTEM_ACTOR.to_owned()),
            format!("automatic rollback: version {} failed: {error}", failed.version),
        );
        let rollback = self
            .versions
            .rollback_to_version(&target.tenant_id, target.version_id, meta)
            .await?;
        match engine.push_version(node_id, &rollback, true).await {
            Ok(()) => {
                info!(
                    node_id = %node_id,
                    failed_version = failed.version,
                    target_version = target.version,
                    rollback_version = rollback.version,
                    "rolled back"
                );
                Ok(RollbackOutcome::RolledBack {
                    failed,
                    target,
                    rollback,
                })
            }
            Err(PushError::Version(e)) => Err(e),
            Err(e) => Ok(RollbackOutcome::PushFailed {
                failed,
                target,
                error: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::RecordingAlertSink;
    use crate::registry::{ConnectionHandle, ConnectionRegistry};
    use crate::repo::memory::MemoryStore;
    use crate::test_support::{clock, store_with_node, TENANT};
    use panel_protocol::WsMessage;
    use tokio::sync::{broadcast, mpsc};

    fn setup() -> (
        Arc<MemoryStore>,
        PushEngine,
        RollbackController,
        Arc<RecordingAlertSink>,
        mpsc::Receiver<WsMessage>,
    ) {
        let store = store_with_node("n1");
        let clock = clock();
        let registry = ConnectionRegistry::new(clock.clone());
        let versions = VersionStore::new(store.clone(), clock);
        let alerts = Arc::new(RecordingAlertSink::new());
        let (dashboard, _) = broadcast::channel(16);
        let engine = PushEngine::new(registry.clone(), versions.clone(), alerts.clone(), dashboard);
        let controller = RollbackController::new(versions, alerts.clone());
        let (tx, rx) = mpsc::channel(16);
        registry.register("n1", TENANT, ConnectionHandle::new(tx));
        (store, engine, controller, alerts, rx)
    }

    #[tokio::test]
    async fn failure_without_target_only_alerts() {
        let (store, engine, controller, alerts, mut rx) = setup();
        let v1 = engine
            .versions()
            .create_version(TENANT, "n1", ChangeMeta::update())
            .await
            .unwrap()
            .version;

        let outcome = controller
            .handle_failure(&engine, "n1", v1.version_id, "boom")
            .await
            .unwrap();
        assert!(matches!(outcome, RollbackOutcome::NoTarget { .. }));
        assert!(rx.try_recv().is_err());
        assert_eq!(store.versions("n1").len(), 1);
        assert!(matches!(
            alerts.alerts()[0],
            Alert::ConfigFailed {
                rollback_to: None,
                rollback_pushed: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn same_fingerprint_target_is_not_re_pushed() {
        let (store, engine, controller, alerts, mut rx) = setup();
        let versions = engine.versions().clone();
        let v1 = versions
            .create_version(TENANT, "n1", ChangeMeta::update())
            .await
            .unwrap()
            .version;
        versions.mark_applied("n1", v1.version_id).await.unwrap();
        let rollback = versions
            .rollback_to_version(TENANT, v1.version_id, ChangeMeta::rollback(None, "manual"))
            .await
            .unwrap();

        let outcome = controller
            .handle_failure(&engine, "n1", rollback.version_id, "still broken")
            .await
            .unwrap();
        assert!(matches!(outcome, RollbackOutcome::SameFingerprint { .. }));
        assert!(rx.try_recv().is_err());
        assert_eq!(store.versions("n1").len(), 2);
        assert_eq!(alerts.alerts().len(), 1);
    }

    #[tokio::test]
    async fn unknown_version_is_an_error() {
        let (_store, engine, controller, alerts, _rx) = setup();
        let err = controller
            .handle_failure(&engine, "n1", Uuid::new_v4(), "boom")
            .await
            .unwrap_err();
        assert!(matches!(err, VersionError::NotFound(_)));
        assert!(alerts.alerts().is_empty());
    }
}
