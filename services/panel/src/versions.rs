//! Append-only configuration history per node.
//!
//! Every row moves `pending -> pushing -> applied | failed`.  "Current" is the
//! highest-numbered `applied` row.  Rollbacks insert a fresh row copying an
//! earlier payload; nothing is rewritten or deleted.

use crate::clock::Clock;
use crate::config_builder::{fingerprint, ProxyConfig};
use crate::model::{ChangeMeta, ConfigVersion, NewVersion, VersionStatus};
use crate::repo::{InsertOutcome, RecordStore, StatusChange, StoreError};
use crate::validator::{validate, ValidationResult};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("configuration is invalid: {}", .0.summary())]
    Invalid(ValidationResult),
    #[error("version not found: {0}")]
    NotFound(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A built and validated desired configuration, not yet recorded.
#[derive(Debug, Clone)]
pub struct PreparedConfig {
    pub payload: Value,
    pub fingerprint: String,
    /// Always valid; kept for its warnings.
    pub validation: ValidationResult,
}

#[derive(Debug, Clone)]
pub struct CreatedVersion {
    pub version: ConfigVersion,
    /// `true` when an existing row with the same fingerprint was returned.
    pub reused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionComparison {
    pub identical: bool,
    pub v1_fingerprint: String,
    pub v2_fingerprint: String,
}

#[derive(Clone)]
pub struct VersionStore {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
}

impl VersionStore {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Loads the node's desired records, builds and validates them.
    pub async fn prepare(&self, node_id: &str) -> Result<PreparedConfig, VersionError> {
        let records = self.store.load_node_config(node_id).await?;
        let config = ProxyConfig::from_records(records);
        let validation = validate(&config);
        if !validation.valid {
            return Err(VersionError::Invalid(validation));
        }
        let payload = config.render();
        let fingerprint = fingerprint(&payload);
        Ok(PreparedConfig {
            payload,
            fingerprint,
            validation,
        })
    }

    /// Records `prepared` as a new `pending` row unless an equivalent row
    /// already exists.
    ///
    /// Reuse applies when the current applied version has the same
    /// fingerprint, or when the newest row (not failed) does, so repeated
    /// calls before the agent answers do not pile up rows.  The store makes
    /// that decision under the node's lock, so concurrent callers on other
    /// replicas end up with the same row.
    pub async fn commit(
        &self,
        tenant_id: &str,
        node_id: &str,
        prepared: &PreparedConfig,
        meta: ChangeMeta,
    ) -> Result<CreatedVersion, VersionError> {
        let InsertOutcome { version, reused } = self
            .store
            .insert_version_unless_same(NewVersion {
                version_id: Uuid::new_v4(),
                tenant_id: tenant_id.to_owned(),
                node_id: node_id.to_owned(),
                payload: prepared.payload.clone(),
                fingerprint: prepared.fingerprint.clone(),
                change: meta,
                created_at: self.clock.now(),
            })
            .await?;
        if reused {
            debug!(node_id = %node_id, version = version.version, status = %version.status, "desired config matches an existing version");
        } else {
            info!(
                node_id = %node_id,
                version = version.version,
                fingerprint = %version.fingerprint,
                "config version created"
            );
        }
        Ok(CreatedVersion { version, reused })
    }

    pub async fn create_version(
        &self,
        tenant_id: &str,
        node_id: &str,
        meta: ChangeMeta,
    ) -> Result<CreatedVersion, VersionError> {
        let prepared = self.prepare(node_id).await?;
        self.commit(tenant_id, node_id, &prepared, meta).await
    }

    pub async fn mark_pushing(&self, version_id: Uuid) -> Result<ConfigVersion, VersionError> {
        self.set_status(version_id, VersionStatus::Pushing, None, None)
            .await
    }

    /// Stamps `applied_at`.  Re-applying an applied row leaves it untouched.
    /// A version belonging to another node is reported as not found.
    pub async fn mark_applied(
        &self,
        node_id: &str,
        version_id: Uuid,
    ) -> Result<ConfigVersion, VersionError> {
        let existing = self
            .store
            .get_version(version_id)
            .await?
            .filter(|v| v.node_id == node_id)
            .ok_or(VersionError::NotFound(version_id))?;
        if existing.status == VersionStatus::Applied {
            return Ok(existing);
        }
        let now = self.clock.now();
        self.set_status(version_id, VersionStatus::Applied, None, Some(now))
            .await
    }

    /// Marks the version failed and returns the rollback target: the most
    /// recent applied version of the node, unchanged, if any.
    pub async fn mark_failed(
        &self,
        node_id: &str,
        version_id: Uuid,
        error: &str,
    ) -> Result<(ConfigVersion, Option<ConfigVersion>), VersionError> {
        let existing = self
            .store
            .get_version(version_id)
            .await?
            .filter(|v| v.node_id == node_id)
            .ok_or(VersionError::NotFound(version_id))?;
        let failed = if existing.status == VersionStatus::Failed {
            existing
        } else {
            self.set_status(
                version_id,
                VersionStatus::Failed,
                Some(error.to_owned()),
                None,
            )
            .await?
        };
        let rollback_to = self
            .store
            .latest_version_with_status(node_id, VersionStatus::Applied)
            .await?;
        Ok((failed, rollback_to))
    }

    pub async fn get_current_version(
        &self,
        node_id: &str,
    ) -> Result<Option<ConfigVersion>, VersionError> {
        Ok(self
            .store
            .latest_version_with_status(node_id, VersionStatus::Applied)
            .await?)
    }

    pub async fn get_version(&self, version_id: Uuid) -> Result<ConfigVersion, VersionError> {
        self.store
            .get_version(version_id)
            .await?
            .ok_or(VersionError::NotFound(version_id))
    }

    pub async fn latest_version(&self, node_id: &str) -> Result<Option<ConfigVersion>, VersionError> {
        Ok(self.store.latest_version(node_id).await?)
    }

    /// Newest first.
    pub async fn get_version_history(
        &self,
        node_id: &str,
        limit: i64,
    ) -> Result<Vec<ConfigVersion>, VersionError> {
        Ok(self.store.list_versions(node_id, limit).await?)
    }

    /// Compares by fingerprint, so key order and whitespace do not matter.
    pub async fn compare_versions(
        &self,
        v1: Uuid,
        v2: Uuid,
    ) -> Result<VersionComparison, VersionError> {
        let a = self.get_version(v1).await?;
        let b = self.get_version(v2).await?;
        Ok(VersionComparison {
            identical: a.fingerprint == b.fingerprint,
            v1_fingerprint: a.fingerprint,
            v2_fingerprint: b.fingerprint,
        })
    }

    /// Queues a new `pending` row carrying the target's payload.
    pub async fn rollback_to_version(
        &self,
        tenant_id: &str,
        target_version_id: Uuid,
        meta: ChangeMeta,
    ) -> Result<ConfigVersion, VersionError> {
        let target = self
            .store
            .get_version(target_version_id)
            .await?
            .filter(|v| v.tenant_id == tenant_id)
            .ok_or(VersionError::NotFound(target_version_id))?;
        let version = self
            .store
            .insert_version(NewVersion {
                version_id: Uuid::new_v4(),
                tenant_id: target.tenant_id.clone(),
                node_id: target.node_id.clone(),
                payload: target.payload.clone(),
                fingerprint: target.fingerprint.clone(),
                change: meta,
                created_at: self.clock.now(),
            })
            .await?;
        info!(
            node_id = %version.node_id,
            version = version.version,
            rollback_of = target.version,
            "rollback version created"
        );
        Ok(version)
    }

    async fn set_status(
        &self,
        version_id: Uuid,
        status: VersionStatus,
        error_message: Option<String>,
        applied_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<ConfigVersion, VersionError> {
        self.store
            .update_version_status(
                version_id,
                StatusChange {
                    status,
                    error_message,
                    applied_at,
                },
            )
            .await?
            .ok_or(VersionError::NotFound(version_id))
    }
}
