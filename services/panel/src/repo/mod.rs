//! Persistence seam.  [`pg::PgStore`] backs production; [`memory::MemoryStore`]
//! backs unit and session tests.

pub mod memory;
pub mod pg;

use crate::model::{ConfigVersion, NewVersion, NodeConfigRecords, NodeRecord, NodeStatus, VersionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use panel_protocol::{CoreInfo, StatusReport, TrafficReport};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("node not found: {0}")]
    NodeNotFound(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// What [`RecordStore::insert_version_unless_same`] did.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOutcome {
    pub version: ConfigVersion,
    /// An equivalent row already existed and was returned instead.
    pub reused: bool,
}

/// The row a new version with `fingerprint` would duplicate: the current
/// applied row, otherwise the newest row unless it failed.
pub(crate) fn reusable_version(
    applied: Option<ConfigVersion>,
    latest: Option<ConfigVersion>,
    fingerprint: &str,
) -> Option<ConfigVersion> {
    applied
        .filter(|v| v.fingerprint == fingerprint)
        .or_else(|| latest.filter(|v| v.fingerprint == fingerprint && v.status != VersionStatus::Failed))
}

/// Field changes applied by [`RecordStore::update_version_status`].
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub status: VersionStatus,
    pub error_message: Option<String>,
    pub applied_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Cheap round trip used by the readiness probe.
    async fn ping(&self) -> Result<(), StoreError>;

    // -- nodes -------------------------------------------------------------

    async fn get_node(&self, node_id: &str) -> Result<Option<NodeRecord>, StoreError>;

    /// Sets online/offline.  A node in maintenance keeps that status; only
    /// `last_seen_at` moves.
    async fn set_node_presence(
        &self,
        node_id: &str,
        status: NodeStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn record_agent_info(
        &self,
        node_id: &str,
        agent_version: &str,
        core: Option<&CoreInfo>,
    ) -> Result<(), StoreError>;

    async fn record_system_info(
        &self,
        node_id: &str,
        report: &StatusReport,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn append_traffic(
        &self,
        node_id: &str,
        report: &TrafficReport,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Enabled inbounds, outbounds, rules and clients for one node, in
    /// configured order.
    async fn load_node_config(&self, node_id: &str) -> Result<NodeConfigRecords, StoreError>;

    // -- config versions ---------------------------------------------------

    /// Inserts a `pending` row numbered one past the node's current maximum.
    async fn insert_version(&self, new: NewVersion) -> Result<ConfigVersion, StoreError>;

    /// Like [`insert_version`](Self::insert_version), but returns the
    /// [`reusable_version`] instead when one exists.  The check and the
    /// insert happen under the same per-node lock.
    async fn insert_version_unless_same(&self, new: NewVersion) -> Result<InsertOutcome, StoreError>;

    async fn get_version(&self, version_id: Uuid) -> Result<Option<ConfigVersion>, StoreError>;

    async fn latest_version(&self, node_id: &str) -> Result<Option<ConfigVersion>, StoreError>;

    async fn latest_version_with_status(
        &self,
        node_id: &str,
        status: VersionStatus,
    ) -> Result<Option<ConfigVersion>, StoreError>;

    /// Newest first.
    async fn list_versions(
        &self,
        node_id: &str,
        limit: i64,
    ) -> Result<Vec<ConfigVersion>, StoreError>;

    /// Returns the updated row, or `None` if it does not exist.
    async fn update_version_status(
        &self,
        version_id: Uuid,
        change: StatusChange,
    ) -> Result<Option<ConfigVersion>, StoreError>;
}
