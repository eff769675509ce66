use super::{reusable_version, InsertOutcome, RecordStore, StatusChange, StoreError};
use crate::auth::hash_token;
use crate::model::{
    ClientRecord, ConfigVersion, InboundRecord, NewVersion, NodeConfigRecords, NodeRecord,
    NodeStatus, OutboundRecord, RoutingRuleRecord, VersionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use panel_protocol::{CoreInfo, StatusReport, TrafficReport};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// One traffic sample as the memory store keeps it.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficRow {
    pub node_id: String,
    pub kind: &'static str,
    pub name: String,
    pub upload: u64,
    pub download: u64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<String, NodeRecord>,
    agent_info: HashMap<String, (String, Option<CoreInfo>)>,
    system_info: HashMap<String, (StatusReport, DateTime<Utc>)>,
    configs: HashMap<String, NodeConfigRecords>,
    versions: Vec<ConfigVersion>,
    traffic: Vec<TrafficRow>,
}

impl Inner {
    fn latest(&self, node_id: &str, status: Option<VersionStatus>) -> Option<ConfigVersion> {
        self.versions
            .iter()
            .filter(|v| v.node_id == node_id && status.map_or(true, |s| v.status == s))
            .max_by_key(|v| v.version)
            .cloned()
    }

    fn insert_version(&mut self, new: NewVersion) -> Result<ConfigVersion, StoreError> {
        if !self.nodes.contains_key(&new.node_id) {
            return Err(StoreError::NodeNotFound(new.node_id));
        }
        let next = self
            .versions
            .iter()
            .filter(|v| v.node_id == new.node_id)
            .map(|v| v.version)
            .max()
            .unwrap_or(0)
            + 1;
        let row = ConfigVersion {
            version_id: new.version_id,
            tenant_id: new.tenant_id,
            node_id: new.node_id,
            version: next,
            payload: new.payload,
            fingerprint: new.fingerprint,
            status: VersionStatus::Pending,
            error_message: None,
            change: new.change,
            created_at: new.created_at,
            applied_at: None,
        };
        self.versions.push(row.clone());
        Ok(row)
    }
}

/// In-process [`RecordStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_version_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, node_id: &str, tenant_id: &str, token: &str, status: NodeStatus) {
        self.inner.lock().nodes.insert(
            node_id.to_owned(),
            NodeRecord {
                node_id: node_id.to_owned(),
                tenant_id: tenant_id.to_owned(),
                token_hash: hash_token(token),
                status,
                last_seen_at: None,
            },
        );
    }

    pub fn set_node_status(&self, node_id: &str, status: NodeStatus) {
        if let Some(node) = self.inner.lock().nodes.get_mut(node_id) {
            node.status = status;
        }
    }

    pub fn node(&self, node_id: &str) -> Option<NodeRecord> {
        self.inner.lock().nodes.get(node_id).cloned()
    }

    pub fn add_inbound(&self, node_id: &str, inbound: InboundRecord) {
        self.config_mut(node_id, |c| c.inbounds.push(inbound));
    }

    pub fn add_outbound(&self, node_id: &str, outbound: OutboundRecord) {
        self.config_mut(node_id, |c| c.outbounds.push(outbound));
    }

    pub fn add_routing_rule(&self, node_id: &str, rule: RoutingRuleRecord) {
        self.config_mut(node_id, |c| c.routing_rules.push(rule));
    }

    pub fn add_client(&self, node_id: &str, client: ClientRecord) {
        self.config_mut(node_id, |c| c.clients.push(client));
    }

    /// Replaces the node's desired records wholesale.
    pub fn set_node_config(&self, node_id: &str, records: NodeConfigRecords) {
        self.inner.lock().configs.insert(node_id.to_owned(), records);
    }

    pub fn node_config(&self, node_id: &str) -> NodeConfigRecords {
        self.inner
            .lock()
            .configs
            .get(node_id)
            .cloned()
            .unwrap_or_default()
    }

    fn config_mut(&self, node_id: &str, f: impl FnOnce(&mut NodeConfigRecords)) {
        let mut inner = self.inner.lock();
        f(inner.configs.entry(node_id.to_owned()).or_default());
    }

    /// All versions for `node_id`, oldest first.
    pub fn versions(&self, node_id: &str) -> Vec<ConfigVersion> {
        self.inner
            .lock()
            .versions
            .iter()
            .filter(|v| v.node_id == node_id)
            .cloned()
            .collect()
    }

    pub fn traffic_rows(&self) -> Vec<TrafficRow> {
        self.inner.lock().traffic.clone()
    }

    pub fn system_info(&self, node_id: &str) -> Option<StatusReport> {
        self.inner
            .lock()
            .system_info
            .get(node_id)
            .map(|(report, _)| report.clone())
    }

    pub fn agent_version(&self, node_id: &str) -> Option<String> {
        self.inner
            .lock()
            .agent_info
            .get(node_id)
            .map(|(version, _)| version.clone())
    }

    /// Makes version inserts and status updates fail until reset.
    pub fn set_fail_version_writes(&self, fail: bool) {
        self.fail_version_writes.store(fail, Ordering::SeqCst);
    }

    fn check_version_writes(&self) -> Result<(), StoreError> {
        if self.fail_version_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("version writes disabled".to_owned()));
        }
        Ok(())
    }
}

fn newest_first(a: &ConfigVersion, b: &ConfigVersion) -> std::cmp::Ordering {
    b.version.cmp(&a.version)
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<NodeRecord>, StoreError> {
        Ok(self.node(node_id))
    }

    async fn set_node_presence(
        &self,
        node_id: &str,
        status: NodeStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let node = inner
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| StoreError::NodeNotFound(node_id.to_owned()))?;
        if node.status != NodeStatus::Maintenance {
            node.status = status;
        }
        node.last_seen_at = Some(at);
        Ok(())
    }

    async fn record_agent_info(
        &self,
        node_id: &str,
        agent_version: &str,
        core: Option<&CoreInfo>,
    ) -> Result<(), StoreError> {
        self.inner.lock().agent_info.insert(
            node_id.to_owned(),
            (agent_version.to_owned(), core.cloned()),
        );
        Ok(())
    }

    async fn record_system_info(
        &self,
        node_id: &str,
        report: &StatusReport,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner
            .lock()
            .system_info
            .insert(node_id.to_owned(), (report.clone(), at));
        Ok(())
    }

    async fn append_traffic(
        &self,
        node_id: &str,
        report: &TrafficReport,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let row = |kind, name: &str, upload, download| TrafficRow {
            node_id: node_id.to_owned(),
            kind,
            name: name.to_owned(),
            upload,
            download,
            recorded_at: at,
        };
        let mut rows = Vec::new();
        rows.extend(report.users.iter().map(|u| row("user", &u.email, u.upload, u.download)));
        rows.extend(report.inbounds.iter().map(|t| row("inbound", &t.tag, t.upload, t.download)));
        rows.extend(report.outbounds.iter().map(|t| row("outbound", &t.tag, t.upload, t.download)));
        inner.traffic.extend(rows);
        Ok(())
    }

    async fn load_node_config(&self, node_id: &str) -> Result<NodeConfigRecords, StoreError> {
        let inner = self.inner.lock();
        if !inner.nodes.contains_key(node_id) {
            return Err(StoreError::NodeNotFound(node_id.to_owned()));
        }
        Ok(inner.configs.get(node_id).cloned().unwrap_or_default())
    }

    async fn insert_version(&self, new: NewVersion) -> Result<ConfigVersion, StoreError> {
        self.check_version_writes()?;
        self.inner.lock().insert_version(new)
    }

    async fn insert_version_unless_same(&self, new: NewVersion) -> Result<InsertOutcome, StoreError> {
        let mut inner = self.inner.lock();
        let applied = inner.latest(&new.node_id, Some(VersionStatus::Applied));
        let latest = inner.latest(&new.node_id, None);
        if let Some(version) = reusable_version(applied, latest, &new.fingerprint) {
            return Ok(InsertOutcome {
                version,
                reused: true,
            });
        }
        self.check_version_writes()?;
        Ok(InsertOutcome {
            version: inner.insert_version(new)?,
            reused: false,
        })
    }

    async fn get_version(&self, version_id: Uuid) -> Result<Option<ConfigVersion>, StoreError> {
        Ok(self
            .inner
            .lock()
            .versions
            .iter()
            .find(|v| v.version_id == version_id)
            .cloned())
    }

    async fn latest_version(&self, node_id: &str) -> Result<Option<ConfigVersion>, StoreError> {
        Ok(self.inner.lock().latest(node_id, None))
    }

    async fn latest_version_with_status(
        &self,
        node_id: &str,
        status: VersionStatus,
    ) -> Result<Option<ConfigVersion>, StoreError> {
        Ok(self.inner.lock().latest(node_id, Some(status)))
    }

    async fn list_versions(
        &self,
        node_id: &str,
        limit: i64,
    ) -> Result<Vec<ConfigVersion>, StoreError> {
        let mut rows = self.versions(node_id);
        rows.sort_by(newest_first);
        rows.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(rows)
    }

    async fn update_version_status(
        &self,
        version_id: Uuid,
        change: StatusChange,
    ) -> Result<Option<ConfigVersion>, StoreError> {
        self.check_version_writes()?;
        let mut inner = self.inner.lock();
        let Some(row) = inner.versions.iter_mut().find(|v| v.version_id == version_id) else {
            return Ok(None);
        };
        row.status = change.status;
        if change.error_message.is_some() {
            row.error_message = change.error_message;
        }
        if change.applied_at.is_some() {
            row.applied_at = change.applied_at;
        }
        Ok(Some(row.clone()))
    }
}
