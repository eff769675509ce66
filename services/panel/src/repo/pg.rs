use super::{reusable_version, InsertOutcome, RecordStore, StatusChange, StoreError};
use crate::model::{
    ChangeMeta, ClientRecord, ConfigVersion, InboundRecord, NewVersion, NodeConfigRecords,
    NodeRecord, NodeStatus, OutboundRecord, RoutingRuleRecord, VersionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use panel_protocol::{CoreInfo, StatusReport, TrafficReport};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

macro_rules! version_columns {
    () => {
        "version_id, tenant_id, node_id, version, payload, fingerprint, \
         status, error_message, change_type, changed_by, reason, created_at, applied_at"
    };
}

/// Postgres-backed [`RecordStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Numbers and inserts a row while holding the node's row lock.  With
    /// `dedupe`, an equivalent existing row is looked up under the same lock
    /// and returned instead, so replicas racing on one change agree on a row.
    async fn insert_locked(&self, new: NewVersion, dedupe: bool) -> Result<InsertOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let locked = sqlx::query("SELECT node_id FROM nodes WHERE node_id = $1 FOR UPDATE")
            .bind(&new.node_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(StoreError::NodeNotFound(new.node_id));
        }

        if dedupe {
            let sql = concat!(
                "SELECT ",
                version_columns!(),
                " FROM config_versions WHERE node_id = $1 AND status = 'applied' \
                 ORDER BY version DESC LIMIT 1"
            );
            let applied = sqlx::query(sql)
                .bind(&new.node_id)
                .fetch_optional(&mut *tx)
                .await?;
            let sql = concat!(
                "SELECT ",
                version_columns!(),
                " FROM config_versions WHERE node_id = $1 ORDER BY version DESC LIMIT 1"
            );
            let latest = sqlx::query(sql)
                .bind(&new.node_id)
                .fetch_optional(&mut *tx)
                .await?;
            let applied = applied.as_ref().map(version_from_row).transpose()?;
            let latest = latest.as_ref().map(version_from_row).transpose()?;
            if let Some(version) = reusable_version(applied, latest, &new.fingerprint) {
                tx.commit().await?;
                return Ok(InsertOutcome {
                    version,
                    reused: true,
                });
            }
        }

        let sql = concat!(
            r#"INSERT INTO config_versions
                 (version_id, tenant_id, node_id, version, payload, fingerprint, status,
                  change_type, changed_by, reason, created_at)
               SELECT $1, $2, $3, COALESCE(MAX(version), 0) + 1, $4, $5, 'pending', $6, $7, $8, $9
               FROM config_versions WHERE node_id = $3
               RETURNING "#,
            version_columns!()
        );
        let row = sqlx::query(sql)
            .bind(new.version_id)
            .bind(&new.tenant_id)
            .bind(&new.node_id)
            .bind(&new.payload)
            .bind(&new.fingerprint)
            .bind(new.change.change_type.as_str())
            .bind(&new.change.changed_by)
            .bind(&new.change.reason)
            .bind(new.created_at)
            .fetch_one(&mut *tx)
            .await?;
        let version = version_from_row(&row)?;
        tx.commit().await?;
        Ok(InsertOutcome {
            version,
            reused: false,
        })
    }
}

fn corrupt(column: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{column}: {detail}"))
}

fn node_from_row(row: &PgRow) -> Result<NodeRecord, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(NodeRecord {
        node_id: row.try_get("node_id")?,
        tenant_id: row.try_get("tenant_id")?,
        token_hash: row.try_get("token_hash")?,
        status: status.parse().map_err(|e| corrupt("nodes.status", e))?,
        last_seen_at: row.try_get("last_seen_at")?,
    })
}

fn version_from_row(row: &PgRow) -> Result<ConfigVersion, StoreError> {
    let status: String = row.try_get("status")?;
    let change_type: String = row.try_get("change_type")?;
    Ok(ConfigVersion {
        version_id: row.try_get("version_id")?,
        tenant_id: row.try_get("tenant_id")?,
        node_id: row.try_get("node_id")?,
        version: row.try_get("version")?,
        payload: row.try_get("payload")?,
        fingerprint: row.try_get("fingerprint")?,
        status: status
            .parse()
            .map_err(|e| corrupt("config_versions.status", e))?,
        error_message: row.try_get("error_message")?,
        change: ChangeMeta {
            change_type: change_type
                .parse()
                .map_err(|e| corrupt("config_versions.change_type", e))?,
            changed_by: row.try_get("changed_by")?,
            reason: row.try_get("reason")?,
        },
        created_at: row.try_get("created_at")?,
        applied_at: row.try_get("applied_at")?,
    })
}

fn versions_from_rows(rows: &[PgRow]) -> Result<Vec<ConfigVersion>, StoreError> {
    rows.iter().map(version_from_row).collect()
}

fn clamp_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

#[async_trait]
impl RecordStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<NodeRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT node_id, tenant_id, token_hash, status, last_seen_at FROM nodes WHERE node_id = $1",
        )
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(node_from_row).transpose()
    }

    async fn set_node_presence(
        &self,
        node_id: &str,
        status: NodeStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"UPDATE nodes
               SET status = CASE WHEN status = 'maintenance' THEN status ELSE $2 END,
                   last_seen_at = $3
               WHERE node_id = $1"#,
        )
        .bind(node_id)
        .bind(status.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NodeNotFound(node_id.to_owned()));
        }
        Ok(())
    }

    async fn record_agent_info(
        &self,
        node_id: &str,
        agent_version: &str,
        core: Option<&CoreInfo>,
    ) -> Result<(), StoreError> {
        let core = core
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| corrupt("nodes.core_info", e))?;
        sqlx::query("UPDATE nodes SET agent_version = $2, core_info = $3 WHERE node_id = $1")
            .bind(node_id)
            .bind(agent_version)
            .bind(core)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_system_info(
        &self,
        node_id: &str,
        report: &StatusReport,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let info = serde_json::to_value(report).map_err(|e| corrupt("nodes.system_info", e))?;
        sqlx::query("UPDATE nodes SET system_info = $2, system_info_at = $3 WHERE node_id = $1")
            .bind(node_id)
            .bind(info)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_traffic(
        &self,
        node_id: &str,
        report: &TrafficReport,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let entries = report
            .users
            .iter()
            .map(|u| ("user", u.email.as_str(), u.upload, u.download))
            .chain(report.inbounds.iter().map(|t| ("inbound", t.tag.as_str(), t.upload, t.download)))
            .chain(report.outbounds.iter().map(|t| ("outbound", t.tag.as_str(), t.upload, t.download)));

        let mut tx = self.pool.begin().await?;
        for (kind, name, upload, download) in entries {
            sqlx::query(
                r#"INSERT INTO node_traffic (node_id, kind, name, upload, download, recorded_at)
                   VALUES ($1, $2, $3, $4, $5, $6)"#,
            )
            .bind(node_id)
            .bind(kind)
            .bind(name)
            .bind(clamp_i64(upload))
            .bind(clamp_i64(download))
            .bind(at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_node_config(&self, node_id: &str) -> Result<NodeConfigRecords, StoreError> {
        let exists = sqlx::query("SELECT 1 FROM nodes WHERE node_id = $1")
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(StoreError::NodeNotFound(node_id.to_owned()));
        }

        let inbound_rows = sqlx::query(
            r#"SELECT tag, protocol, listen, port, settings, stream_settings, sniffing
               FROM inbounds WHERE node_id = $1 AND enabled
               ORDER BY position, id"#,
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await?;
        let inbounds = inbound_rows
            .iter()
            .map(|r| {
                Ok(InboundRecord {
                    tag: r.try_get("tag")?,
                    protocol: r.try_get("protocol")?,
                    listen: r.try_get("listen")?,
                    port: r.try_get("port")?,
                    settings: r.try_get("settings")?,
                    stream_settings: r.try_get("stream_settings")?,
                    sniffing: r.try_get("sniffing")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        let outbound_rows = sqlx::query(
            r#"SELECT tag, protocol, settings, stream_settings
               FROM outbounds WHERE node_id = $1 AND enabled
               ORDER BY position, id"#,
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await?;
        let outbounds = outbound_rows
            .iter()
            .map(|r| {
                Ok(OutboundRecord {
                    tag: r.try_get("tag")?,
                    protocol: r.try_get("protocol")?,
                    settings: r.try_get("settings")?,
                    stream_settings: r.try_get("stream_settings")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        let rule_rows = sqlx::query(
            "SELECT rule FROM routing_rules WHERE node_id = $1 AND enabled ORDER BY position, id",
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await?;
        let mut routing_rules = Vec::with_capacity(rule_rows.len());
        for row in &rule_rows {
            let raw: serde_json::Value = row.try_get("rule")?;
            let rule: RoutingRuleRecord =
                serde_json::from_value(raw).map_err(|e| corrupt("routing_rules.rule", e))?;
            routing_rules.push(rule);
        }

        let client_rows = sqlx::query(
            r#"SELECT inbound_tag, email, credential, flow
               FROM clients WHERE node_id = $1 AND enabled
               ORDER BY id"#,
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await?;
        let clients = client_rows
            .iter()
            .map(|r| {
                Ok(ClientRecord {
                    inbound_tag: r.try_get("inbound_tag")?,
                    email: r.try_get("email")?,
                    credential: r.try_get("credential")?,
                    flow: r.try_get("flow")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok(NodeConfigRecords {
            inbounds,
            outbounds,
            routing_rules,
            clients,
        })
    }

    async fn insert_version(&self, new: NewVersion) -> Result<ConfigVersion, StoreError> {
        Ok(self.insert_locked(new, false).await?.version)
    }

    async fn insert_version_unless_same(&self, new: NewVersion) -> Result<InsertOutcome, StoreError> {
        self.insert_locked(new, true).await
    }

    async fn get_version(&self, version_id: Uuid) -> Result<Option<ConfigVersion>, StoreError> {
        let sql = concat!(
            "SELECT ",
            version_columns!(),
            " FROM config_versions WHERE version_id = $1"
        );
        let row = sqlx::query(sql)
            .bind(version_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn latest_version(&self, node_id: &str) -> Result<Option<ConfigVersion>, StoreError> {
        let sql = concat!(
            "SELECT ",
            version_columns!(),
            " FROM config_versions WHERE node_id = $1 ORDER BY version DESC LIMIT 1"
        );
        let row = sqlx::query(sql)
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn latest_version_with_status(
        &self,
        node_id: &str,
        status: VersionStatus,
    ) -> Result<Option<ConfigVersion>, StoreError> {
        let sql = concat!(
            "SELECT ",
            version_columns!(),
            " FROM config_versions WHERE node_id = $1 AND status = $2 \
             ORDER BY version DESC LIMIT 1"
        );
        let row = sqlx::query(sql)
            .bind(node_id)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn list_versions(
        &self,
        node_id: &str,
        limit: i64,
    ) -> Result<Vec<ConfigVersion>, StoreError> {
        let sql = concat!(
            "SELECT ",
            version_columns!(),
            " FROM config_versions WHERE node_id = $1 ORDER BY version DESC LIMIT $2"
        );
        let rows = sqlx::query(sql)
            .bind(node_id)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        versions_from_rows(&rows)
    }

    async fn update_version_status(
        &self,
        version_id: Uuid,
        change: StatusChange,
    ) -> Result<Option<ConfigVersion>, StoreError> {
        let sql = concat!(
            r#"UPDATE config_versions
               SET status = $2,
                   error_message = COALESCE($3, error_message),
                   applied_at = COALESCE($4, applied_at)
               WHERE version_id = $1
               RETURNING "#,
            version_columns!()
        );
        let row = sqlx::query(sql)
            .bind(version_id)
            .bind(change.status.as_str())
            .bind(&change.error_message)
            .bind(change.applied_at)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(version_from_row).transpose()
    }
}
