//! Fan-out of mutations to every replica.
//!
//! Any replica publishes; every replica subscribes and acts only on the
//! nodes whose connection it holds.

use crate::engine::PushEngine;
use crate::model::ChangeMeta;
use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use panel_protocol::{Kick, RateLimit, UserEntry, UsersUpdate};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const CONFIG_CHANGED: &str = "config_changed";
pub const USERS_CHANGED: &str = "users_changed";
pub const KICK_USER: &str = "kick_user";
pub const RATE_LIMIT_CHANGED: &str = "rate_limit_changed";
pub const CONFIG_ROLLBACK: &str = "config_rollback";

pub const CHANNELS: [&str; 5] = [
    CONFIG_CHANGED,
    USERS_CHANGED,
    KICK_USER,
    RATE_LIMIT_CHANGED,
    CONFIG_ROLLBACK,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Node(String),
    Tenant(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PanelEvent {
    ConfigChanged {
        target: Target,
    },
    UsersChanged {
        target: Target,
        #[serde(default)]
        added: Vec<UserEntry>,
        #[serde(default)]
        removed: Vec<String>,
    },
    KickUser {
        node_id: String,
        emails: Vec<String>,
        reason: String,
    },
    RateLimitChanged {
        node_id: String,
        email: String,
        upload_limit: Option<u64>,
        download_limit: Option<u64>,
    },
    ConfigRollback {
        node_id: String,
        version_id: Uuid,
        reason: String,
    },
}

impl PanelEvent {
    pub fn channel(&self) -> &'static str {
        match self {
            Self::ConfigChanged { .. } => CONFIG_CHANGED,
            Self::UsersChanged { .. } => USERS_CHANGED,
            Self::KickUser { .. } => KICK_USER,
            Self::RateLimitChanged { .. } => RATE_LIMIT_CHANGED,
            Self::ConfigRollback { .. } => CONFIG_ROLLBACK,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: &PanelEvent) -> Result<(), BusError>;

    /// A stream of every event published from now on, by any replica.
    async fn subscribe(&self) -> Result<BoxStream<'static, PanelEvent>, BusError>;
}

// ---------------------------------------------------------------------------
// In-process bus
// ---------------------------------------------------------------------------

/// Single-replica bus over a tokio broadcast channel.
#[derive(Clone)]
pub struct LocalEventBus {
    tx: broadcast::Sender<PanelEvent>,
}

impl LocalEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for LocalEventBus {
    async fn publish(&self, event: &PanelEvent) -> Result<(), BusError> {
        // No subscribers is not an error.
        let _ = self.tx.send(event.clone());
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, PanelEvent>, BusError> {
        let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(|item| async move {
            match item {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "event subscriber lagged; events dropped");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}

// ---------------------------------------------------------------------------
// Postgres LISTEN/NOTIFY bus
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgEventBus {
    pool: PgPool,
}

impl PgEventBus {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventBus for PgEventBus {
    async fn publish(&self, event: &PanelEvent) -> Result<(), BusError> {
        let payload = serde_json::to_string(event)?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(event.channel())
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, PanelEvent>, BusError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen_all(CHANNELS).await?;
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(async move {
            loop {
                let notification = match listener.recv().await {
                    Ok(n) => n,
                    Err(e) => {
                        error!(error = %e, "event listener failed");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        continue;
                    }
                };
                match serde_json::from_str::<PanelEvent>(notification.payload()) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            debug!("event subscriber dropped; stopping listener");
                            return;
                        }
                    }
                    Err(e) => warn!(
                        channel = notification.channel(),
                        error = %e,
                        "ignoring undecodable event"
                    ),
                }
            }
        });
        Ok(ReceiverStream::new(rx).boxed())
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

fn held_nodes(engine: &PushEngine, target: &Target) -> Vec<String> {
    match target {
        Target::Node(node_id) if engine.registry().is_connected(node_id) => vec![node_id.clone()],
        Target::Node(_) => Vec::new(),
        Target::Tenant(tenant_id) => engine
            .registry()
            .list_by_tenant(tenant_id)
            .into_iter()
            .map(|c| c.node_id)
            .collect(),
    }
}

/// Applies one event to the connections held here.  Returns the node ids
/// acted on.
pub async fn dispatch(engine: &PushEngine, event: PanelEvent) -> Vec<String> {
    match event {
        PanelEvent::ConfigChanged { target } => {
            let nodes = held_nodes(engine, &target);
            for node_id in &nodes {
                if let Err(e) = engine.push_config(node_id, ChangeMeta::update()).await {
                    warn!(node_id = %node_id, error = %e, "config push after change failed");
                }
            }
            nodes
        }
        PanelEvent::UsersChanged {
            target,
            added,
            removed,
        } => {
            let nodes = held_nodes(engine, &target);
            for node_id in &nodes {
                let update = UsersUpdate {
                    added: added.clone(),
                    removed: removed.clone(),
                };
                if let Err(e) = engine.push_users_update(node_id, update) {
                    warn!(node_id = %node_id, error = %e, "users update failed");
                }
            }
            nodes
        }
        PanelEvent::KickUser {
            node_id,
            emails,
            reason,
        } => {
            if !engine.registry().is_connected(&node_id) {
                return Vec::new();
            }
            if let Err(e) = engine.kick_users(&node_id, Kick { emails, reason }) {
                warn!(node_id = %node_id, error = %e, "kick failed");
            }
            vec![node_id]
        }
        PanelEvent::RateLimitChanged {
            node_id,
            email,
            upload_limit,
            download_limit,
        } => {
            if !engine.registry().is_connected(&node_id) {
                return Vec::new();
            }
            let limit = RateLimit {
                email,
                upload_limit,
                download_limit,
            };
            if let Err(e) = engine.update_rate_limit(&node_id, limit) {
                warn!(node_id = %node_id, error = %e, "rate limit update failed");
            }
            vec![node_id]
        }
        PanelEvent::ConfigRollback {
            node_id,
            version_id,
            reason,
        } => {
            if !engine.registry().is_connected(&node_id) {
                return Vec::new();
            }
            let version = match engine.versions().get_version(version_id).await {
                Ok(v) if v.node_id == node_id => v,
                Ok(_) => {
                    warn!(node_id = %node_id, version_id = %version_id, "rollback version belongs to another node");
                    return Vec::new();
                }
                Err(e) => {
                    warn!(node_id = %node_id, version_id = %version_id, error = %e, "rollback version lookup failed");
                    return Vec::new();
                }
            };
            info!(node_id = %node_id, version = version.version, reason = %reason, "pushing manual rollback");
            if let Err(e) = engine.push_version(&node_id, &version, true).await {
                warn!(node_id = %node_id, error = %e, "rollback push failed");
            }
            vec![node_id]
        }
    }
}

/// Subscribes to `bus` and dispatches every event in order.
pub async fn spawn_event_dispatcher(
    bus: &dyn EventBus,
    engine: PushEngine,
) -> Result<tokio::task::JoinHandle<()>, BusError> {
    let mut events = bus.subscribe().await?;
    Ok(tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let channel = event.channel();
            let nodes = dispatch(&engine, event).await;
            debug!(channel, nodes = ?nodes, "event dispatched");
        }
        warn!("event stream ended");
    }))
}
