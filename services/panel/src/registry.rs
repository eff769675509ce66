//! Live agent connections held by this replica.
//!
//! All operations are synchronous and do no I/O.  Each entry carries a
//! session id so a superseded stream can never remove its replacement.

use crate::clock::Clock;
use chrono::{DateTime, SecondsFormat, Utc};
use panel_protocol::{ConnectionInfo, WsMessage};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// The writable side of one agent stream.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub session_id: Uuid,
    pub outbound: mpsc::Sender<WsMessage>,
    close: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn new(outbound: mpsc::Sender<WsMessage>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            outbound,
            close: Arc::new(Notify::new()),
        }
    }

    /// Asks the owning handler to close the stream.
    pub fn close(&self) {
        self.close.notify_one();
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        self.close.notified().await;
    }
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub node_id: String,
    pub tenant_id: String,
    pub handle: ConnectionHandle,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl Connection {
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            node_id: self.node_id.clone(),
            tenant_id: self.tenant_id.clone(),
            session_id: self.handle.session_id,
            connected_at: self.connected_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            last_heartbeat: self
                .last_heartbeat
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[derive(Clone)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<String, Connection>>>,
    clock: Arc<dyn Clock>,
}

impl ConnectionRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Inserts (or replaces) the entry for `node_id`.  A replaced entry is
    /// returned so the caller can close its stream.
    pub fn register(
        &self,
        node_id: &str,
        tenant_id: &str,
        handle: ConnectionHandle,
    ) -> Option<Connection> {
        let now = self.clock.now();
        let conn = Connection {
            node_id: node_id.to_owned(),
            tenant_id: tenant_id.to_owned(),
            handle,
            connected_at: now,
            last_heartbeat: now,
        };
        self.connections.write().insert(node_id.to_owned(), conn)
    }

    /// Refreshes the heartbeat.  Returns `false` if the node is not present.
    pub fn touch(&self, node_id: &str) -> bool {
        let now = self.clock.now();
        match self.connections.write().get_mut(node_id) {
            Some(conn) => {
                conn.last_heartbeat = now;
                true
            }
            None => false,
        }
    }

    /// Unconditional removal, whichever session holds the entry.
    pub fn remove(&self, node_id: &str) -> Option<Connection> {
        self.connections.write().remove(node_id)
    }

    /// Removes the entry only if it still belongs to `session_id`.
    pub fn release(&self, node_id: &str, session_id: Uuid) -> bool {
        let mut map = self.connections.write();
        match map.get(node_id) {
            Some(conn) if conn.handle.session_id == session_id => {
                map.remove(node_id);
                true
            }
            _ => false,
        }
    }

    /// Closes and removes every entry whose heartbeat is strictly older than
    /// `timeout`.  Returns the removed node ids.
    pub fn sweep_stale(&self, timeout: Duration) -> Vec<String> {
        let Ok(timeout) = chrono::Duration::from_std(timeout) else {
            return Vec::new();
        };
        let now = self.clock.now();
        let mut stale = Vec::new();
        self.connections.write().retain(|node_id, conn| {
            if now - conn.last_heartbeat > timeout {
                conn.handle.close();
                stale.push(node_id.clone());
                false
            } else {
                true
            }
        });
        stale.sort();
        stale
    }

    pub fn is_connected(&self, node_id: &str) -> bool {
        self.connections.read().contains_key(node_id)
    }

    pub fn get(&self, node_id: &str) -> Option<Connection> {
        self.connections.read().get(node_id).cloned()
    }

    pub fn list_by_tenant(&self, tenant_id: &str) -> Vec<ConnectionInfo> {
        let mut out: Vec<ConnectionInfo> = self
            .connections
            .read()
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .map(Connection::info)
            .collect();
        out.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        out
    }

    pub fn list_all(&self) -> Vec<ConnectionInfo> {
        let mut out: Vec<ConnectionInfo> = self
            .connections
            .read()
            .values()
            .map(Connection::info)
            .collect();
        out.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        out
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs [`ConnectionRegistry::sweep_stale`] every `interval`.
pub fn spawn_stale_sweeper(
    registry: ConnectionRegistry,
    interval: Duration,
    timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = registry.sweep_stale(timeout);
            if !removed.is_empty() {
                warn!(count = removed.len(), nodes = ?removed, "closed stale agent connections");
            }
        }
    })
}

/// Logs a superseded registration and closes its stream.
pub fn close_superseded(previous: Option<Connection>) {
    if let Some(old) = previous {
        info!(
            node_id = %old.node_id,
            session_id = %old.handle.session_id,
            "registration superseded by a newer session"
        );
        old.handle.close();
    }
}
