use crate::clock::Clock;
use crate::repo::{RecordStore, StoreError};
use async_trait::async_trait;
use panel_protocol::TrafficReport;
use std::sync::Arc;

/// Receives traffic batches reported by agents.
#[async_trait]
pub trait TrafficSink: Send + Sync {
    async fn record(&self, node_id: &str, report: &TrafficReport) -> Result<(), StoreError>;
}

/// Appends each batch to the store's per-node traffic buffer.
pub struct StoreTrafficSink {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
}

impl StoreTrafficSink {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait]
impl TrafficSink for StoreTrafficSink {
    async fn record(&self, node_id: &str, report: &TrafficReport) -> Result<(), StoreError> {
        if report.users.is_empty() && report.inbounds.is_empty() && report.outbounds.is_empty() {
            return Ok(());
        }
        self.store
            .append_traffic(node_id, report, self.clock.now())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::memory::MemoryStore;
    use crate::test_support::clock;
    use panel_protocol::UserTraffic;

    #[tokio::test]
    async fn empty_batches_are_dropped() {
        let store = Arc::new(MemoryStore::new());
        let sink = StoreTrafficSink::new(store.clone(), clock());

        sink.record("n1", &TrafficReport::default()).await.unwrap();
        assert!(store.traffic_rows().is_empty());

        let report = TrafficReport {
            users: vec![UserTraffic {
                email: "a@x".to_owned(),
                upload: 10,
                download: 20,
            }],
            ..Default::default()
        };
        sink.record("n1", &report).await.unwrap();
        assert_eq!(store.traffic_rows().len(), 1);
    }
}
