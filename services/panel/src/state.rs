use crate::alerts::{AlertSink, TracingAlertSink};
use crate::bus::EventBus;
use crate::clock::{Clock, SystemClock};
use crate::config::PanelConfig;
use crate::dashboard_events::{DashboardEvent, DashboardSender};
use crate::engine::PushEngine;
use crate::registry::ConnectionRegistry;
use crate::repo::RecordStore;
use crate::traffic::{StoreTrafficSink, TrafficSink};
use crate::versions::VersionStore;
use panel_protocol::ReportIntervals;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Per-session protocol knobs.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub register_timeout: Duration,
    pub intervals: ReportIntervals,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            register_timeout: Duration::from_secs(10),
            intervals: ReportIntervals {
                status_secs: 60,
                traffic_secs: 60,
                alive_secs: 30,
            },
        }
    }
}

impl From<&PanelConfig> for SessionSettings {
    fn from(config: &PanelConfig) -> Self {
        Self {
            register_timeout: config.register_timeout,
            intervals: ReportIntervals {
                status_secs: config.status_interval.as_secs(),
                traffic_secs: config.traffic_interval.as_secs(),
                alive_secs: config.alive_interval.as_secs(),
            },
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub registry: ConnectionRegistry,
    pub versions: VersionStore,
    pub engine: PushEngine,
    pub bus: Arc<dyn EventBus>,
    pub traffic: Arc<dyn TrafficSink>,
    pub alerts: Arc<dyn AlertSink>,
    pub clock: Arc<dyn Clock>,
    pub dashboard_tx: DashboardSender,
    pub settings: SessionSettings,
}

impl AppState {
    pub fn new(
        store: Arc<dyn RecordStore>,
        bus: Arc<dyn EventBus>,
        settings: SessionSettings,
    ) -> Self {
        Self::with_parts(
            store,
            bus,
            Arc::new(SystemClock),
            Arc::new(TracingAlertSink),
            settings,
        )
    }

    pub fn with_parts(
        store: Arc<dyn RecordStore>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        alerts: Arc<dyn AlertSink>,
        settings: SessionSettings,
    ) -> Self {
        let (dashboard_tx, _) = broadcast::channel::<DashboardEvent>(256);
        let registry = ConnectionRegistry::new(clock.clone());
        let versions = VersionStore::new(store.clone(), clock.clone());
        let engine = PushEngine::new(
            registry.clone(),
            versions.clone(),
            alerts.clone(),
            dashboard_tx.clone(),
        );
        let traffic = Arc::new(StoreTrafficSink::new(store.clone(), clock.clone()));
        Self {
            store,
            registry,
            versions,
            engine,
            bus,
            traffic,
            alerts,
            clock,
            dashboard_tx,
            settings,
        }
    }
}
