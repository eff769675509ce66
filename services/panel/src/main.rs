use panel::bus::{spawn_event_dispatcher, EventBus, LocalEventBus, PgEventBus};
use panel::config::{EventBusKind, PanelConfig};
use panel::db;
use panel::registry::spawn_stale_sweeper;
use panel::repo::pg::PgStore;
use panel::state::{AppState, SessionSettings};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = PanelConfig::from_env().expect("invalid configuration");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log_level))
        .init();

    info!("connecting to database...");
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("failed to connect to Postgres");
    db::run_migrations(&pool)
        .await
        .expect("failed to run database migrations");
    info!("migrations applied");

    let bus: Arc<dyn EventBus> = match config.event_bus {
        EventBusKind::Postgres => Arc::new(PgEventBus::new(pool.clone())),
        EventBusKind::Local => Arc::new(LocalEventBus::default()),
    };
    let store = Arc::new(PgStore::new(pool));
    let state = AppState::new(store, bus.clone(), SessionSettings::from(&config));

    spawn_stale_sweeper(
        state.registry.clone(),
        config.sweep_interval,
        config.heartbeat_timeout,
    );
    spawn_event_dispatcher(bus.as_ref(), state.engine.clone())
        .await
        .expect("failed to subscribe to event bus");
    info!(event_bus = ?config.event_bus, "event dispatcher started");

    let router = panel::build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("failed to bind");
    info!(addr = %config.bind_addr, "panel listening");
    axum::serve(listener, router).await.expect("server error");
}
