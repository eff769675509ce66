pub mod alerts;
pub mod auth;
pub mod bus;
pub mod clock;
pub mod config;
pub mod config_builder;
pub mod dashboard_events;
pub mod db;
pub mod engine;
pub mod http;
pub mod model;
pub mod registry;
pub mod repo;
pub mod rollback;
pub mod state;
pub mod traffic;
pub mod validator;
pub mod versions;
pub mod ws_agent;
pub mod ws_common;

#[cfg(test)]
mod test_support;

pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/v1/agents", get(ws_agent::ws_agent_handler))
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/api/v1/events", get(http::sse::dashboard_sse))
        .route(
            "/api/v1/nodes/:node_id/config",
            get(http::node_config::get_node_config),
        )
        .route(
            "/api/v1/nodes/:node_id/config-result",
            post(http::node_config::post_config_result),
        )
        .route(
            "/api/v1/admin/config/validate",
            post(http::admin::validate_config),
        )
        .route(
            "/api/v1/admin/nodes/:node_id/versions",
            get(http::admin::list_versions),
        )
        .route(
            "/api/v1/admin/nodes/:node_id/push",
            post(http::admin::push_node),
        )
        .route(
            "/api/v1/admin/versions/compare",
            get(http::admin::compare_versions),
        )
        .route(
            "/api/v1/admin/versions/:version_id/rollback",
            post(http::admin::rollback_version),
        )
        .route("/api/v1/admin/events", post(http::admin::publish_event))
        .route(
            "/api/v1/admin/connections",
            get(http::admin::list_connections),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

mod health {
    use crate::http::response::service_unavailable;
    use crate::state::AppState;
    use axum::extract::State;
    use axum::response::{IntoResponse, Response};
    use tracing::warn;

    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }

    pub async fn readyz(State(state): State<AppState>) -> Response {
        match state.store.ping().await {
            Ok(()) => "ok".into_response(),
            Err(e) => {
                warn!(error = %e, "readiness check failed");
                service_unavailable("store unreachable")
            }
        }
    }
}
