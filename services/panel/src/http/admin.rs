use super::response::{bad_request, internal_error, not_found, HttpResult};
use crate::bus::{PanelEvent, Target};
use crate::model::ChangeMeta;
use crate::state::AppState;
use crate::validator::validate_value;
use crate::versions::VersionError;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

const DEFAULT_HISTORY_LIMIT: i64 = 20;
const MAX_HISTORY_LIMIT: i64 = 200;

fn version_error(e: VersionError) -> Response {
    match e {
        VersionError::NotFound(id) => not_found(format!("version not found: {id}")),
        other => internal_error(other),
    }
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> HttpResult<T> {
    body.map(|Json(v)| v).map_err(|e| bad_request(e.body_text()))
}

async fn publish(state: &AppState, event: PanelEvent) -> HttpResult {
    let channel = event.channel();
    state.bus.publish(&event).await.map_err(internal_error)?;
    info!(channel, "admin event published");
    Ok(())
}

/// Validates a candidate engine config without storing anything.
pub async fn validate_config(
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Response {
    let candidate = match json_body(body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    Json(validate_value(&candidate)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

pub async fn list_versions(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    match state.versions.get_version_history(&node_id, limit).await {
        Ok(versions) => Json(serde_json::json!({ "versions": versions })).into_response(),
        Err(e) => version_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    pub v1: Uuid,
    pub v2: Uuid,
}

pub async fn compare_versions(
    State(state): State<AppState>,
    Query(query): Query<CompareQuery>,
) -> Response {
    match state.versions.compare_versions(query.v1, query.v2).await {
        Ok(cmp) => Json(cmp).into_response(),
        Err(e) => version_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub tenant_id: String,
    pub reason: Option<String>,
    pub changed_by: Option<String>,
}

/// Records a rollback row and asks whichever replica holds the node to
/// push it.
pub async fn rollback_version(
    State(state): State<AppState>,
    Path(version_id): Path<Uuid>,
    body: Result<Json<RollbackRequest>, JsonRejection>,
) -> Response {
    let req = match json_body(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    let reason = req
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "manual rollback".to_owned());
    let meta = ChangeMeta::rollback(req.changed_by, reason.clone());
    let version = match state
        .versions
        .rollback_to_version(&req.tenant_id, version_id, meta)
        .await
    {
        Ok(v) => v,
        Err(e) => return version_error(e),
    };
    state.engine.notify_version(&version);

    let event = PanelEvent::ConfigRollback {
        node_id: version.node_id.clone(),
        version_id: version.version_id,
        reason,
    };
    if let Err(resp) = publish(&state, event).await {
        return resp;
    }
    (StatusCode::CREATED, Json(version)).into_response()
}

pub async fn push_node(State(state): State<AppState>, Path(node_id): Path<String>) -> Response {
    match state.store.get_node(&node_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("node not found"),
        Err(e) => return internal_error(e),
    }
    let event = PanelEvent::ConfigChanged {
        target: Target::Node(node_id),
    };
    match publish(&state, event).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(resp) => resp,
    }
}

/// Publishes an arbitrary bus event, e.g. a users change or a kick.
pub async fn publish_event(
    State(state): State<AppState>,
    body: Result<Json<PanelEvent>, JsonRejection>,
) -> Response {
    let event = match json_body(body) {
        Ok(event) => event,
        Err(resp) => return resp,
    };
    match publish(&state, event).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(resp) => resp,
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectionsQuery {
    pub tenant_id: Option<String>,
}

pub async fn list_connections(
    State(state): State<AppState>,
    Query(query): Query<ConnectionsQuery>,
) -> impl IntoResponse {
    let connections = match query.tenant_id {
        Some(tenant_id) => state.registry.list_by_tenant(&tenant_id),
        None => state.registry.list_all(),
    };
    Json(serde_json::json!({ "connections": connections }))
}
