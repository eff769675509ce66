//! Pull surface for agents that poll instead of holding a WebSocket.

use super::response::{
    bad_request, forbidden, internal_error, not_found, unauthorized, unprocessable, HttpResult,
};
use crate::auth::{authenticate_node, AuthError};
use crate::engine::{ConfigResultOutcome, PushError};
use crate::model::{ChangeMeta, ChangeType, ConfigVersion, NodeRecord, VersionStatus};
use crate::state::AppState;
use crate::versions::VersionError;
use crate::ws_common::extract_token_from_headers;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use panel_protocol::{ConfigPush, ConfigResult};
use serde::Serialize;
use tracing::{info, warn};

/// How far back the history is scanned for rejections since the current
/// applied version.
const PULL_HISTORY_WINDOW: i64 = 50;

pub(crate) async fn authenticated_node(
    state: &AppState,
    headers: &HeaderMap,
    node_id: &str,
) -> HttpResult<NodeRecord> {
    let Some(token) = extract_token_from_headers(headers) else {
        return Err(unauthorized("missing bearer token"));
    };
    authenticate_node(state.store.as_ref(), node_id, &token)
        .await
        .map_err(|e| match e {
            AuthError::NodeNotFound => not_found("node not found"),
            AuthError::InvalidToken => unauthorized("invalid token"),
            AuthError::Maintenance => forbidden("node is in maintenance"),
            AuthError::Store(e) => internal_error(e),
        })
}

fn version_error(e: VersionError) -> Response {
    match e {
        VersionError::Invalid(result) => unprocessable(
            format!("configuration is invalid: {}", result.summary()),
            serde_json::to_value(&result).unwrap_or_default(),
        ),
        VersionError::NotFound(id) => not_found(format!("version not found: {id}")),
        VersionError::Store(e) => internal_error(e),
    }
}

/// `true` when an `If-None-Match` value names `fingerprint`.
fn etag_matches(if_none_match: &str, fingerprint: &str) -> bool {
    if_none_match.split(',').any(|candidate| {
        let candidate = candidate.trim();
        let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
        candidate == "*" || candidate.trim_matches('"') == fingerprint
    })
}

fn is_queued(version: &ConfigVersion) -> bool {
    matches!(
        version.status,
        VersionStatus::Pending | VersionStatus::Pushing
    )
}

/// Picks the version a polling agent should run.
///
/// A queued rollback wins.  A desired config the node rejected after its
/// current applied version is never handed out again; the current version
/// is served in its place.
async fn resolve_version(
    state: &AppState,
    node: &NodeRecord,
) -> Result<Option<ConfigVersion>, VersionError> {
    let current = state.versions.get_current_version(&node.node_id).await?;
    let history = state
        .versions
        .get_version_history(&node.node_id, PULL_HISTORY_WINDOW)
        .await?;
    let since_current: Vec<&ConfigVersion> = history
        .iter()
        .take_while(|v| current.as_ref().map_or(true, |c| v.version > c.version))
        .collect();

    if let Some(newest) = since_current.first() {
        if newest.change.change_type == ChangeType::Rollback && is_queued(newest) {
            return Ok(Some((*newest).clone()));
        }
    }

    let prepared = state.versions.prepare(&node.node_id).await?;
    let rejected = since_current
        .iter()
        .any(|v| v.status == VersionStatus::Failed && v.fingerprint == prepared.fingerprint);
    if rejected {
        warn!(
            node_id = %node.node_id,
            fingerprint = %prepared.fingerprint,
            "desired config was rejected by the node; serving current version"
        );
        return Ok(current);
    }

    let created = state
        .versions
        .commit(
            &node.tenant_id,
            &node.node_id,
            &prepared,
            ChangeMeta::update().because("pulled by agent"),
        )
        .await?;
    Ok(Some(created.version))
}

pub async fn get_node_config(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let node = match authenticated_node(&state, &headers, &node_id).await {
        Ok(node) => node,
        Err(resp) => return resp,
    };
    let version = match resolve_version(&state, &node).await {
        Ok(Some(version)) => version,
        Ok(None) => return not_found("no configuration available for node"),
        Err(e) => return version_error(e),
    };

    let etag = HeaderValue::from_str(&format!("\"{}\"", version.fingerprint));
    let unchanged = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| etag_matches(v, &version.fingerprint));
    if unchanged {
        let mut resp = StatusCode::NOT_MODIFIED.into_response();
        if let Ok(etag) = etag {
            resp.headers_mut().insert(header::ETAG, etag);
        }
        return resp;
    }

    let version = if is_queued(&version) {
        match state.versions.mark_pushing(version.version_id).await {
            Ok(pushing) => {
                state.engine.notify_version(&pushing);
                pushing
            }
            Err(e) => return version_error(e),
        }
    } else {
        version
    };
    info!(node_id = %node_id, version = version.version, "config served by pull");

    let body = ConfigPush {
        version_id: Some(version.version_id),
        version: u64::try_from(version.version).unwrap_or_default(),
        fingerprint: version.fingerprint.clone(),
        config: version.payload,
        is_rollback: version.change.change_type == ChangeType::Rollback,
    };
    let mut resp = Json(body).into_response();
    if let Ok(etag) = etag {
        resp.headers_mut().insert(header::ETAG, etag);
    }
    resp
}

#[derive(Debug, Serialize)]
struct ConfigResultResponse {
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<ConfigVersion>,
}

pub async fn post_config_result(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<ConfigResult>, axum::extract::rejection::JsonRejection>,
) -> Response {
    if let Err(resp) = authenticated_node(&state, &headers, &node_id).await {
        return resp;
    }
    let Json(result) = match body {
        Ok(body) => body,
        Err(e) => return bad_request(e.body_text()),
    };
    match state.engine.handle_config_result(&node_id, result).await {
        Ok(ConfigResultOutcome::Applied(version)) => Json(ConfigResultResponse {
            outcome: "applied",
            version: Some(version),
        })
        .into_response(),
        Ok(ConfigResultOutcome::Failed(outcome)) => {
            info!(node_id = %node_id, ?outcome, "pull agent reported failure");
            Json(ConfigResultResponse {
                outcome: "failed",
                version: None,
            })
            .into_response()
        }
        Ok(ConfigResultOutcome::Untracked) => Json(ConfigResultResponse {
            outcome: "untracked",
            version: None,
        })
        .into_response(),
        Err(PushError::Version(e)) => version_error(e),
        Err(e) => internal_error(e),
    }
}
