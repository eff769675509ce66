//! Agent WebSocket endpoint: one task per connection.
//!
//! A session must open with `register`.  Once accepted it is entered in the
//! registry, answered with `register_result`, and sent exactly one initial
//! config push.  Messages are then handled in arrival order.

use crate::alerts::Alert;
use crate::auth::{authenticate_node, AuthError};
use crate::dashboard_events::DashboardEvent;
use crate::model::{ChangeMeta, NodeStatus};
use crate::registry::{close_superseded, ConnectionHandle};
use crate::state::AppState;
use crate::ws_common::{recv_text_with_timeout, send_message, send_ws_error};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use panel_protocol::{error_codes, AliveAck, Register, RegisterResult, WsMessage};
use tracing::{error, info, warn};

/// Capacity of the per-session outbound queue.
pub const OUTBOUND_QUEUE: usize = 64;

pub async fn ws_agent_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_agent_socket(socket, state))
}

async fn recv_register(socket: &mut WebSocket, state: &AppState) -> Option<Register> {
    let text = match recv_text_with_timeout(socket, state.settings.register_timeout).await {
        Ok(text) => text,
        Err(()) => {
            send_ws_error(
                socket,
                error_codes::PROTOCOL_ERROR,
                "timeout waiting for register",
                false,
            )
            .await;
            return None;
        }
    };
    match serde_json::from_str::<WsMessage>(&text) {
        Ok(WsMessage::Register(register)) => Some(register),
        Ok(other) => {
            send_ws_error(
                socket,
                error_codes::PROTOCOL_ERROR,
                &format!("expected register, got {}", other.kind()),
                false,
            )
            .await;
            None
        }
        Err(e) => {
            send_ws_error(
                socket,
                error_codes::PROTOCOL_ERROR,
                &format!("invalid JSON: {e}"),
                false,
            )
            .await;
            None
        }
    }
}

async fn reject(socket: &mut WebSocket, node_id: &str, err: &AuthError) {
    match err {
        AuthError::Store(e) => error!(node_id = %node_id, error = %e, "register lookup failed"),
        other => warn!(node_id = %node_id, reason = %other, "register rejected"),
    }
    let result = WsMessage::RegisterResult(RegisterResult {
        success: false,
        message: err.to_string(),
        code: Some(err.code().to_owned()),
        intervals: None,
    });
    let _ = send_message(socket, &result).await;
    let _ = socket.send(Message::Close(None)).await;
}

async fn handle_agent_socket(mut socket: WebSocket, state: AppState) {
    let Some(register) = recv_register(&mut socket, &state).await else {
        return;
    };
    let node = match authenticate_node(state.store.as_ref(), &register.node_id, &register.token).await
    {
        Ok(node) => node,
        Err(e) => {
            reject(&mut socket, &register.node_id, &e).await;
            return;
        }
    };
    let node_id = node.node_id.clone();

    let (out_tx, mut out_rx) = tokio::sync::mpsc::channel::<WsMessage>(OUTBOUND_QUEUE);
    let handle = ConnectionHandle::new(out_tx);
    let session_id = handle.session_id;
    close_superseded(state.registry.register(&node_id, &node.tenant_id, handle.clone()));
    info!(
        node_id = %node_id,
        session_id = %session_id,
        agent_version = %register.agent_version,
        "agent registered"
    );

    let now = state.clock.now();
    if let Err(e) = state
        .store
        .set_node_presence(&node_id, NodeStatus::Online, now)
        .await
    {
        error!(node_id = %node_id, error = %e, "failed to mark node online");
    }
    if let Err(e) = state
        .store
        .record_agent_info(&node_id, &register.agent_version, register.core_info.as_ref())
        .await
    {
        error!(node_id = %node_id, error = %e, "failed to record agent info");
    }

    let accepted = WsMessage::RegisterResult(RegisterResult {
        success: true,
        message: "registered".to_owned(),
        code: None,
        intervals: Some(state.settings.intervals.clone()),
    });
    if !send_message(&mut socket, &accepted).await {
        finish_session(&state, &node_id, session_id).await;
        return;
    }
    let _ = state.dashboard_tx.send(DashboardEvent::NodeConnected {
        node_id: node_id.clone(),
        tenant_id: node.tenant_id.clone(),
        session_id,
    });

    // Queued on this session's outbound channel, so it follows
    // register_result on the wire.
    if let Err(e) = state
        .engine
        .push_config(&node_id, ChangeMeta::update().because("initial push on register"))
        .await
    {
        warn!(node_id = %node_id, error = %e, "initial config push failed");
    }

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<WsMessage>(&text) {
                        Ok(msg) => {
                            if !handle_agent_message(&mut socket, &state, &node_id, msg).await {
                                break;
                            }
                        }
                        Err(e) => {
                            send_ws_error(&mut socket, error_codes::PROTOCOL_ERROR, &format!("invalid JSON: {e}"), false).await;
                            break;
                        }
                    },
                    Some(Ok(Message::Ping(data))) => { let _ = socket.send(Message::Pong(data)).await; }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(node_id = %node_id, "agent disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        state.alerts.emit(Alert::TransportError { node_id: node_id.clone(), error: e.to_string() });
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
            Some(out) = out_rx.recv() => {
                if !send_message(&mut socket, &out).await {
                    state.alerts.emit(Alert::TransportError {
                        node_id: node_id.clone(),
                        error: format!("failed to write {}", out.kind()),
                    });
                    break;
                }
            }
            _ = handle.closed() => {
                info!(node_id = %node_id, session_id = %session_id, "session closed by panel");
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }

    finish_session(&state, &node_id, session_id).await;
}

/// Returns `false` when the session should end.
async fn handle_agent_message(
    socket: &mut WebSocket,
    state: &AppState,
    node_id: &str,
    msg: WsMessage,
) -> bool {
    match msg {
        WsMessage::Status(report) => {
            let now = state.clock.now();
            if let Err(e) = state.store.record_system_info(node_id, &report, now).await {
                error!(node_id = %node_id, error = %e, "failed to store status report");
            }
        }
        WsMessage::Traffic(report) => {
            if let Err(e) = state.traffic.record(node_id, &report).await {
                error!(node_id = %node_id, error = %e, "failed to store traffic report");
            }
        }
        WsMessage::Alive(_) => {
            state.registry.touch(node_id);
            let now = state.clock.now();
            if let Err(e) = state
                .store
                .set_node_presence(node_id, NodeStatus::Online, now)
                .await
            {
                warn!(node_id = %node_id, error = %e, "failed to update last seen");
            }
            let ack = WsMessage::AliveAck(AliveAck {
                server_time_ms: now.timestamp_millis(),
            });
            return send_message(socket, &ack).await;
        }
        WsMessage::ConfigResult(result) => {
            if let Err(e) = state.engine.handle_config_result(node_id, result).await {
                error!(node_id = %node_id, error = %e, "failed to handle config result");
            }
        }
        WsMessage::Register(_) => {
            warn!(node_id = %node_id, "ignoring repeated register");
        }
        other => {
            warn!(node_id = %node_id, kind = other.kind(), "unexpected message kind");
        }
    }
    true
}

async fn finish_session(state: &AppState, node_id: &str, session_id: uuid::Uuid) {
    let released = state.registry.release(node_id, session_id);
    // A stale sweep already removed the entry; a superseding session has
    // replaced it.  Only the former leaves the node offline.
    if !released && state.registry.is_connected(node_id) {
        return;
    }
    let now = state.clock.now();
    if let Err(e) = state
        .store
        .set_node_presence(node_id, NodeStatus::Offline, now)
        .await
    {
        error!(node_id = %node_id, error = %e, "failed to mark node offline");
    }
    let _ = state.dashboard_tx.send(DashboardEvent::NodeDisconnected {
        node_id: node_id.to_owned(),
        session_id,
    });
    info!(node_id = %node_id, session_id = %session_id, "agent session ended");
}
