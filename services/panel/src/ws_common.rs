use crate::auth::extract_bearer;
use axum::{
    extract::ws::{Message, WebSocket},
    http::HeaderMap,
};
use panel_protocol::{ErrorMessage, WsMessage};
use std::time::Duration;

pub fn extract_token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer)
        .map(ToOwned::to_owned)
}

/// Serializes and sends one message.  Returns `false` if the socket is gone.
pub async fn send_message(socket: &mut WebSocket, msg: &WsMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => socket.send(Message::Text(json)).await.is_ok(),
        Err(_) => true,
    }
}

pub async fn send_ws_error(socket: &mut WebSocket, code: &str, message: &str, retryable: bool) {
    let msg = WsMessage::Error(ErrorMessage {
        code: code.to_owned(),
        message: message.to_owned(),
        retryable,
    });
    let _ = send_message(socket, &msg).await;
}

fn parse_text_message(msg: Option<Result<Message, axum::Error>>) -> Result<String, ()> {
    match msg {
        Some(Ok(Message::Text(text))) => Ok(text),
        _ => Err(()),
    }
}

pub async fn recv_text_with_timeout(
    socket: &mut WebSocket,
    timeout: Duration,
) -> Result<String, ()> {
    match tokio::time::timeout(timeout, socket.recv()).await {
        Ok(msg) => parse_text_message(msg),
        Err(_) => Err(()),
    }
}
