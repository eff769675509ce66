// panel-test-utils: Shared test utilities for the panel workspace.
//
// Provides a mock Agent WebSocket client for integration testing of the
// Panel's agent endpoint.

pub mod mock_agent;

pub use mock_agent::MockAgentClient;

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use panel_protocol::*;
    use tokio_tungstenite::tungstenite::protocol::Message;

    /// Minimal Panel stand-in: answers `register` with a success result and
    /// then pushes one empty config.
    async fn start_stub_panel() -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    while let Some(Ok(Message::Text(text))) = ws.next().await {
                        let reply = match serde_json::from_str::<WsMessage>(&text) {
                            Ok(WsMessage::Register(r)) => {
                                WsMessage::RegisterResult(RegisterResult {
                                    success: true,
                                    message: format!("hello {}", r.node_id),
                                    code: None,
                                    intervals: None,
                                })
                            }
                            _ => WsMessage::Error(ErrorMessage {
                                code: error_codes::PROTOCOL_ERROR.to_owned(),
                                message: "expected register".to_owned(),
                                retryable: false,
                            }),
                        };
                        let json = serde_json::to_string(&reply).unwrap();
                        ws.send(Message::Text(json.into())).await.unwrap();
                        let push = WsMessage::Config(ConfigPush {
                            version_id: None,
                            version: 0,
                            fingerprint: "00".to_owned(),
                            config: serde_json::json!({}),
                            is_rollback: false,
                        });
                        let json = serde_json::to_string(&push).unwrap();
                        ws.send(Message::Text(json.into())).await.unwrap();
                    }
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn register_returns_panel_result_and_then_config() {
        let addr = start_stub_panel().await;
        let mut client = MockAgentClient::connect(&format!("ws://{addr}"))
            .await
            .unwrap();

        let result = client.register("node-1", "secret-token").await.unwrap();
        assert!(result.success);
        assert_eq!(result.message, "hello node-1");

        let push = client.recv_config().await.unwrap();
        assert_eq!(push.version, 0);
    }

    #[tokio::test]
    async fn recv_message_timeout_returns_none_when_idle() {
        let addr = start_stub_panel().await;
        let mut client = MockAgentClient::connect(&format!("ws://{addr}"))
            .await
            .unwrap();

        let msg = client
            .recv_message_timeout(std::time::Duration::from_millis(50))
            .await
            .unwrap();
        assert!(msg.is_none());
    }
}
