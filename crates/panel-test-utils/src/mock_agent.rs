use futures_util::{SinkExt, StreamExt};
use panel_protocol::{ConfigPush, Register, RegisterResult, WsMessage};
use std::time::Duration;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::tungstenite::protocol::Message;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// A scripted Agent: connects to the Panel's agent endpoint and exchanges
/// typed [`WsMessage`]s.
pub struct MockAgentClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl MockAgentClient {
    pub async fn connect(url: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    pub async fn send_message(
        &mut self,
        msg: &WsMessage,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string(msg)?;
        self.write.send(Message::Text(json.into())).await?;
        Ok(())
    }

    pub async fn send_raw(&mut self, text: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(Message::Text(text.to_owned().into())).await?;
        Ok(())
    }

    pub async fn recv_message(&mut self) -> Result<WsMessage, Box<dyn std::error::Error>> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => {
                    let msg: WsMessage = serde_json::from_str(&text)?;
                    return Ok(msg);
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => return Err("connection closed by server".into()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err("connection stream ended".into()),
            }
        }
    }

    /// Like [`recv_message`](Self::recv_message) but gives up after `timeout`.
    ///
    /// `Ok(None)` means nothing arrived in time.
    pub async fn recv_message_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<WsMessage>, Box<dyn std::error::Error>> {
        match tokio::time::timeout(timeout, self.recv_message()).await {
            Ok(msg) => msg.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Sends `register` and returns the Panel's `register_result`.
    pub async fn register(
        &mut self,
        node_id: &str,
        token: &str,
    ) -> Result<RegisterResult, Box<dyn std::error::Error>> {
        self.send_message(&WsMessage::Register(Register {
            node_id: node_id.to_owned(),
            token: token.to_owned(),
            agent_version: "test-agent".to_owned(),
            core_info: None,
        }))
        .await?;
        match self.recv_message().await? {
            WsMessage::RegisterResult(result) => Ok(result),
            other => Err(format!("expected register_result, got {}", other.kind()).into()),
        }
    }

    /// Waits for the next `config` push, skipping other message kinds.
    pub async fn recv_config(&mut self) -> Result<ConfigPush, Box<dyn std::error::Error>> {
        loop {
            if let WsMessage::Config(push) = self.recv_message().await? {
                return Ok(push);
            }
        }
    }

    pub async fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(Message::Close(None)).await?;
        Ok(())
    }
}
