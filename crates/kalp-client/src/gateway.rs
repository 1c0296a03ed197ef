use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::warn;
use uuid::Uuid;

use kalp_types::events::{ClientEvent, ServerEvent};

use crate::error::ClientError;

/// A WebSocket connection to the relay.
pub struct GatewayClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl GatewayClient {
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (stream, _) = tokio_tungstenite::connect_async(url).await?;
        Ok(Self { stream })
    }

    pub async fn emit(&mut self, event: &ClientEvent) -> Result<(), ClientError> {
        let text = serde_json::to_string(event)?;
        self.stream.send(Message::text(text)).await?;
        Ok(())
    }

    /// Next server event, or `None` once the server closes the socket.
    /// Pings are answered by tungstenite while reading.
    pub async fn next_event(&mut self) -> Result<Option<ServerEvent>, ClientError> {
        while let Some(msg) = self.stream.next().await {
            match msg? {
                Message::Text(text) => match serde_json::from_str::<ServerEvent>(text.as_str()) {
                    Ok(event) => return Ok(Some(event)),
                    Err(e) => warn!("Ignoring unknown server event: {}", e),
                },
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream.close(None).await?;
        Ok(())
    }
}

/// Session id for a conversation started by this client.
pub fn new_session_id(user_id: Uuid) -> String {
    kalp_types::models::new_session_id(user_id, chrono::Utc::now())
}
