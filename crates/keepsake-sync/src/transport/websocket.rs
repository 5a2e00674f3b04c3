//! WebSocket transport over tokio-tungstenite with rustls.

use super::{RelayConnection, RelayConnector};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// Connector dialing real relays.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RelayConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn RelayConnection>> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| Error::ConnectionFailure(e.to_string()))?;

        tracing::trace!("WebSocket handshake with {} ({})", url, response.status());

        Ok(Box::new(WebSocketConnection { stream }))
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl RelayConnection for WebSocketConnection {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.stream
            .send(Message::text(frame))
            .await
            .map_err(|e| Error::ConnectionFailure(format!("send failed: {e}")))
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => {
                    return Some(Err(Error::ConnectionFailure(format!(
                        "receive failed: {e}"
                    ))));
                }
            };

            match message {
                Message::Text(text) => return Some(Ok(text.as_str().to_owned())),
                Message::Binary(data) => {
                    return Some(String::from_utf8(data.to_vec()).map_err(|_| {
                        Error::MalformedMessage("binary frame is not UTF-8".to_string())
                    }));
                }
                Message::Close(_) => return None,
                // tungstenite answers pings itself on the next read or write
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::trace!("WebSocket close: {}", e);
        }
    }
}
