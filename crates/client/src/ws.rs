//! Websocket transport over `tokio-websockets`.

use async_trait::async_trait;
use chess_session::{Connector, SessionError, Transport};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_websockets::{ClientBuilder, MaybeTlsStream, Message, WebSocketStream};
use tracing::{debug, info};

pub struct WsConnector;

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, SessionError> {
        let builder = ClientBuilder::new()
            .uri(url)
            .map_err(|e| SessionError::Transport(format!("bad websocket url {url}: {e}")))?;
        let (stream, _response) = builder
            .connect()
            .await
            .map_err(|e| SessionError::Transport(format!("connect error: {e}")))?;
        info!(url, "websocket connected");
        Ok(Box::new(WsTransport { stream }))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), SessionError> {
        self.stream
            .send(Message::text(text))
            .await
            .map_err(|e| SessionError::Transport(format!("send error: {e}")))
    }

    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(SessionError::Transport(format!("receive error: {e}")))),
            };
            if msg.is_close() {
                return None;
            }
            match msg.as_text() {
                Some(text) => return Some(Ok(text.to_string())),
                // Pings are answered by the library; binary frames are not part of the protocol.
                None => debug!("non-text websocket frame skipped"),
            }
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.stream
            .close()
            .await
            .map_err(|e| SessionError::Transport(format!("close error: {e}")))
    }
}
