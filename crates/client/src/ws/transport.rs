//! Socket transport seam.
//!
//! The driver only sees [`Connector`] and [`Transport`]; production code uses
//! the tokio-tungstenite implementation below and tests plug in scripted
//! fakes.

use async_trait::async_trait;
use bms_shared::Namespace;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{RealtimeError, Result};

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: Url,
    pub namespace: Namespace,
    pub token: String,
}

/// One live, bidirectional text-frame session.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Next inbound text frame. `None` means the peer closed the session.
    /// Must be cancel safe; the driver polls it inside `select!`.
    async fn recv(&mut self) -> Option<Result<String>>;

    async fn close(&mut self) -> Result<()>;
}

/// Opens transports. Called once per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Native WebSocket connector using tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>> {
        let mut request = endpoint
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::InvalidEndpoint(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", endpoint.token))
            .map_err(|_| RealtimeError::Transport("token is not a valid header value".into()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| RealtimeError::Transport(e.to_string()))?;
        let (write, read) = stream.split();
        Ok(Box::new(WsTransport { write, read }))
    }
}

struct WsTransport {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.write
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| RealtimeError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        while let Some(msg) = self.read.next().await {
            match msg {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(_)) => return None,
                Ok(Message::Ping(data)) => {
                    // Pong is handled automatically by tungstenite
                    crate::log_debug!("Received ping: {:?}", data);
                }
                Ok(_) => {
                    // Ignore binary, pong, etc.
                }
                Err(e) => return Some(Err(RealtimeError::Transport(e.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) -> Result<()> {
        self.write
            .close()
            .await
            .map_err(|e| RealtimeError::Transport(e.to_string()))
    }
}
