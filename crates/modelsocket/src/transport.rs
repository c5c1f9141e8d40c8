//! Frame transport between the client and a ModelSocket server.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest,
        http::{header, HeaderName, HeaderValue},
        protocol::WebSocketConfig,
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};

use crate::{
    error::ModelSocketError,
    protocol::{Event, Request},
};

/// WebSocket subprotocol spoken by ModelSocket servers.
pub const SUBPROTOCOL: &str = "modelsocket.v0";

/// Default per-frame read limit. Large enough for big responses carrying
/// token arrays.
pub const DEFAULT_READ_LIMIT: usize = 32 * 1024 * 1024;

/// Byte carrier between the client and the server.
///
/// `send` may be called concurrently (implementations serialize writes);
/// `receive` is called from exactly one reader, the connection's receive
/// loop.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &Request) -> Result<(), ModelSocketError>;
    async fn receive(&self) -> Result<Event, ModelSocketError>;
    async fn close(&self) -> Result<(), ModelSocketError>;
}

/// Options for the WebSocket handshake.
#[derive(Debug, Clone)]
pub struct DialOptions {
    /// Additional headers sent during the handshake.
    pub headers: Vec<(String, String)>,
    /// Per-frame read limit in bytes.
    pub read_limit: usize,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            read_limit: DEFAULT_READ_LIMIT,
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`Transport`] over a WebSocket connection.
pub struct WsTransport {
    sink: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
    source: tokio::sync::Mutex<SplitStream<WsStream>>,
    closed: AtomicBool,
}

impl WsTransport {
    /// Connects to a ModelSocket server. Sends `Authorization: Bearer
    /// <api_key>` when a key is supplied.
    pub async fn connect(
        url: &str,
        api_key: Option<&str>,
        options: DialOptions,
    ) -> Result<Self, ModelSocketError> {
        let dial_error =
            |source: Box<dyn std::error::Error + Send + Sync>| ModelSocketError::Transport {
                op: "dial",
                url: Some(url.to_string()),
                source,
            };

        let mut handshake = url
            .into_client_request()
            .map_err(|e| dial_error(e.into()))?;
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| dial_error(e.into()))?;
            let value = HeaderValue::from_str(value).map_err(|e| dial_error(e.into()))?;
            handshake.headers_mut().insert(name, value);
        }
        handshake.headers_mut().insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(SUBPROTOCOL),
        );
        if let Some(api_key) = api_key {
            let value = HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|e| dial_error(e.into()))?;
            handshake.headers_mut().insert(header::AUTHORIZATION, value);
        }

        let config = WebSocketConfig::default()
            .max_message_size(Some(options.read_limit))
            .max_frame_size(Some(options.read_limit));

        let (stream, _response) = connect_async_with_config(handshake, Some(config), false)
            .await
            .map_err(|e| dial_error(e.into()))?;
        let (sink, source) = stream.split();

        Ok(Self {
            sink: tokio::sync::Mutex::new(sink),
            source: tokio::sync::Mutex::new(source),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, request: &Request) -> Result<(), ModelSocketError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ModelSocketError::Closed);
        }

        let payload =
            serde_json::to_string(request).map_err(|e| ModelSocketError::send_failed("encode", e))?;

        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(payload.into()))
            .await
            .map_err(|e| ModelSocketError::transport("write", None, e))
    }

    async fn receive(&self) -> Result<Event, ModelSocketError> {
        let mut source = self.source.lock().await;
        loop {
            let message = match source.next().await {
                None => return Err(self.read_error("connection closed".into())),
                Some(Err(e)) => return Err(self.read_error(e.into())),
                Some(Ok(message)) => message,
            };

            let event = match &message {
                Message::Text(text) => serde_json::from_str::<Event>(text),
                Message::Binary(bytes) => serde_json::from_slice::<Event>(bytes),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                Message::Close(_) => {
                    return Err(self.read_error("connection closed by server".into()))
                }
            };

            return event.map_err(|e| ModelSocketError::send_failed("decode", e));
        }
    }

    async fn close(&self) -> Result<(), ModelSocketError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut sink = self.sink.lock().await;
        sink.close()
            .await
            .map_err(|e| ModelSocketError::transport("close", None, e))
    }
}

impl WsTransport {
    fn read_error(&self, source: Box<dyn std::error::Error + Send + Sync>) -> ModelSocketError {
        if self.closed.load(Ordering::SeqCst) {
            return ModelSocketError::Closed;
        }
        ModelSocketError::Transport {
            op: "read",
            url: None,
            source,
        }
    }
}
