//! WebSocket configuration, connection handle, and helper assertions
//!
//! Module provides the client side of WebSocket testing: a retrying
//! handshake, typed send/receive operations over text and binary frames,
//! and assertion helpers (`expect_message`, `drain_messages`).

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::ClientRequestBuilder;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig as ProtocolConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use url::Url;

use crate::core::config::global_config;
use crate::core::error::{TestError, TestResult};

/// Default handshake deadline when none is configured
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-message chunk assumed when mapping the queue depth onto the
/// transport's bounded write buffer
const WRITE_BUFFER_CHUNK: usize = 128 * 1024;

/// WebSocket connection configuration
///
/// An immutable value object consumed once at connection-open time.
/// `None` (or empty) fields fall back to the process-wide configuration;
/// per-call values take precedence.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConfig {
    /// Subprotocols offered during the handshake
    pub subprotocols: Vec<String>,
    /// Compression algorithm to request (accepted but not negotiated by
    /// the underlying transport; see module docs)
    pub compression: Option<String>,
    /// Additional headers for the handshake request
    pub extra_headers: Vec<(String, String)>,
    /// Interval between keepalive ping frames
    ///
    /// The pinger shares the connection's stream lock with the receive
    /// helpers, so a receive blocked waiting for a frame delays the next
    /// ping until that frame arrives.
    pub ping_interval: Option<Duration>,
    /// Deadline for sending each keepalive ping
    pub ping_timeout: Option<Duration>,
    /// Maximum message size in bytes
    pub max_message_size: Option<usize>,
    /// Maximum number of queued outgoing messages
    pub max_queue_size: Option<usize>,
    /// Handshake deadline
    pub connect_timeout: Option<Duration>,
    /// Number of handshake attempts before giving up
    pub retry_attempts: Option<u32>,
    /// Delay between handshake attempts
    pub retry_delay: Option<Duration>,
}

/// One received frame, tagged text or binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    /// A text frame
    Text(String),
    /// A binary frame
    Binary(Vec<u8>),
}

impl WsMessage {
    /// The frame kind, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            WsMessage::Text(_) => "text frame",
            WsMessage::Binary(_) => "binary frame",
        }
    }
}

impl std::fmt::Display for WsMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WsMessage::Text(text) => write!(f, "{text}"),
            WsMessage::Binary(data) => write!(f, "binary {data:?}"),
        }
    }
}

/// An expected message for [`TestWebSocket::expect_message`]
///
/// A `Json` expectation requires a text frame whose JSON-decoded form
/// equals the expected value; the other shapes compare raw frame content.
#[derive(Debug, Clone, PartialEq)]
pub enum Expected {
    /// Raw text frame content
    Text(String),
    /// JSON-decoded text frame content
    Json(Value),
    /// Raw binary frame content
    Binary(Vec<u8>),
}

impl From<&str> for Expected {
    fn from(text: &str) -> Self {
        Expected::Text(text.to_string())
    }
}

impl From<String> for Expected {
    fn from(text: String) -> Self {
        Expected::Text(text)
    }
}

impl From<Value> for Expected {
    fn from(value: Value) -> Self {
        Expected::Json(value)
    }
}

impl From<Vec<u8>> for Expected {
    fn from(data: Vec<u8>) -> Self {
        Expected::Binary(data)
    }
}

impl From<&[u8]> for Expected {
    fn from(data: &[u8]) -> Self {
        Expected::Binary(data.to_vec())
    }
}

impl std::fmt::Display for Expected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expected::Text(text) => write!(f, "{text}"),
            Expected::Json(value) => write!(f, "{value}"),
            Expected::Binary(data) => write!(f, "binary {data:?}"),
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A live WebSocket connection opened by a test client
///
/// Cheaply cloneable; clones share the underlying connection. The owning
/// [`TestClient`](crate::client::TestClient) keeps one clone in its live
/// set and closes it on teardown.
#[derive(Debug, Clone)]
pub struct TestWebSocket {
    stream: Arc<Mutex<WsStream>>,
    keepalive: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
    url: String,
}

impl TestWebSocket {
    /// Open a connection to `path` below `base_url`, applying `config`
    /// merged over the process-wide defaults, with a bounded retry loop
    /// around the handshake.
    pub(crate) async fn connect(
        base_url: &str,
        path: &str,
        config: &WebSocketConfig,
    ) -> TestResult<Self> {
        let url = websocket_url(base_url, path)?;
        let defaults = global_config();

        let attempts = config
            .retry_attempts
            .unwrap_or(defaults.ws_retry_attempts)
            .max(1);
        let delay = config.retry_delay.unwrap_or(defaults.ws_retry_delay);
        let connect_timeout = config.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);

        if let Some(algorithm) = &config.compression {
            tracing::warn!(
                %algorithm,
                "websocket compression is not negotiated by this transport; ignoring"
            );
        }

        let max_message_size = config
            .max_message_size
            .unwrap_or(defaults.ws_max_message_size);
        let max_queue_size = config.max_queue_size.unwrap_or(defaults.ws_max_queue_size);
        // The transport has no message-count queue; the queue depth
        // bounds its write buffer instead.
        let protocol_config = ProtocolConfig::default()
            .max_message_size(Some(max_message_size))
            .max_frame_size(Some(max_message_size))
            .write_buffer_size(0)
            .max_write_buffer_size(max_queue_size.max(1).saturating_mul(WRITE_BUFFER_CHUNK));

        let uri: Uri = url
            .as_str()
            .parse()
            .map_err(|err| TestError::Url(format!("invalid websocket URI {url}: {err}")))?;
        let build_request = || {
            let mut request = ClientRequestBuilder::new(uri.clone());
            if !config.subprotocols.is_empty() {
                request = request.with_sub_protocol(config.subprotocols.join(", "));
            }
            for (name, value) in &config.extra_headers {
                request = request.with_header(name.clone(), value.clone());
            }
            request
        };

        let mut attempt = 0u32;
        let stream = loop {
            attempt += 1;
            let handshake = timeout(
                connect_timeout,
                connect_async_with_config(build_request(), Some(protocol_config.clone()), false),
            )
            .await;
            let result = match handshake {
                Ok(Ok((stream, _response))) => Ok(stream),
                Ok(Err(error)) => Err(TestError::from(error)),
                Err(_) => Err(TestError::timeout(format!(
                    "websocket handshake to {url} exceeded {connect_timeout:?}"
                ))),
            };
            match result {
                Ok(stream) => break stream,
                Err(error) => {
                    if attempt >= attempts || !error.is_recoverable() {
                        tracing::error!(
                            %url,
                            attempt,
                            "failed to establish websocket connection: {error}"
                        );
                        return Err(error);
                    }
                    tracing::debug!(
                        %url,
                        attempt,
                        "websocket handshake failed, retrying in {delay:?}: {error}"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        tracing::debug!(%url, "websocket connection established");

        let stream = Arc::new(Mutex::new(stream));
        let keepalive = config
            .ping_interval
            .map(|interval| spawn_keepalive(Arc::clone(&stream), interval, config.ping_timeout));

        Ok(Self {
            stream,
            keepalive: Arc::new(std::sync::Mutex::new(keepalive)),
            url: url.to_string(),
        })
    }

    /// The URL this connection was opened against
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send_frame(&self, message: Message) -> TestResult<()> {
        let mut stream = self.stream.lock().await;
        stream.send(message).await.map_err(TestError::from)
    }

    /// Receive the next data frame, skipping ping/pong traffic
    async fn receive_frame(&self) -> TestResult<WsMessage> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(WsMessage::Text(text.to_string())),
                Some(Ok(Message::Binary(data))) => return Ok(WsMessage::Binary(data.to_vec())),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) => {
                    return Err(TestError::websocket(
                        "connection closed while waiting for a frame",
                    ));
                }
                Some(Err(error)) => return Err(error.into()),
                None => return Err(TestError::websocket("connection stream ended")),
            }
        }
    }

    /// Receive one frame, or `None` when no frame arrives within `limit`
    async fn receive_frame_within(&self, limit: Duration) -> TestResult<Option<WsMessage>> {
        match timeout(limit, self.receive_frame()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Serialize `data` to JSON and send it as a text frame
    pub async fn send_json<T: Serialize + ?Sized>(&self, data: &T) -> TestResult<()> {
        let text = serde_json::to_string(data)?;
        self.send_frame(Message::text(text)).await
    }

    /// Receive one frame and parse it as JSON
    ///
    /// # Errors
    /// `TestError::TypeMismatch` when the frame is binary; parse errors
    /// propagate as `TestError::Serialization`.
    pub async fn receive_json<T: DeserializeOwned>(&self) -> TestResult<T> {
        match self.receive_frame().await? {
            WsMessage::Text(text) => Ok(serde_json::from_str(&text)?),
            other => Err(TestError::type_mismatch("text frame", other.kind())),
        }
    }

    /// Send a text frame
    pub async fn send_text(&self, text: &str) -> TestResult<()> {
        self.send_frame(Message::text(text)).await
    }

    /// Receive one text frame
    ///
    /// # Errors
    /// `TestError::TypeMismatch` when the frame is binary.
    pub async fn receive_text(&self) -> TestResult<String> {
        match self.receive_frame().await? {
            WsMessage::Text(text) => Ok(text),
            other => Err(TestError::type_mismatch("text frame", other.kind())),
        }
    }

    /// Send a binary frame
    pub async fn send_binary(&self, data: impl Into<Vec<u8>>) -> TestResult<()> {
        self.send_frame(Message::binary(data.into())).await
    }

    /// Receive one binary frame
    ///
    /// # Errors
    /// `TestError::TypeMismatch` when the frame is text.
    pub async fn receive_binary(&self) -> TestResult<Vec<u8>> {
        match self.receive_frame().await? {
            WsMessage::Binary(data) => Ok(data),
            other => Err(TestError::type_mismatch("binary frame", other.kind())),
        }
    }

    /// Assert that the next frame equals `expected`, waiting at most
    /// `limit` when one is given
    ///
    /// # Errors
    /// `TestError::Timeout` when no frame arrives in time, otherwise
    /// `TestError::Assertion` carrying both values on mismatch.
    pub async fn expect_message(
        &self,
        expected: impl Into<Expected>,
        limit: Option<Duration>,
    ) -> TestResult<()> {
        let expected = expected.into();
        let message = match limit {
            Some(limit) => self.receive_frame_within(limit).await?.ok_or_else(|| {
                TestError::timeout(format!("no frame arrived within {limit:?}"))
            })?,
            None => self.receive_frame().await?,
        };

        let matched = match (&expected, &message) {
            (Expected::Json(value), WsMessage::Text(text)) => {
                serde_json::from_str::<Value>(text).is_ok_and(|actual| actual == *value)
            }
            (Expected::Text(want), WsMessage::Text(got)) => want == got,
            (Expected::Binary(want), WsMessage::Binary(got)) => want == got,
            _ => false,
        };
        if matched {
            Ok(())
        } else {
            Err(TestError::assertion(
                expected.to_string(),
                message.to_string(),
            ))
        }
    }

    /// Drain pending frames until a single receive exceeds `limit`
    ///
    /// The trailing timeout is normal termination, not an error; the
    /// frames collected so far (possibly none) are returned in order.
    pub async fn drain_messages(&self, limit: Duration) -> TestResult<Vec<WsMessage>> {
        let mut messages = Vec::new();
        while let Some(message) = self.receive_frame_within(limit).await? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Close the connection, stopping the keepalive pinger if one runs
    pub async fn close(&self) -> TestResult<()> {
        let keepalive = {
            let mut slot = self
                .keepalive
                .lock()
                .unwrap_or_else(|err| err.into_inner());
            slot.take()
        };
        if let Some(task) = keepalive {
            task.abort();
        }
        let mut stream = self.stream.lock().await;
        stream.close(None).await.map_err(TestError::from)
    }
}

/// Spawn the keepalive pinger for a connection
fn spawn_keepalive(
    stream: Arc<Mutex<WsStream>>,
    interval: Duration,
    ping_timeout: Option<Duration>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let mut guard = stream.lock().await;
            let send = guard.send(Message::Ping(Vec::new().into()));
            let sent = match ping_timeout {
                Some(limit) => matches!(timeout(limit, send).await, Ok(Ok(()))),
                None => send.await.is_ok(),
            };
            if !sent {
                tracing::debug!("keepalive ping failed; stopping pinger");
                break;
            }
        }
    })
}

/// Build a scheme-correct WebSocket URL from a base URL and path
fn websocket_url(base_url: &str, path: &str) -> TestResult<Url> {
    let base = Url::parse(base_url)?;
    let scheme = match base.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(TestError::Url(format!(
                "unsupported base URL scheme '{other}': must be http or https"
            )));
        }
    };
    let mut url = base.join(path)?;
    url.set_scheme(scheme)
        .map_err(|_| TestError::Url(format!("cannot map scheme of {base_url} to {scheme}")))?;
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_websocket_url_http_maps_to_ws() {
        let url = websocket_url("http://127.0.0.1:8080", "/ws").unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:8080/ws");
    }

    #[test]
    fn test_websocket_url_https_maps_to_wss() {
        let url = websocket_url("https://127.0.0.1:8443", "/ws/echo").unwrap();
        assert_eq!(url.as_str(), "wss://127.0.0.1:8443/ws/echo");
    }

    #[test]
    fn test_websocket_url_rejects_other_schemes() {
        let error = websocket_url("ftp://127.0.0.1", "/ws").unwrap_err();
        assert!(matches!(error, TestError::Url(_)));
    }

    #[test]
    fn test_expected_conversions() {
        assert_eq!(Expected::from("hello"), Expected::Text("hello".to_string()));
        assert_eq!(
            Expected::from(json!({"a": 1})),
            Expected::Json(json!({"a": 1}))
        );
        assert_eq!(
            Expected::from(vec![1u8, 2, 3]),
            Expected::Binary(vec![1, 2, 3])
        );
        assert_eq!(
            Expected::from(&[9u8, 8][..]),
            Expected::Binary(vec![9, 8])
        );
    }

    #[test]
    fn test_message_kind_names() {
        assert_eq!(WsMessage::Text("x".into()).kind(), "text frame");
        assert_eq!(WsMessage::Binary(vec![0]).kind(), "binary frame");
    }

    #[test]
    fn test_display_shows_content() {
        assert_eq!(WsMessage::Text("ping".into()).to_string(), "ping");
        assert_eq!(Expected::Json(json!({"a": 1})).to_string(), r#"{"a":1}"#);
    }
}
