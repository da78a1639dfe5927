//! Async test client supporting both HTTP and WebSocket connections
//!
//! The client owns an HTTP transport and every WebSocket connection it
//! opened; `close()` tears all of them down. Clones share state, so a
//! clone handed to a task observes the same live-connection set.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, redirect};
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};

use crate::core::config::global_config;
use crate::core::error::{TestError, TestResult};
use crate::response::TestResponse;
use crate::ws::{TestWebSocket, WebSocketConfig};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct ClientInner {
    base_url: String,
    http: Client,
    // Bounds total in-flight requests to the configured maximum; the
    // pool itself only caps idle keep-alive connections.
    limiter: Semaphore,
    sockets: Mutex<Vec<TestWebSocket>>,
}

/// Async test client bound to one server's base URL
#[derive(Debug, Clone)]
pub struct TestClient {
    inner: Arc<ClientInner>,
}

impl TestClient {
    /// Create a client with the default request timeout
    pub fn new(base_url: &str) -> TestResult<Self> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client with a custom request timeout
    ///
    /// # Errors
    /// `TestError::Url` when the base URL is not http(s), `TestError::Http`
    /// when the transport cannot be built.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> TestResult<Self> {
        let trimmed = base_url.trim_end_matches('/');
        if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
            return Err(TestError::Url(format!(
                "invalid base URL '{base_url}': must start with http:// or https://"
            )));
        }

        let config = global_config();
        let http = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::limited(10))
            .pool_max_idle_per_host(config.http_max_keepalive)
            .build()?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                base_url: trimmed.to_string(),
                http,
                limiter: Semaphore::new(config.http_max_connections),
                sockets: Mutex::new(Vec::new()),
            }),
        })
    }

    /// The base URL this client targets
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.inner.base_url)
        } else {
            format!("{}/{path}", self.inner.base_url)
        }
    }

    /// Start an arbitrary request against `path`
    ///
    /// The returned builder accepts any reqwest option; pass it to
    /// [`execute`](Self::execute) to get a [`TestResponse`].
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.inner.http.request(method, self.url_for(path))
    }

    /// Send a request and buffer its response
    pub async fn execute(&self, builder: RequestBuilder) -> TestResult<TestResponse> {
        let _permit = self
            .inner
            .limiter
            .acquire()
            .await
            .map_err(|_| TestError::Http("request limiter closed".to_string()))?;
        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        Ok(TestResponse::http(status, headers, body))
    }

    /// Issue a GET request
    pub async fn get(&self, path: &str) -> TestResult<TestResponse> {
        self.execute(self.request(Method::GET, path)).await
    }

    /// Issue a DELETE request
    pub async fn delete(&self, path: &str) -> TestResult<TestResponse> {
        self.execute(self.request(Method::DELETE, path)).await
    }

    /// Issue a POST request with a JSON body
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> TestResult<TestResponse> {
        self.execute(self.request(Method::POST, path).json(body)).await
    }

    /// Issue a PUT request with a JSON body
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> TestResult<TestResponse> {
        self.execute(self.request(Method::PUT, path).json(body)).await
    }

    /// Issue a PATCH request with a JSON body
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> TestResult<TestResponse> {
        self.execute(self.request(Method::PATCH, path).json(body)).await
    }

    /// Open a WebSocket connection with default configuration
    pub async fn websocket(&self, path: &str) -> TestResult<TestResponse> {
        self.websocket_with(path, WebSocketConfig::default()).await
    }

    /// Open a WebSocket connection with explicit configuration
    ///
    /// The connection is registered in the client's live set before
    /// being handed back, so `close()` will tear it down even if the
    /// caller drops the response.
    pub async fn websocket_with(
        &self,
        path: &str,
        config: WebSocketConfig,
    ) -> TestResult<TestResponse> {
        let socket = TestWebSocket::connect(&self.inner.base_url, path, &config).await?;
        self.inner.sockets.lock().await.push(socket.clone());
        Ok(TestResponse::websocket_connection(socket))
    }

    /// Number of live WebSocket connections this client owns
    pub async fn open_websockets(&self) -> usize {
        self.inner.sockets.lock().await.len()
    }

    /// Close every live WebSocket connection and clear the set
    ///
    /// Close errors are logged and suppressed so that cleanup always
    /// completes. Idempotent.
    pub async fn close(&self) {
        let sockets: Vec<TestWebSocket> = {
            let mut guard = self.inner.sockets.lock().await;
            guard.drain(..).collect()
        };
        for socket in sockets {
            if let Err(error) = socket.close().await {
                tracing::warn!(url = socket.url(), "error closing websocket connection: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rejects_non_http_base_url() {
        let error = TestClient::new("ftp://127.0.0.1:8080").unwrap_err();
        assert!(matches!(error, TestError::Url(_)));
        let error = TestClient::new("127.0.0.1:8080").unwrap_err();
        assert!(matches!(error, TestError::Url(_)));
    }

    #[test]
    fn test_base_url_is_normalized() {
        let client = TestClient::new("http://127.0.0.1:8080/").unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_url_joining() {
        let client = TestClient::new("http://127.0.0.1:8080").unwrap();
        assert_eq!(client.url_for("/items"), "http://127.0.0.1:8080/items");
        assert_eq!(client.url_for("items"), "http://127.0.0.1:8080/items");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let client = TestClient::new("http://127.0.0.1:8080").unwrap();
        client.close().await;
        client.close().await;
        assert_eq!(client.open_websockets().await, 0);
    }
}
