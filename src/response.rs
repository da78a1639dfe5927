//! Unified response wrapper
//!
//! A `TestResponse` wraps exactly one of an HTTP result or a WebSocket
//! connection. The tag is fixed at construction; accessing an operation
//! that is not valid for the tag fails with
//! [`TestError::InvalidResponseType`] rather than panicking.
//!
//! HTTP bodies are buffered at request time, so `status()`, `text()` and
//! `json()` can all be called on the same response.

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;

use crate::core::error::{TestError, TestResult};
use crate::ws::TestWebSocket;

/// Buffered HTTP response payload
#[derive(Debug, Clone)]
struct HttpPayload {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

#[derive(Debug)]
enum ResponseKind {
    Http(HttpPayload),
    WebSocket(TestWebSocket),
}

/// Response wrapper supporting both HTTP and WebSocket responses
///
/// Provides a unified surface over the two kinds of result a
/// [`TestClient`](crate::client::TestClient) can produce, with typed
/// errors instead of panics when the wrong accessor is used.
#[derive(Debug)]
pub struct TestResponse {
    kind: ResponseKind,
}

impl TestResponse {
    pub(crate) fn http(status: StatusCode, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            kind: ResponseKind::Http(HttpPayload {
                status,
                headers,
                body,
            }),
        }
    }

    pub(crate) fn websocket_connection(socket: TestWebSocket) -> Self {
        Self {
            kind: ResponseKind::WebSocket(socket),
        }
    }

    /// Whether this response wraps a WebSocket connection
    pub fn is_websocket(&self) -> bool {
        matches!(self.kind, ResponseKind::WebSocket(_))
    }

    fn http_payload(&self, operation: &str) -> TestResult<&HttpPayload> {
        match &self.kind {
            ResponseKind::Http(payload) => Ok(payload),
            ResponseKind::WebSocket(_) => Err(TestError::invalid_response_type(format!(
                "cannot call {operation}() on a WebSocket response; use websocket() instead"
            ))),
        }
    }

    /// Get the status code (HTTP only)
    pub fn status(&self) -> TestResult<StatusCode> {
        Ok(self.http_payload("status")?.status)
    }

    /// Get the response headers (HTTP only)
    pub fn headers(&self) -> TestResult<&HeaderMap> {
        Ok(&self.http_payload("headers")?.headers)
    }

    /// Get the response body as text (HTTP only)
    pub fn text(&self) -> TestResult<String> {
        let payload = self.http_payload("text")?;
        String::from_utf8(payload.body.clone())
            .map_err(|err| TestError::Serialization(format!("response body is not UTF-8: {err}")))
    }

    /// Deserialize the response body as JSON (HTTP only)
    pub fn json<T: DeserializeOwned>(&self) -> TestResult<T> {
        let payload = self.http_payload("json")?;
        Ok(serde_json::from_slice(&payload.body)?)
    }

    /// Get the WebSocket connection (WebSocket only)
    pub fn websocket(&self) -> TestResult<TestWebSocket> {
        match &self.kind {
            ResponseKind::WebSocket(socket) => Ok(socket.clone()),
            ResponseKind::Http(_) => Err(TestError::invalid_response_type(
                "this response is not a WebSocket connection",
            )),
        }
    }

    /// Assert the expected status code (HTTP only), returning `self` for
    /// chaining
    ///
    /// # Errors
    /// `TestError::Assertion` carrying both status codes on mismatch.
    pub fn expect_status(&self, expected: StatusCode) -> TestResult<&Self> {
        let payload = self.http_payload("expect_status")?;
        if payload.status != expected {
            return Err(TestError::assertion(
                format!("status {expected}"),
                format!("status {}", payload.status),
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    fn http_response(status: StatusCode, body: &str) -> TestResponse {
        TestResponse::http(status, HeaderMap::new(), body.as_bytes().to_vec())
    }

    #[test]
    fn test_http_accessors() {
        let response = http_response(StatusCode::OK, r#"{"message":"success"}"#);
        assert!(!response.is_websocket());
        assert_eq!(response.status().unwrap(), StatusCode::OK);
        assert_eq!(response.text().unwrap(), r#"{"message":"success"}"#);
        let body: Value = response.json().unwrap();
        assert_eq!(body, json!({"message": "success"}));
    }

    #[test]
    fn test_http_response_rejects_websocket_accessor() {
        let response = http_response(StatusCode::OK, "{}");
        let error = response.websocket().unwrap_err();
        assert!(matches!(error, TestError::InvalidResponseType(_)));
    }

    #[test]
    fn test_expect_status_chains_on_match() {
        let response = http_response(StatusCode::CREATED, "{}");
        let chained = response
            .expect_status(StatusCode::CREATED)
            .expect("status matches");
        assert_eq!(chained.status().unwrap(), StatusCode::CREATED);
    }

    #[test]
    fn test_expect_status_mismatch_carries_both() {
        let response = http_response(StatusCode::NOT_FOUND, "{}");
        let error = response.expect_status(StatusCode::OK).unwrap_err();
        match error {
            TestError::Assertion { expected, actual } => {
                assert!(expected.contains("200"));
                assert!(actual.contains("404"));
            }
            other => panic!("expected assertion error, got {other:?}"),
        }
    }

    #[test]
    fn test_debug_output_names_the_kind() {
        let response = http_response(StatusCode::OK, "{}");
        assert!(format!("{response:?}").contains("Http"));
    }

    #[test]
    fn test_invalid_json_body_propagates_parse_error() {
        let response = http_response(StatusCode::OK, "not json");
        let error = response.json::<Value>().unwrap_err();
        assert!(matches!(error, TestError::Serialization(_)));
    }
}
