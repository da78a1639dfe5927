//! Error types for the test harness
//!
//! Module defines all error types that can occur while driving a test
//! server, providing structured error handling with enough context to
//! diagnose a failure without re-running with added instrumentation.

use thiserror::Error;

/// The main error type for the test harness
#[derive(Error, Debug, Clone)]
pub enum TestError {
    /// No port in the configured range is both unused and bindable
    #[error("No available ports in range {start}-{end}")]
    PortsExhausted {
        /// First port of the allocation range (inclusive)
        start: u16,
        /// Last port of the allocation range (inclusive)
        end: u16,
    },

    /// `start()` was called on a server that is already running
    #[error("Server is already running")]
    AlreadyRunning,

    /// The server's URL or client was accessed before a successful start
    #[error("Server is not running")]
    NotRunning,

    /// The server did not signal readiness within the startup timeout
    #[error("Server startup timed out on host {host} and port {port}")]
    StartupTimeout {
        /// Host the server was binding to
        host: String,
        /// Port the server was binding to
        port: u16,
    },

    /// An operation that is not valid for this response's kind
    #[error("Invalid response type: {0}")]
    InvalidResponseType(String),

    /// A received frame kind does not match the requested accessor
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Frame kind the accessor requires
        expected: String,
        /// Frame kind that was actually received
        actual: String,
    },

    /// A bounded wait exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// An expectation over observed values failed
    #[error("Assertion failed: expected {expected}, got {actual}")]
    Assertion {
        /// The expected value
        expected: String,
        /// The value actually observed
        actual: String,
    },

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// WebSocket transport errors (handshake, send, receive, close)
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors from the standard library or runtime
    #[error("I/O error: {0}")]
    Io(String),

    /// URL parsing or scheme errors
    #[error("URL error: {0}")]
    Url(String),
}

// Manual From implementations for types that don't implement Clone
impl From<serde_json::Error> for TestError {
    fn from(err: serde_json::Error) -> Self {
        TestError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for TestError {
    fn from(err: std::io::Error) -> Self {
        TestError::Io(err.to_string())
    }
}

impl From<url::ParseError> for TestError {
    fn from(err: url::ParseError) -> Self {
        TestError::Url(err.to_string())
    }
}

impl From<reqwest::Error> for TestError {
    fn from(err: reqwest::Error) -> Self {
        TestError::Http(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TestError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TestError::WebSocket(err.to_string())
    }
}

/// Result type alias for test harness operations
pub type TestResult<T> = Result<T, TestError>;

impl TestError {
    /// Create a new invalid-response-type error
    pub fn invalid_response_type<S: Into<String>>(message: S) -> Self {
        Self::InvalidResponseType(message.into())
    }

    /// Create a new frame-kind mismatch error
    pub fn type_mismatch<E: Into<String>, A: Into<String>>(expected: E, actual: A) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout(message.into())
    }

    /// Create a new assertion error carrying both values
    pub fn assertion<E: Into<String>, A: Into<String>>(expected: E, actual: A) -> Self {
        Self::Assertion {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a new WebSocket transport error
    pub fn websocket<S: Into<String>>(message: S) -> Self {
        Self::WebSocket(message.into())
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors are the network-class failures worth retrying
    /// during connection establishment. Programmer errors (bad URLs,
    /// serialization problems, misuse of the response wrapper) are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            TestError::Http(_) => true,
            TestError::WebSocket(_) => true,
            TestError::Io(_) => true,
            TestError::Timeout(_) => true,
            TestError::PortsExhausted { .. } => false,
            TestError::AlreadyRunning => false,
            TestError::NotRunning => false,
            TestError::StartupTimeout { .. } => false,
            TestError::InvalidResponseType(_) => false,
            TestError::TypeMismatch { .. } => false,
            TestError::Assertion { .. } => false,
            TestError::Serialization(_) => false,
            TestError::Url(_) => false,
        }
    }
}
