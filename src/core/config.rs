//! Environment-driven configuration
//!
//! Every knob has a default and can be overridden through an
//! `AXUM_TESTING_`-prefixed environment variable. Unset or unparsable
//! values fall back to the default.
//!
//! Environment variables:
//! - `AXUM_TESTING_WS_MAX_MESSAGE_SIZE`: maximum WebSocket message size in bytes.
//! - `AXUM_TESTING_WS_QUEUE_SIZE`: maximum queued WebSocket messages.
//! - `AXUM_TESTING_HTTP_MAX_KEEPALIVE`: maximum idle keep-alive HTTP connections.
//! - `AXUM_TESTING_HTTP_MAX_CONNECTIONS`: maximum in-flight HTTP requests.
//! - `AXUM_TESTING_WS_RETRY_ATTEMPTS`: WebSocket connect attempts.
//! - `AXUM_TESTING_WS_RETRY_DELAY`: delay (in seconds) between connect attempts.
//! - `AXUM_TESTING_PORT_RANGE_START`: first port of the allocation range.
//! - `AXUM_TESTING_PORT_RANGE_END`: last port of the allocation range.

use std::str::FromStr;
use std::time::Duration;

use once_cell::sync::Lazy;

/// Default maximum WebSocket message size (1 MiB)
pub const DEFAULT_WS_MAX_MESSAGE_SIZE: usize = 1 << 20;
/// Default maximum number of queued WebSocket messages
pub const DEFAULT_WS_QUEUE_SIZE: usize = 32;
/// Default maximum idle keep-alive HTTP connections
pub const DEFAULT_HTTP_MAX_KEEPALIVE: usize = 20;
/// Default maximum in-flight HTTP requests
pub const DEFAULT_HTTP_MAX_CONNECTIONS: usize = 100;
/// Default number of WebSocket connect attempts
pub const DEFAULT_WS_RETRY_ATTEMPTS: u32 = 3;
/// Default delay between WebSocket connect attempts
pub const DEFAULT_WS_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Default first port of the allocation range
pub const DEFAULT_PORT_RANGE_START: u16 = 8001;
/// Default last port of the allocation range
pub const DEFAULT_PORT_RANGE_END: u16 = 9000;

const ENV_PREFIX: &str = "AXUM_TESTING_";

/// Configuration for the test harness
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Maximum WebSocket message size in bytes
    pub ws_max_message_size: usize,
    /// Maximum number of queued WebSocket messages
    pub ws_max_queue_size: usize,
    /// Maximum idle keep-alive HTTP connections
    pub http_max_keepalive: usize,
    /// Maximum in-flight HTTP requests
    pub http_max_connections: usize,
    /// Number of WebSocket connect attempts
    pub ws_retry_attempts: u32,
    /// Delay between WebSocket connect attempts
    pub ws_retry_delay: Duration,
    /// First port of the allocation range (inclusive)
    pub port_range_start: u16,
    /// Last port of the allocation range (inclusive)
    pub port_range_end: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_max_message_size: DEFAULT_WS_MAX_MESSAGE_SIZE,
            ws_max_queue_size: DEFAULT_WS_QUEUE_SIZE,
            http_max_keepalive: DEFAULT_HTTP_MAX_KEEPALIVE,
            http_max_connections: DEFAULT_HTTP_MAX_CONNECTIONS,
            ws_retry_attempts: DEFAULT_WS_RETRY_ATTEMPTS,
            ws_retry_delay: DEFAULT_WS_RETRY_DELAY,
            port_range_start: DEFAULT_PORT_RANGE_START,
            port_range_end: DEFAULT_PORT_RANGE_END,
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ws_max_message_size: env_parsed("WS_MAX_MESSAGE_SIZE", defaults.ws_max_message_size),
            ws_max_queue_size: env_parsed("WS_QUEUE_SIZE", defaults.ws_max_queue_size),
            http_max_keepalive: env_parsed("HTTP_MAX_KEEPALIVE", defaults.http_max_keepalive),
            http_max_connections: env_parsed("HTTP_MAX_CONNECTIONS", defaults.http_max_connections),
            ws_retry_attempts: env_parsed("WS_RETRY_ATTEMPTS", defaults.ws_retry_attempts),
            ws_retry_delay: {
                let seconds =
                    env_parsed("WS_RETRY_DELAY", defaults.ws_retry_delay.as_secs_f64());
                // Negative, NaN, and infinite values cannot form a Duration.
                Duration::try_from_secs_f64(seconds).unwrap_or_else(|_| {
                    tracing::warn!(seconds, "invalid retry delay, using default");
                    defaults.ws_retry_delay
                })
            },
            port_range_start: env_parsed("PORT_RANGE_START", defaults.port_range_start),
            port_range_end: env_parsed("PORT_RANGE_END", defaults.port_range_end),
        }
    }
}

/// Read and parse one prefixed environment variable
fn env_parsed<T: FromStr>(suffix: &str, default: T) -> T {
    let name = format!("{ENV_PREFIX}{suffix}");
    match std::env::var(&name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(%name, %raw, "unparsable value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::from_env);

/// Process-wide configuration snapshot, read from the environment on
/// first access and never reloaded.
pub fn global_config() -> &'static Config {
    &GLOBAL_CONFIG
}
