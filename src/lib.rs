// Copyright (c) 2025 axum-testing contributors
// SPDX-License-Identifier: MIT

//! # axum-testing
//!
//! An async test harness for [axum](https://docs.rs/axum) applications:
//! spins up your app on an ephemeral loopback port and exposes a unified
//! client for issuing HTTP requests and opening WebSocket connections
//! against it, with helper assertions for both.
//!
//! ## Features
//!
//! - **Lifecycle management**: start/stop with startup barriers,
//!   bounded shutdown, and full teardown on every failure path
//! - **Port pooling**: pseudo-random allocation from a configured range
//!   with a live bind probe, safe across concurrently running suites
//! - **Unified client**: HTTP verbs and WebSocket sessions behind one
//!   response wrapper with typed wrong-kind errors
//! - **WebSocket assertions**: typed send/receive, `expect_message`,
//!   and best-effort `drain_messages`, plus a retrying handshake
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum_testing::prelude::*;
//! use axum::routing::get;
//!
//! #[tokio::main]
//! async fn main() -> TestResult<()> {
//!     let app = Router::new().route("/", get(|| async { "hello" }));
//!     with_test_server(app, |server| async move {
//!         let response = server.client()?.get("/").await?;
//!         response.expect_status(StatusCode::OK)?;
//!         assert_eq!(response.text()?, "hello");
//!         Ok(())
//!     })
//!     .await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`core`]: error taxonomy and environment configuration
//! - [`port`]: port allocation for test servers
//! - [`response`]: the unified HTTP/WebSocket response wrapper
//! - [`ws`]: WebSocket configuration, connections, and assertions
//! - [`client`]: the unified async test client
//! - [`server`]: server lifecycle management

pub mod client;
pub mod core;
pub mod port;
pub mod response;
pub mod server;
pub mod ws;

// Re-export commonly used types for convenience
pub use crate::core::error::{TestError, TestResult};
pub use crate::response::TestResponse;
pub use crate::server::{TestServer, with_test_server};

/// Prelude module for convenient imports
///
/// Re-exports the most commonly used types and traits. Use
/// `use axum_testing::prelude::*;` to import everything you need.
pub mod prelude {
    pub use crate::client::TestClient;
    pub use crate::core::config::{Config, global_config};
    pub use crate::core::error::{TestError, TestResult};
    pub use crate::port::{PortAllocator, global_port_allocator};
    pub use crate::response::TestResponse;
    pub use crate::server::{TestServer, with_test_server};
    pub use crate::ws::{Expected, TestWebSocket, WebSocketConfig, WsMessage};

    // Essential external types
    pub use axum::Router;
    pub use reqwest::{Method, StatusCode};
    pub use serde_json::{Value, json};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        // Basic smoke test to ensure all modules are accessible
        let _error = TestError::NotRunning;
        let allocator = port::PortAllocator::new(42001, 42002);
        assert_eq!(allocator.range(), (42001, 42002));
    }
}
