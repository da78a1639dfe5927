//! Test server lifecycle management
//!
//! A [`TestServer`] owns an axum application, acquires a loopback port
//! from the process-wide allocator, serves the application on a
//! background task behind a startup-readiness barrier, and reverses the
//! whole sequence on `stop()`. A failed `start()` performs the same full
//! teardown before surfacing the error.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::client::TestClient;
use crate::core::error::{TestError, TestResult};
use crate::port::global_port_allocator;

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const HOST: &str = "127.0.0.1";

#[derive(Default)]
struct Lifecycle {
    serve_task: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    background_tasks: Vec<JoinHandle<()>>,
    started: bool,
}

struct ServerInner {
    app: Router,
    startup_timeout: Duration,
    shutdown_timeout: Duration,
    // Sync state for the accessors; never held across an await.
    port: std::sync::Mutex<Option<u16>>,
    client: std::sync::Mutex<Option<TestClient>>,
    // Serializes the start/stop state machine.
    lifecycle: Mutex<Lifecycle>,
}

/// Async test server with lifecycle management and WebSocket support
///
/// Cheaply cloneable; clones share the same running instance.
#[derive(Clone)]
pub struct TestServer {
    inner: Arc<ServerInner>,
}

impl TestServer {
    /// Create a server for `app` with default timeouts (30 s startup,
    /// 10 s shutdown)
    pub fn new(app: Router) -> Self {
        Self::with_timeouts(app, DEFAULT_STARTUP_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT)
    }

    /// Create a server with explicit startup and shutdown timeouts
    pub fn with_timeouts(
        app: Router,
        startup_timeout: Duration,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                app,
                startup_timeout,
                shutdown_timeout,
                port: std::sync::Mutex::new(None),
                client: std::sync::Mutex::new(None),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    /// The loopback host the server binds to
    pub fn host(&self) -> &'static str {
        HOST
    }

    /// The allocated port, if the server holds one
    pub fn port(&self) -> Option<u16> {
        *self.inner.port.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// The server's base URL
    ///
    /// # Errors
    /// `TestError::NotRunning` when no port is currently allocated.
    pub fn base_url(&self) -> TestResult<String> {
        match self.port() {
            Some(port) => Ok(format!("http://{HOST}:{port}")),
            None => Err(TestError::NotRunning),
        }
    }

    /// The client bound to this server
    ///
    /// # Errors
    /// `TestError::NotRunning` before a successful start.
    pub fn client(&self) -> TestResult<TestClient> {
        self.inner
            .client
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
            .ok_or(TestError::NotRunning)
    }

    /// Start serving on a freshly allocated port
    ///
    /// Waits for the serve task to signal readiness, bounded by the
    /// startup timeout. Any startup failure triggers a full compensating
    /// teardown before the error is returned.
    ///
    /// # Errors
    /// `TestError::AlreadyRunning` when the server is not idle,
    /// `TestError::StartupTimeout` when readiness does not arrive in
    /// time, or the underlying bind error.
    pub async fn start(&self) -> TestResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.serve_task.is_some() {
            return Err(TestError::AlreadyRunning);
        }

        let port = global_port_allocator().acquire()?;
        *self.inner.port.lock().unwrap_or_else(|err| err.into_inner()) = Some(port);

        let (ready_tx, ready_rx) = oneshot::channel::<std::io::Result<()>>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = self.inner.app.clone();

        lifecycle.serve_task = Some(tokio::spawn(async move {
            let listener = match TcpListener::bind((HOST, port)).await {
                Ok(listener) => {
                    let _ = ready_tx.send(Ok(()));
                    listener
                }
                Err(error) => {
                    let _ = ready_tx.send(Err(error));
                    return;
                }
            };
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(error) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(port, "test server exited with error: {error}");
            }
        }));
        lifecycle.shutdown_tx = Some(shutdown_tx);

        match timeout(self.inner.startup_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(bind_error))) => {
                self.teardown(&mut lifecycle).await;
                return Err(bind_error.into());
            }
            Ok(Err(_closed)) => {
                self.teardown(&mut lifecycle).await;
                return Err(TestError::Io(
                    "server task exited before signalling readiness".to_string(),
                ));
            }
            Err(_elapsed) => {
                self.teardown(&mut lifecycle).await;
                return Err(TestError::StartupTimeout {
                    host: HOST.to_string(),
                    port,
                });
            }
        }

        let base_url = format!("http://{HOST}:{port}");
        let client = match TestClient::with_timeout(&base_url, self.inner.startup_timeout) {
            Ok(client) => client,
            Err(error) => {
                self.teardown(&mut lifecycle).await;
                return Err(error);
            }
        };
        *self
            .inner
            .client
            .lock()
            .unwrap_or_else(|err| err.into_inner()) = Some(client);
        lifecycle.started = true;

        tracing::debug!(port, "test server running");
        Ok(())
    }

    /// Stop the server and release every owned resource
    ///
    /// A no-op if the server never completed a start. Outstanding
    /// background tasks are cancelled and awaited before the client is
    /// closed, the serve loop is shut down, and the port is released.
    pub async fn stop(&self) -> TestResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if !lifecycle.started {
            return Ok(());
        }
        self.teardown(&mut lifecycle).await;
        tracing::debug!("test server stopped");
        Ok(())
    }

    /// Register a background task owned by this server
    ///
    /// Registered tasks are aborted and awaited during `stop()`, their
    /// individual outcomes ignored.
    pub async fn spawn_task(&self, task: JoinHandle<()>) {
        self.inner.lifecycle.lock().await.background_tasks.push(task);
    }

    async fn teardown(&self, lifecycle: &mut Lifecycle) {
        for task in lifecycle.background_tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }

        let client = self
            .inner
            .client
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .take();
        if let Some(client) = client {
            client.close().await;
        }

        if let Some(shutdown_tx) = lifecycle.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(mut task) = lifecycle.serve_task.take() {
            if timeout(self.inner.shutdown_timeout, &mut task).await.is_err() {
                tracing::error!(
                    host = HOST,
                    port = ?self.port(),
                    "timeout waiting for server shutdown; cancelling serve task"
                );
                task.abort();
                let _ = task.await;
            }
        }

        let port = self
            .inner
            .port
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .take();
        if let Some(port) = port {
            global_port_allocator().release(port);
        }
        lifecycle.started = false;
    }
}

impl Drop for ServerInner {
    fn drop(&mut self) {
        // Best-effort guard for servers leaked without stop(): abort the
        // tasks and give the port back. Dropping shutdown_tx also
        // resolves the graceful-shutdown future.
        if let Ok(mut lifecycle) = self.lifecycle.try_lock() {
            if let Some(task) = lifecycle.serve_task.take() {
                task.abort();
            }
            lifecycle.shutdown_tx.take();
            for task in lifecycle.background_tasks.drain(..) {
                task.abort();
            }
        }
        let port = self.port.lock().unwrap_or_else(|err| err.into_inner()).take();
        if let Some(port) = port {
            global_port_allocator().release(port);
        }
    }
}

/// Run `f` against a started server, guaranteeing `stop()` on every exit
/// path
///
/// The closure's error wins over a shutdown error; a shutdown error
/// after a successful closure is surfaced.
pub async fn with_test_server<F, Fut, T>(app: Router, f: F) -> TestResult<T>
where
    F: FnOnce(TestServer) -> Fut,
    Fut: Future<Output = TestResult<T>>,
{
    let server = TestServer::new(app);
    server.start().await?;
    let result = f(server.clone()).await;
    let stopped = server.stop().await;
    match result {
        Ok(value) => stopped.map(|_| value),
        Err(error) => {
            if let Err(stop_error) = stopped {
                tracing::warn!("error stopping test server: {stop_error}");
            }
            Err(error)
        }
    }
}
