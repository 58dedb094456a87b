//! HTTP and WebSocket server for the robot head

pub mod health;
pub mod websocket;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::pipeline::ResponsePipeline;
use crate::{Error, Result};

/// Extra time the server waits for sessions beyond the shutdown grace
const SHUTDOWN_MARGIN: Duration = Duration::from_secs(2);

/// Shared state for every connection
pub struct ApiState {
    /// Response pipeline, shared read-only by all sessions
    pub pipeline: Arc<ResponsePipeline>,

    /// Origins allowed to upgrade; empty accepts any
    pub allowed_origins: Vec<String>,

    /// Flips to `true` when the server begins shutting down
    pub shutdown: watch::Receiver<bool>,

    /// Time an in-flight turn may keep running after shutdown
    pub shutdown_grace: Duration,
}

/// Build the full router: `/`, `/health`, and `/ws`
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(websocket::router(state))
        .layer(TraceLayer::new_for_http())
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    pipeline: Arc<ResponsePipeline>,
    host: String,
    port: u16,
    allowed_origins: Vec<String>,
    shutdown_grace: Duration,
}

impl ApiServerBuilder {
    /// Create a new API server builder with default listener settings
    #[must_use]
    pub fn new(pipeline: Arc<ResponsePipeline>) -> Self {
        let defaults = ServerConfig::default();
        Self {
            pipeline,
            host: defaults.host,
            port: defaults.port,
            allowed_origins: defaults.allowed_origins,
            shutdown_grace: defaults.shutdown_grace,
        }
    }

    /// Apply every listener setting from `config`
    #[must_use]
    pub fn server_config(mut self, config: &ServerConfig) -> Self {
        self.host.clone_from(&config.host);
        self.port = config.port;
        self.allowed_origins.clone_from(&config.allowed_origins);
        self.shutdown_grace = config.shutdown_grace;
        self
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    #[must_use]
    pub const fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(ApiState {
            pipeline: self.pipeline,
            allowed_origins: self.allowed_origins,
            shutdown: shutdown_rx,
            shutdown_grace: self.shutdown_grace,
        });

        ApiServer {
            state,
            shutdown_tx,
            bind_addr: format!("{}:{}", self.host, self.port),
        }
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    shutdown_tx: watch::Sender<bool>,
    bind_addr: String,
}

impl ApiServer {
    /// Router for this server's state
    #[must_use]
    pub fn router(&self) -> Router {
        router(Arc::clone(&self.state))
    }

    /// Bind the configured address and serve until `signal` completes
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self, signal: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let listener = TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind {}: {e}", self.bind_addr)))?;
        self.serve(listener, signal).await
    }

    /// Serve on an already bound listener until `signal` completes
    ///
    /// After the signal, no new connections are accepted, idle sessions
    /// close, and in-flight turns get the shutdown grace before being cut
    /// off. Returns once every session has ended or the grace plus a small
    /// margin has elapsed.
    ///
    /// # Errors
    ///
    /// Returns error if the accept loop fails
    pub async fn serve(
        self,
        listener: TcpListener,
        signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(%addr, "robot head server listening");

        if self.state.allowed_origins.is_empty() {
            tracing::warn!(
                "no origin allowlist configured, accepting WebSocket upgrades from any origin"
            );
        }

        let Self {
            state, shutdown_tx, ..
        } = self;
        let grace = state.shutdown_grace;
        let shutdown_tx = Arc::new(shutdown_tx);
        let notify = Arc::clone(&shutdown_tx);

        axum::serve(listener, router(state))
            .with_graceful_shutdown(async move {
                signal.await;
                tracing::info!("shutdown requested, closing sessions");
                notify.send_replace(true);
            })
            .await?;

        // Every session holds a receiver; closed() resolves once all have ended
        if tokio::time::timeout(grace + SHUTDOWN_MARGIN, shutdown_tx.closed())
            .await
            .is_err()
        {
            tracing::warn!("sessions still open after shutdown grace");
        }

        tracing::info!("server stopped");
        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(
        self,
        signal: impl Future<Output = ()> + Send + 'static,
    ) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run(signal).await })
    }
}
