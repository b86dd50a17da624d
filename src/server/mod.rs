//! HTTP server for node connections
//!
//! Serves the WebSocket connect endpoint and a health check.

pub mod connect;
pub mod health;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::auth::Verifier;
use crate::bridge::ResponseDispatcher;
use crate::config::ServerConfig;
use crate::nodes::ConnectionRegistry;

/// Shared state for request handlers
pub struct ServerState {
    pub registry: Arc<ConnectionRegistry>,
    pub verifier: Arc<dyn Verifier>,
    pub dispatcher: Arc<ResponseDispatcher>,
    /// Per-frame write deadline for node sessions
    pub write_timeout: Duration,
}

/// Build the router with all routes
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .merge(connect::router(Arc::clone(&state)))
        .merge(health::router(state))
        .layer(TraceLayer::new_for_http())
}

/// Node endpoint server
pub struct NodeServer {
    state: Arc<ServerState>,
    addr: SocketAddr,
}

impl NodeServer {
    /// Create a server listening on the configured address
    #[must_use]
    pub fn new(config: &ServerConfig, state: Arc<ServerState>) -> Self {
        Self {
            state,
            addr: SocketAddr::new(config.bind, config.port),
        }
    }

    /// Run the server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind node endpoint: {e}")))?;

        tracing::info!(addr = %self.addr, "node endpoint listening");

        axum::serve(
            listener,
            router(self.state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;

        Ok(())
    }

    /// Spawn the server as a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
