//! Node connect endpoint
//!
//! Credentials are checked before the upgrade. A rejected handshake gets a
//! plain 401 and leaves no trace in the registry or the directory.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        ConnectInfo, State, WebSocketUpgrade,
        rejection::ExtensionRejection,
        ws::{WebSocket, rejection::WebSocketUpgradeRejection},
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use futures::StreamExt;

use super::ServerState;
use crate::Error;
use crate::nodes::{NodeIdentity, Session};

/// Path nodes connect to
pub const CONNECT_PATH: &str = "/api/ipc/connect";

/// Build connect router
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route(CONNECT_PATH, get(connect))
        .with_state(state)
}

async fn connect(
    State(state): State<Arc<ServerState>>,
    remote: Result<ConnectInfo<SocketAddr>, ExtensionRejection>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let remote = remote.ok().map(|ConnectInfo(addr)| addr);
    tracing::info!(address = ?remote, "new connection");

    let identity = match state.verifier.verify(&headers).map_err(Error::from) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(address = ?remote, error = %e, "failed to authenticate connection");
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            tracing::warn!(node_id = %identity.node_id, error = %rejection, "connection is not a websocket upgrade");
            return rejection.into_response();
        }
    };

    ws.on_upgrade(move |socket| serve_node(socket, state, identity))
}

async fn serve_node(socket: WebSocket, state: Arc<ServerState>, identity: NodeIdentity) {
    let session = Session::new(identity).with_write_timeout(state.write_timeout);
    state.registry.register(session.handle().clone()).await;

    let (sink, stream) = socket.split();
    let end = session
        .run(
            stream,
            sink,
            Arc::clone(&state.registry),
            Arc::clone(&state.dispatcher),
        )
        .await;

    tracing::debug!(node_id = %identity.node_id, ?end, "session ended");
}
