//! Live node sessions
//!
//! A session owns one duplex transport. Writes are serialized through a single
//! writer task fed by an mpsc channel, so any number of callers holding a
//! [`SessionHandle`] can send concurrently without interleaving frames. The
//! read loop parses replies and hands them to the response dispatcher.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, close_code};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::registry::ConnectionRegistry;
use super::types::{NodeIdentity, NodeRequest, NodeResponse};
use crate::bridge::ResponseDispatcher;
use crate::{Error, Result};

/// Frames buffered for the writer before senders wait
const OUTBOUND_BUFFER: usize = 64;

/// How long the writer gets to flush the close frame of a superseded session
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Default deadline for writing one frame to the node
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Close reason sent to a session replaced by a newer connection
pub const SUPERSEDED_REASON: &str = "superseded by a newer connection";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Superseded,
    Closed,
}

enum Outbound {
    Text {
        text: String,
        ack: oneshot::Sender<Result<()>>,
    },
    Close {
        code: u16,
        reason: &'static str,
    },
}

/// Cheap, cloneable handle to a live session
///
/// Handles compare by session id: two handles for the same node from different
/// connections are never equal.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    identity: NodeIdentity,
    outbound: mpsc::Sender<Outbound>,
    state: Arc<watch::Sender<State>>,
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text { text, .. } => f.debug_struct("Text").field("len", &text.len()).finish(),
            Self::Close { code, .. } => f.debug_struct("Close").field("code", code).finish(),
        }
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SessionHandle {}

impl SessionHandle {
    /// Unique id of the underlying connection
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Identity established at handshake
    #[must_use]
    pub const fn identity(&self) -> NodeIdentity {
        self.identity
    }

    /// Send a request frame to the node
    ///
    /// Resolves once the frame has been written to the transport.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionSuperseded` if a newer connection replaced this one,
    /// or `Transport` if the session is closed or the write fails or times out
    pub async fn send(&self, request: &NodeRequest) -> Result<()> {
        self.check_open()?;

        let text = serde_json::to_string(request)?;
        let (ack, written) = oneshot::channel();
        self.outbound
            .send(Outbound::Text { text, ack })
            .await
            .map_err(|_| Error::Transport("session closed".to_string()))?;

        written
            .await
            .map_err(|_| Error::Transport("session closed before write".to_string()))?
    }

    /// Signal that a newer connection replaced this session
    ///
    /// The read loop observes the signal, sends a close frame and deregisters
    /// itself. No-op once the session is closed.
    pub fn supersede(&self) {
        self.transition(State::Superseded);
    }

    /// Mark the session closed so further sends fail fast
    ///
    /// Idempotent. Does not stop a running read loop.
    pub fn close(&self) {
        self.transition(State::Closed);
    }

    /// Whether the session has been superseded or has ended
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.state.borrow() != State::Open
    }

    fn transition(&self, to: State) {
        self.state.send_if_modified(|state| {
            if *state == State::Open {
                *state = to;
                true
            } else {
                false
            }
        });
    }

    fn check_open(&self) -> Result<()> {
        check_open(*self.state.borrow(), self.identity.node_id)
    }
}

fn check_open(state: State, node_id: Uuid) -> Result<()> {
    match state {
        State::Open => Ok(()),
        State::Superseded => Err(Error::ConnectionSuperseded(node_id)),
        State::Closed => Err(Error::Transport("session closed".to_string())),
    }
}

/// Why a session loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The node sent a close frame
    PeerClosed(Option<u16>),

    /// The transport ended without a close frame
    StreamEnded,

    /// Reading from or writing to the transport failed
    TransportError(String),

    /// A newer connection for the same node replaced this one
    Superseded,
}

/// A session that has been created but whose loop is not yet running
pub struct Session {
    handle: SessionHandle,
    outbound_rx: mpsc::Receiver<Outbound>,
    state_rx: watch::Receiver<State>,
    write_timeout: Duration,
}

impl Session {
    /// Create a session for an authenticated identity
    #[must_use]
    pub fn new(identity: NodeIdentity) -> Self {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (state, state_rx) = watch::channel(State::Open);

        Self {
            handle: SessionHandle {
                id: Uuid::new_v4(),
                identity,
                outbound,
                state: Arc::new(state),
            },
            outbound_rx,
            state_rx,
            write_timeout: WRITE_TIMEOUT,
        }
    }

    /// Give up on the node when a single frame takes longer than `timeout`
    /// to write
    #[must_use]
    pub const fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Handle to register and send through
    #[must_use]
    pub const fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Run the session until the node disconnects, a write fails or the
    /// session is superseded
    ///
    /// Deregisters from `registry` on the way out. Removal is conditional on
    /// the registry still holding this session, so a superseded session never
    /// evicts its replacement.
    pub async fn run<R, W, E>(
        self,
        reader: R,
        writer: W,
        registry: Arc<ConnectionRegistry>,
        dispatcher: Arc<ResponseDispatcher>,
    ) -> SessionEnd
    where
        R: Stream<Item = std::result::Result<Message, E>> + Unpin + Send,
        E: Display,
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: Display + Send,
    {
        let Self {
            handle,
            outbound_rx,
            state_rx,
            write_timeout,
        } = self;
        let identity = handle.identity();

        let mut writer_task = tokio::spawn(write_loop(
            writer,
            outbound_rx,
            state_rx.clone(),
            identity.node_id,
            write_timeout,
        ));

        let end = read_loop(reader, state_rx, &mut writer_task, identity, &dispatcher).await;

        match &end {
            SessionEnd::Superseded => {
                tracing::warn!(
                    node_id = %identity.node_id,
                    session_id = %handle.id(),
                    "connection superseded, closing it"
                );
                let close = Outbound::Close {
                    code: close_code::NORMAL,
                    reason: SUPERSEDED_REASON,
                };
                let flush = async {
                    if handle.outbound.send(close).await.is_ok() {
                        let _ = (&mut writer_task).await;
                    }
                };
                if tokio::time::timeout(CLOSE_GRACE, flush).await.is_err() {
                    tracing::debug!(node_id = %identity.node_id, "close frame not flushed in time");
                }
            }
            SessionEnd::PeerClosed(Some(code))
                if *code == close_code::NORMAL || *code == close_code::AWAY =>
            {
                tracing::info!(node_id = %identity.node_id, code, "node closed connection");
            }
            SessionEnd::PeerClosed(code) => {
                tracing::warn!(node_id = %identity.node_id, ?code, "node closed connection unexpectedly");
            }
            SessionEnd::StreamEnded => {
                tracing::info!(node_id = %identity.node_id, "connection ended");
            }
            SessionEnd::TransportError(e) => {
                tracing::error!(node_id = %identity.node_id, error = %e, "connection failed");
            }
        }

        writer_task.abort();
        registry.remove(identity.node_id, &handle).await;

        end
    }
}

async fn read_loop<R, E>(
    mut reader: R,
    mut state_rx: watch::Receiver<State>,
    writer_task: &mut JoinHandle<Result<()>>,
    identity: NodeIdentity,
    dispatcher: &Arc<ResponseDispatcher>,
) -> SessionEnd
where
    R: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        tokio::select! {
            biased;

            _ = state_rx.wait_for(|state| *state == State::Superseded) => return SessionEnd::Superseded,

            written = &mut *writer_task => {
                let reason = match written {
                    Ok(Err(e)) => e.to_string(),
                    Ok(Ok(())) => "writer stopped".to_string(),
                    Err(e) => format!("writer task failed: {e}"),
                };
                return SessionEnd::TransportError(reason);
            }

            frame = reader.next() => {
                let parsed = match frame {
                    None => return SessionEnd::StreamEnded,
                    Some(Err(e)) => return SessionEnd::TransportError(e.to_string()),
                    Some(Ok(Message::Close(frame))) => {
                        return SessionEnd::PeerClosed(frame.map(|f| f.code));
                    }
                    Some(Ok(Message::Text(text))) => serde_json::from_str::<NodeResponse>(text.as_str()),
                    Some(Ok(Message::Binary(bytes))) => serde_json::from_slice::<NodeResponse>(&bytes),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                };

                match parsed {
                    Ok(response) => {
                        tracing::debug!(
                            node_id = %identity.node_id,
                            request_id = %response.request_id,
                            "received reply"
                        );
                        let dispatcher = Arc::clone(dispatcher);
                        tokio::spawn(async move {
                            dispatcher.dispatch(identity, response).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(
                            node_id = %identity.node_id,
                            error = %e,
                            "failed to parse node frame"
                        );
                    }
                }
            }
        }
    }
}

/// Returns only after a failed or timed out write, or once the close frame
/// of a superseded session has been sent
async fn write_loop<W>(
    mut writer: W,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    state_rx: watch::Receiver<State>,
    node_id: Uuid,
    write_timeout: Duration,
) -> Result<()>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    while let Some(frame) = outbound_rx.recv().await {
        match frame {
            Outbound::Text { text, ack } => {
                if let Err(e) = check_open(*state_rx.borrow(), node_id) {
                    let _ = ack.send(Err(e));
                    continue;
                }
                let written =
                    tokio::time::timeout(write_timeout, writer.send(Message::Text(text.into())))
                        .await;
                let failure = match written {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(_) => Some("write timed out".to_string()),
                };
                match failure {
                    None => {
                        let _ = ack.send(Ok(()));
                    }
                    Some(reason) => {
                        let _ = ack.send(Err(Error::Transport(reason.clone())));
                        return Err(Error::Transport(reason));
                    }
                }
            }
            Outbound::Close { code, reason } => {
                let frame = CloseFrame {
                    code,
                    reason: reason.into(),
                };
                let _ = writer.send(Message::Close(Some(frame))).await;
                return Ok(());
            }
        }
    }

    Ok(())
}
