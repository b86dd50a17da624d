//! Shared test utilities

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message};
use cloud_connector::bridge::{Correlator, ResponseDispatcher, ResponseHandler};
use cloud_connector::broker::{BrokerDelivery, ResponsePublisher};
use cloud_connector::db::{self, NodeRepo};
use cloud_connector::nodes::{
    CloudResponse, ConnectionRegistry, NodeIdentity, NodeRequest, Session, SessionEnd,
    SessionHandle,
};
use cloud_connector::{DbPool, DirectoryStore, NodeRecord, Result};
use futures::channel::mpsc as fmpsc;
use futures::stream::{self, BoxStream};
use futures::{Sink, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// How long a test waits for something that should happen
pub const WAIT: Duration = Duration::from_secs(2);

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// A fresh node identity
#[must_use]
pub fn identity() -> NodeIdentity {
    NodeIdentity {
        node_id: Uuid::new_v4(),
        organization_id: Uuid::new_v4(),
    }
}

/// What the registry told the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryEvent {
    Created(Uuid),
    Reconnected(Uuid, Uuid),
    LastSeen(Uuid),
}

/// Directory store that records calls before delegating to `SQLite`
pub struct RecordingDirectory {
    inner: NodeRepo,
    events: Mutex<Vec<DirectoryEvent>>,
}

impl RecordingDirectory {
    pub fn new() -> Self {
        Self {
            inner: NodeRepo::new(setup_test_db()),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<DirectoryEvent> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: DirectoryEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl DirectoryStore for RecordingDirectory {
    fn get_node(&self, id: Uuid) -> Result<Option<NodeRecord>> {
        self.inner.get_node(id)
    }

    fn create_node(&self, id: Uuid, organization_id: Uuid, display_name: &str) -> Result<NodeRecord> {
        self.record(DirectoryEvent::Created(id));
        self.inner.create_node(id, organization_id, display_name)
    }

    fn reconnect_node(&self, id: Uuid, organization_id: Uuid) -> Result<NodeRecord> {
        self.record(DirectoryEvent::Reconnected(id, organization_id));
        self.inner.reconnect_node(id, organization_id)
    }

    fn update_last_seen(&self, id: Uuid) -> Result<()> {
        self.record(DirectoryEvent::LastSeen(id));
        self.inner.update_last_seen(id)
    }
}

/// Publisher that hands every publication to the test
pub struct CollectingPublisher {
    tx: mpsc::UnboundedSender<(String, CloudResponse)>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(String, CloudResponse)>>,
}

impl CollectingPublisher {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Next publication, failing the test if none arrives in time
    pub async fn next(&self) -> (String, CloudResponse) {
        tokio::time::timeout(WAIT, self.rx.lock().await.recv())
            .await
            .expect("no response published in time")
            .expect("publisher closed")
    }

    /// Whether something is published within `within`
    pub async fn nothing_within(&self, within: Duration) -> bool {
        tokio::time::timeout(within, self.rx.lock().await.recv())
            .await
            .is_err()
    }
}

#[async_trait]
impl ResponsePublisher for CollectingPublisher {
    async fn publish(&self, correlation_id: &str, response: &CloudResponse) -> Result<()> {
        let _ = self.tx.send((correlation_id.to_string(), response.clone()));
        Ok(())
    }
}

/// Everything between the broker and the nodes, wired like the daemon does
pub struct Bridge {
    pub directory: Arc<RecordingDirectory>,
    pub registry: Arc<ConnectionRegistry>,
    pub publisher: Arc<CollectingPublisher>,
    pub correlator: Arc<Correlator>,
    pub dispatcher: Arc<ResponseDispatcher>,
}

impl Bridge {
    pub fn new() -> Self {
        Self::build(None, Vec::new())
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Some(timeout), Vec::new())
    }

    /// Register `before` ahead of the correlator
    pub fn with_handlers(before: Vec<Arc<dyn ResponseHandler>>) -> Self {
        Self::build(None, before)
    }

    fn build(timeout: Option<Duration>, before: Vec<Arc<dyn ResponseHandler>>) -> Self {
        let directory = Arc::new(RecordingDirectory::new());
        let registry = Arc::new(ConnectionRegistry::new(directory.clone()));
        let publisher = Arc::new(CollectingPublisher::new());

        let mut correlator = Correlator::new(Arc::clone(&registry), publisher.clone());
        if let Some(timeout) = timeout {
            correlator = correlator.with_timeout(timeout);
        }
        let correlator = Arc::new(correlator);

        let mut dispatcher = ResponseDispatcher::new();
        for handler in before {
            dispatcher.register(handler);
        }
        dispatcher.register(correlator.clone());

        Self {
            directory,
            registry,
            publisher,
            correlator,
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Register a node and run its session over in-memory channels
    pub async fn connect(&self, identity: NodeIdentity) -> FakeNode {
        let (writer, from_bridge) = fmpsc::unbounded::<Message>();
        self.connect_over(Session::new(identity), writer, from_bridge.boxed())
            .await
    }

    /// Register a node that accepts one frame and then never reads again
    pub async fn connect_stalled(&self, identity: NodeIdentity, write_timeout: Duration) -> FakeNode {
        let (writer, from_bridge) = fmpsc::channel::<Message>(0);
        let session = Session::new(identity).with_write_timeout(write_timeout);
        self.connect_over(session, writer, from_bridge.boxed()).await
    }

    async fn connect_over<W>(
        &self,
        session: Session,
        writer: W,
        from_bridge: BoxStream<'static, Message>,
    ) -> FakeNode
    where
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: std::fmt::Display + Send,
    {
        let handle = session.handle().clone();
        self.registry.register(handle.clone()).await;

        let (to_bridge, reader) = fmpsc::unbounded::<std::result::Result<Message, std::io::Error>>();
        let task = tokio::spawn(session.run(
            reader,
            writer,
            Arc::clone(&self.registry),
            Arc::clone(&self.dispatcher),
        ));

        FakeNode {
            handle,
            to_bridge,
            from_bridge,
            task,
        }
    }

    /// Feed a broker delivery to the correlator
    pub async fn deliver(&self, correlation_id: &str, body: serde_json::Value) {
        self.deliver_raw(correlation_id, body.to_string().into_bytes())
            .await;
    }

    pub async fn deliver_raw(&self, correlation_id: &str, body: Vec<u8>) {
        self.correlator
            .handle_cloud_request(BrokerDelivery {
                correlation_id: correlation_id.to_string(),
                body,
            })
            .await
            .expect("publishing never fails in tests");
    }
}

/// The node end of an in-memory session
pub struct FakeNode {
    pub handle: SessionHandle,
    to_bridge: fmpsc::UnboundedSender<std::result::Result<Message, std::io::Error>>,
    from_bridge: BoxStream<'static, Message>,
    task: JoinHandle<SessionEnd>,
}

impl FakeNode {
    /// Next frame written by the bridge
    pub async fn next_frame(&mut self) -> Option<Message> {
        tokio::time::timeout(WAIT, self.from_bridge.next())
            .await
            .expect("no frame from bridge in time")
    }

    /// Next request written by the bridge
    pub async fn next_request(&mut self) -> NodeRequest {
        match self.next_frame().await {
            Some(Message::Text(text)) => serde_json::from_str(text.as_str()).expect("bad request frame"),
            other => panic!("expected request frame, got {other:?}"),
        }
    }

    /// Drop the node's receiving end so the bridge's next write fails
    pub fn stop_reading(&mut self) {
        self.from_bridge = stream::empty().boxed();
    }

    /// Send a JSON reply
    pub fn reply(&self, value: serde_json::Value) {
        self.send_text(&value.to_string());
    }

    /// Send an arbitrary text frame
    pub fn send_text(&self, text: &str) {
        let _ = self
            .to_bridge
            .unbounded_send(Ok(Message::Text(text.to_string().into())));
    }

    /// Send a close frame
    pub fn close(&self, code: u16) {
        let frame = CloseFrame {
            code,
            reason: String::new().into(),
        };
        let _ = self.to_bridge.unbounded_send(Ok(Message::Close(Some(frame))));
    }

    /// Wait for the session loop to end
    pub async fn finished(self) -> SessionEnd {
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("session did not end in time")
            .expect("session task panicked")
    }
}
