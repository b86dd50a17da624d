//! Request/response correlation between the broker and node sessions
//!
//! Cloud commands arrive as broker deliveries and leave as node requests whose
//! `requestId` is the delivery's correlation id. Node replies come back through
//! the [`ResponseDispatcher`] and are published with that same id. Every
//! failure on the way in is answered with a `requestError` so the cloud never
//! waits on a request the bridge dropped.

pub mod dispatch;
pub mod pending;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::broker::{BrokerDelivery, ResponsePublisher};
use crate::nodes::{CloudRequest, CloudResponse, ConnectionRegistry, NodeIdentity, NodeResponse};
use crate::{Error, Result};

pub use dispatch::{ResponseDispatcher, ResponseHandler};
pub use pending::PendingRequests;

/// What happened to a cloud request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Written to the node's session
    Delivered(Uuid),

    /// Answered with a request error instead
    Rejected(String),
}

/// Routes cloud requests to nodes and node replies to the cloud
pub struct Correlator {
    registry: Arc<ConnectionRegistry>,
    publisher: Arc<dyn ResponsePublisher>,
    pending: Option<PendingRequests>,
}

impl Correlator {
    /// Create a correlator without request timeouts
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, publisher: Arc<dyn ResponsePublisher>) -> Self {
        Self {
            registry,
            publisher,
            pending: None,
        }
    }

    /// Answer requests with a `timeout` error when the node stays silent
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.pending = Some(PendingRequests::new(timeout, Arc::clone(&self.publisher)));
        self
    }

    /// Route one broker delivery to its node
    ///
    /// # Errors
    ///
    /// Returns error only if a request error could not be published
    pub async fn handle_cloud_request(&self, delivery: BrokerDelivery) -> Result<Routed> {
        let BrokerDelivery {
            correlation_id,
            body,
        } = delivery;

        match self.route(&correlation_id, &body).await {
            Ok(node_id) => Ok(Routed::Delivered(node_id)),
            Err(e) => {
                let message = request_error(&e);
                self.publisher
                    .publish(&correlation_id, &CloudResponse::request_error(message.clone()))
                    .await?;
                Ok(Routed::Rejected(message))
            }
        }
    }

    /// Requests awaiting a reply, zero when timeouts are off
    pub async fn pending_len(&self) -> usize {
        match &self.pending {
            Some(pending) => pending.len().await,
            None => 0,
        }
    }

    async fn route(&self, correlation_id: &str, body: &[u8]) -> Result<Uuid> {
        let request: CloudRequest = serde_json::from_slice(body)
            .map_err(|e| Error::MalformedMessage(format!("bad request body: {e}")))?;

        let node_id = Uuid::parse_str(&request.node_id).map_err(|e| {
            Error::MalformedMessage(format!("bad node id {:?}: {e}", request.node_id))
        })?;

        let session = self
            .registry
            .lookup(&node_id)
            .await
            .ok_or_else(|| Error::NodeUnreachable(request.node_id.clone()))?;

        // Without a correlation id there is nothing to key the deadline on
        let pending = self.pending.as_ref().filter(|_| !correlation_id.is_empty());
        if let Some(pending) = pending {
            pending.track(correlation_id).await;
        }

        if let Err(e) = session.send(&request.to_node(correlation_id)).await {
            if let Some(pending) = pending {
                pending.complete(correlation_id).await;
            }
            return Err(Error::Transport(format!("failed to deliver request: {e}")));
        }

        Ok(node_id)
    }
}

/// Text published as `requestError` for a request that never reached a node
fn request_error(e: &Error) -> String {
    match e {
        Error::MalformedMessage(detail) | Error::Transport(detail) => detail.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ResponseHandler for Correlator {
    fn name(&self) -> &'static str {
        "cloud-publisher"
    }

    async fn handle(&self, node: NodeIdentity, response: &NodeResponse) -> Result<()> {
        if let Some(pending) = &self.pending
            && !response.request_id.is_empty()
            && !pending.complete(&response.request_id).await
        {
            tracing::warn!(
                node_id = %node.node_id,
                request_id = %response.request_id,
                "dropping reply for a request that is not pending"
            );
            return Ok(());
        }

        self.publisher
            .publish(&response.request_id, &response.to_cloud())
            .await
    }
}
