//! Fan-out of node replies to registered handlers

use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;
use crate::nodes::{NodeIdentity, NodeResponse};

/// Receives every reply parsed from a node session
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Handle one reply from `node`
    ///
    /// # Errors
    ///
    /// Errors are logged by the dispatcher and do not reach other handlers
    async fn handle(&self, node: NodeIdentity, response: &NodeResponse) -> Result<()>;
}

/// Ordered list of response handlers
///
/// Handlers are registered during startup, before any session is accepted,
/// then the dispatcher is shared read-only.
#[derive(Default)]
pub struct ResponseDispatcher {
    handlers: Vec<Arc<dyn ResponseHandler>>,
}

impl ResponseDispatcher {
    /// Create a dispatcher with no handlers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler; handlers run in registration order
    pub fn register(&mut self, handler: Arc<dyn ResponseHandler>) -> &mut Self {
        tracing::debug!(handler = handler.name(), "registered response handler");
        self.handlers.push(handler);
        self
    }

    /// Number of registered handlers
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run every handler for one reply
    ///
    /// Returns how many handlers failed.
    pub async fn dispatch(&self, node: NodeIdentity, response: NodeResponse) -> usize {
        let mut failed = 0;
        for handler in &self.handlers {
            if let Err(e) = handler.handle(node, &response).await {
                failed += 1;
                tracing::error!(
                    handler = handler.name(),
                    node_id = %node.node_id,
                    request_id = %response.request_id,
                    error = %e,
                    "response handler failed"
                );
            }
        }
        failed
    }
}
