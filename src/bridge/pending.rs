//! Deadline tracking for requests awaiting a node reply

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::broker::ResponsePublisher;
use crate::nodes::CloudResponse;

/// Request error published when a node does not answer in time
pub const TIMEOUT_ERROR: &str = "timeout";

/// Requests sent to nodes and not yet answered
///
/// Each tracked request owns a timer task. Whichever happens first, the reply
/// or the timer, removes the entry; the other side then finds nothing and does
/// not publish. That keeps the cloud at one response per request.
pub struct PendingRequests {
    timeout: Duration,
    publisher: Arc<dyn ResponsePublisher>,
    entries: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl PendingRequests {
    /// Create a tracker publishing timeouts through `publisher`
    #[must_use]
    pub fn new(timeout: Duration, publisher: Arc<dyn ResponsePublisher>) -> Self {
        Self {
            timeout,
            publisher,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Configured deadline
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start the deadline for `correlation_id`
    pub async fn track(&self, correlation_id: &str) {
        let mut entries = self.entries.lock().await;

        let timer = {
            let entries = Arc::clone(&self.entries);
            let publisher = Arc::clone(&self.publisher);
            let timeout = self.timeout;
            let id = correlation_id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if entries.lock().await.remove(&id).is_none() {
                    return;
                }
                tracing::warn!(correlation_id = %id, ?timeout, "node did not answer in time");
                let response = CloudResponse::request_error(TIMEOUT_ERROR);
                if let Err(e) = publisher.publish(&id, &response).await {
                    tracing::error!(correlation_id = %id, error = %e, "failed to publish timeout");
                }
            })
        };

        if let Some(previous) = entries.insert(correlation_id.to_string(), timer) {
            tracing::warn!(correlation_id, "correlation id reused while pending");
            previous.abort();
        }
    }

    /// Stop tracking `correlation_id`
    ///
    /// Returns false if it was not pending, either because it already timed
    /// out or because it was never tracked.
    pub async fn complete(&self, correlation_id: &str) -> bool {
        match self.entries.lock().await.remove(correlation_id) {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }

    /// Number of requests awaiting a reply
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether nothing is pending
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
