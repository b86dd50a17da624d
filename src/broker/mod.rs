//! Message broker adapter
//!
//! The cloud publishes commands to a requests queue and reads replies from a
//! responses queue, matching them by the AMQP `correlation_id` property. The
//! bridge only needs to publish replies; consuming is driven by
//! [`AmqpBroker::run`].

pub mod amqp;
pub mod pool;
pub mod retry;

use async_trait::async_trait;

use crate::Result;
use crate::nodes::CloudResponse;

pub use amqp::AmqpBroker;
pub use pool::WorkerPool;
pub use retry::RetryPolicy;

/// A command taken off the requests queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerDelivery {
    /// Broker correlation id, empty if the publisher set none
    pub correlation_id: String,

    /// Raw message body
    pub body: Vec<u8>,
}

/// Publishes replies for the cloud
#[async_trait]
pub trait ResponsePublisher: Send + Sync {
    /// Publish `response` tagged with `correlation_id`
    ///
    /// # Errors
    ///
    /// Returns error if the broker rejects or cannot take the message
    async fn publish(&self, correlation_id: &str, response: &CloudResponse) -> Result<()>;
}
