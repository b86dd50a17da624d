//! AMQP 0.9.1 broker connection (RabbitMQ)

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use secrecy::ExposeSecret;

use super::pool::WorkerPool;
use super::retry::{RetryPolicy, retry};
use super::{BrokerDelivery, ResponsePublisher};
use crate::bridge::{Correlator, Routed};
use crate::config::BrokerConfig;
use crate::nodes::CloudResponse;
use crate::{Error, Result};

const CONSUMER_TAG: &str = "cloud-connector";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Broker connection with one channel shared by consuming and publishing
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
    requests_queue: String,
    responses_queue: String,
    max_in_flight: usize,
}

impl AmqpBroker {
    /// Connect, open a channel and declare both queues
    ///
    /// # Errors
    ///
    /// Returns `BrokerUnavailable` if the broker cannot be reached within the
    /// retry budget, or a broker error if channel setup fails
    pub async fn connect(config: &BrokerConfig) -> Result<Self> {
        let policy = RetryPolicy::with_retries(config.connect_retries);
        let connection = retry(&policy, "connect to broker", || {
            Connection::connect(config.url.expose_secret(), ConnectionProperties::default())
        })
        .await
        .map_err(|e| Error::BrokerUnavailable(format!("failed to connect: {e}")))?;

        connection.on_error(|e| {
            tracing::error!(error = %e, "broker connection error");
        });

        let channel = connection.create_channel().await?;
        for queue in [&config.requests_queue, &config.responses_queue] {
            channel
                .queue_declare(queue, QueueDeclareOptions::default(), FieldTable::default())
                .await?;
        }
        channel
            .basic_qos(config.prefetch, BasicQosOptions::default())
            .await?;

        tracing::info!(
            requests = %config.requests_queue,
            responses = %config.responses_queue,
            prefetch = config.prefetch,
            "connected to broker"
        );

        Ok(Self {
            connection,
            channel,
            requests_queue: config.requests_queue.clone(),
            responses_queue: config.responses_queue.clone(),
            max_in_flight: config.max_in_flight,
        })
    }

    /// Consume cloud requests until the broker goes away
    ///
    /// Each delivery is routed on its own task, at most `max_in_flight` at a
    /// time, and acked once routed.
    ///
    /// # Errors
    ///
    /// Returns `BrokerUnavailable` when the consumer errors or ends. There is
    /// no other way out of this function.
    pub async fn run(&self, correlator: Arc<Correlator>) -> Result<()> {
        let mut consumer = self
            .channel
            .basic_consume(
                &self.requests_queue,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        tracing::info!(queue = %self.requests_queue, "consuming cloud requests");

        let pool = WorkerPool::new(self.max_in_flight);

        while let Some(delivery) = consumer.next().await {
            let delivery = delivery.map_err(|e| Error::BrokerUnavailable(e.to_string()))?;
            let Delivery {
                properties,
                data,
                acker,
                ..
            } = delivery;

            let correlation_id = properties
                .correlation_id()
                .as_ref()
                .map(|id| id.as_str().to_string())
                .unwrap_or_default();
            if correlation_id.is_empty() {
                tracing::warn!("delivery has no correlation id");
            }

            let correlator = Arc::clone(&correlator);
            pool.spawn(async move {
                let message = BrokerDelivery {
                    correlation_id: correlation_id.clone(),
                    body: data,
                };
                match correlator.handle_cloud_request(message).await {
                    Ok(Routed::Delivered(node_id)) => {
                        let pending = correlator.pending_len().await;
                        tracing::debug!(
                            correlation_id = %correlation_id,
                            node_id = %node_id,
                            pending,
                            "request delivered"
                        );
                    }
                    Ok(Routed::Rejected(reason)) => {
                        tracing::warn!(correlation_id = %correlation_id, reason = %reason, "rejected cloud request");
                    }
                    Err(e) => {
                        tracing::error!(correlation_id = %correlation_id, error = %e, "failed to answer cloud request");
                    }
                }
                if let Err(e) = acker.ack(BasicAckOptions::default()).await {
                    tracing::error!(error = %e, "failed to ack delivery");
                }
            })
            .await;
        }

        tracing::warn!(in_flight = pool.in_flight(), "request consumer ended");
        Err(Error::BrokerUnavailable(
            "request consumer ended".to_string(),
        ))
    }

    /// Close the connection
    ///
    /// # Errors
    ///
    /// Returns error if the close handshake fails
    pub async fn close(&self) -> Result<()> {
        self.connection.close(200, "shutting down").await?;
        Ok(())
    }
}

#[async_trait]
impl ResponsePublisher for AmqpBroker {
    async fn publish(&self, correlation_id: &str, response: &CloudResponse) -> Result<()> {
        let body = serde_json::to_vec(response)?;
        let properties = BasicProperties::default()
            .with_content_type(JSON_CONTENT_TYPE.into())
            .with_correlation_id(correlation_id.into());

        self.channel
            .basic_publish(
                "",
                &self.responses_queue,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await?
            .await?;

        tracing::debug!(correlation_id, "published response");
        Ok(())
    }
}
