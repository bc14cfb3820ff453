//! Inbound queue consumption.
//!
//! [`Consumer`] long-polls a [`MessageQueue`], hands each body to the
//! [`Conductor`] and deletes the message only once it was handled. A message
//! whose handling failed stays on the queue and is redelivered after its
//! visibility timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::error::DisplayErrorContext;
use iris_conductor::Conductor;
use tokio_util::sync::CancellationToken;

use crate::config::QueueConfig;

/// Pause after a failed receive before polling again.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Failed to receive messages: {0}")]
    Receive(String),

    #[error("Failed to delete message: {0}")]
    Delete(String),
}

/// One message pulled off the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: Option<String>,
    /// Token needed to delete this delivery of the message.
    pub receipt_handle: String,
    pub body: String,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Wait for the next batch. May return an empty batch.
    async fn receive(&self) -> Result<Vec<ReceivedMessage>, QueueError>;

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;
}

// ---------------------------------------------------------------------------
// SqsQueue
// ---------------------------------------------------------------------------

pub struct SqsQueue {
    client: aws_sdk_sqs::Client,
    config: QueueConfig,
}

impl SqsQueue {
    /// Build a client from the default AWS credential chain.
    pub async fn connect(config: QueueConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        Self {
            client: aws_sdk_sqs::Client::new(&sdk_config),
            config,
        }
    }
}

#[async_trait]
impl MessageQueue for SqsQueue {
    async fn receive(&self) -> Result<Vec<ReceivedMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.config.queue_url)
            .max_number_of_messages(self.config.max_messages)
            .wait_time_seconds(self.config.wait_time_secs)
            .send()
            .await
            .map_err(|e| QueueError::Receive(DisplayErrorContext(&e).to_string()))?;

        let messages = output
            .messages()
            .iter()
            .filter_map(|m| {
                Some(ReceivedMessage {
                    message_id: m.message_id().map(str::to_string),
                    receipt_handle: m.receipt_handle()?.to_string(),
                    body: m.body().unwrap_or_default().to_string(),
                })
            })
            .collect();
        Ok(messages)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.config.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Delete(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

/// Counts for one received batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub received: usize,
    /// Handled and deleted from the queue.
    pub acked: usize,
    /// Left on the queue for redelivery.
    pub retained: usize,
}

pub struct Consumer {
    queue: Arc<dyn MessageQueue>,
    conductor: Conductor,
}

impl Consumer {
    pub fn new(queue: Arc<dyn MessageQueue>, conductor: Conductor) -> Self {
        Self { queue, conductor }
    }

    /// Receive until `cancel` fires.
    ///
    /// Cancellation interrupts a pending long poll but never a batch that is
    /// already being handled.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!("Queue consumer started");
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.queue.receive() => received,
            };

            match received {
                Ok(messages) => {
                    self.handle_batch(messages).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Queue receive failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }
        tracing::info!("Queue consumer stopped");
    }

    /// Receive and handle a single batch.
    pub async fn process_batch(&self) -> Result<BatchStats, QueueError> {
        let messages = self.queue.receive().await?;
        Ok(self.handle_batch(messages).await)
    }

    /// Messages are handled in order; a settings update followed by a
    /// dispatch for the same client must see the update.
    async fn handle_batch(&self, messages: Vec<ReceivedMessage>) -> BatchStats {
        let mut stats = BatchStats {
            received: messages.len(),
            ..Default::default()
        };

        for message in messages {
            match self.conductor.handle_raw(&message.body).await {
                Ok(handled) => {
                    tracing::debug!(message_id = ?message.message_id, ?handled, "Message handled");
                    match self.queue.delete(&message.receipt_handle).await {
                        Ok(()) => stats.acked += 1,
                        Err(e) => {
                            tracing::warn!(
                                message_id = ?message.message_id,
                                error = %e,
                                "Handled message could not be deleted, it will be redelivered"
                            );
                            stats.retained += 1;
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(
                        message_id = ?message.message_id,
                        error = %e,
                        "Message handling failed, leaving it for redelivery"
                    );
                    stats.retained += 1;
                }
            }
        }

        if stats.received > 0 {
            tracing::debug!(
                received = stats.received,
                acked = stats.acked,
                retained = stats.retained,
                "Batch processed"
            );
        }
        stats
    }
}
