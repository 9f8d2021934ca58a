//! Broker backend trait

use async_trait::async_trait;
use thiserror::Error;

use crate::message::QueueMessage;

/// Errors from broker operations
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Queue does not exist: {0}")]
    QueueNotFound(String),

    #[error("Topic does not exist: {0}")]
    TopicNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Provider call failed: {0}")]
    Provider(String),
}

/// Parameters for a single receive call
#[derive(Debug, Clone, Copy)]
pub struct ReceiveOptions {
    /// Batch size per receive call (providers cap this at 10)
    pub max_messages: i32,
    /// Seconds a received-but-undeleted message stays hidden
    pub visibility_timeout: i32,
    /// Long-poll wait in seconds; 0 returns immediately
    pub wait_time_seconds: i32,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 10,
            visibility_timeout: 120,
            wait_time_seconds: 0,
        }
    }
}

/// Abstract queue/topic provider backend.
///
/// Queue addresses are provider-native delivery endpoints (URLs for managed
/// providers); topic addresses are provider resource identifiers. Both are
/// opaque to the engine, which only caches and passes them back.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Create a queue, returning its address
    async fn create_queue(&self, name: &str) -> Result<String, BrokerError>;

    /// List queue addresses, optionally filtered by name prefix
    async fn list_queues(&self, prefix: Option<&str>) -> Result<Vec<String>, BrokerError>;

    /// Delete a queue by address
    async fn delete_queue(&self, queue_url: &str) -> Result<(), BrokerError>;

    /// Create a topic, returning its address
    async fn create_topic(&self, name: &str) -> Result<String, BrokerError>;

    /// List all topic addresses
    async fn list_topics(&self) -> Result<Vec<String>, BrokerError>;

    /// Delete a topic by address
    async fn delete_topic(&self, topic: &str) -> Result<(), BrokerError>;

    /// Subscribe a queue endpoint to a topic
    async fn subscribe(&self, topic: &str, endpoint: &str) -> Result<(), BrokerError>;

    /// Publish a message to a topic, fanning out to subscribed queues.
    /// Returns the provider-assigned message id.
    async fn publish(&self, topic: &str, body: String) -> Result<String, BrokerError>;

    /// Send a message directly to a queue, returning its message id
    async fn send_message(&self, queue_url: &str, body: String) -> Result<String, BrokerError>;

    /// Receive a batch of messages from a queue
    async fn receive_message(
        &self,
        queue_url: &str,
        options: &ReceiveOptions,
    ) -> Result<Vec<QueueMessage>, BrokerError>;

    /// Delete a message using the receipt handle from its last receive
    async fn delete_message(&self, queue_url: &str, receipt_handle: &str)
        -> Result<(), BrokerError>;

    /// Reset the visibility window of a received message. A timeout of zero
    /// makes the message immediately eligible for redelivery.
    async fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout: i32,
    ) -> Result<(), BrokerError>;
}
