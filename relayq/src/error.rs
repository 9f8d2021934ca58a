//! Error types for the consumer engine

use relayq_core::BrokerError;
use thiserror::Error;

/// Errors surfaced by the consumer engine.
///
/// The propagation mode (`ConsumerOptions::propagate_errors`) decides whether
/// receive, send, and delivery-control failures reach the caller or are
/// logged and absorbed. Configuration and provisioning failures always reach
/// the caller.
#[derive(Debug, Error)]
pub enum EventsError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provisioning failed for {resource}: {source}")]
    Provisioning {
        resource: String,
        #[source]
        source: BrokerError,
    },

    #[error("Receive failed for queue {queue}: {source}")]
    Receive {
        queue: String,
        #[source]
        source: BrokerError,
    },

    #[error("Send failed for queue {queue}: {source}")]
    Send {
        queue: String,
        #[source]
        source: BrokerError,
    },

    #[error("Delivery control failed for queue {queue}: {source}")]
    DeliveryControl {
        queue: String,
        #[source]
        source: BrokerError,
    },

    #[error("Queue is not registered: {0}")]
    UnknownQueue(String),

    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
