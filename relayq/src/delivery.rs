//! Ack/nack delivery control

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::EventsError;
use relayq_core::{Broker, QueueMessage};

/// Settles messages against their queues using the process-lifetime address
/// cache.
///
/// Addresses are written once at registration (or first send) and never
/// mutated afterwards.
pub(crate) struct DeliveryControl {
    broker: Arc<dyn Broker>,
    /// Logical queue name -> provider address
    addresses: DashMap<String, String>,
    propagate_errors: bool,
}

impl DeliveryControl {
    pub fn new(broker: Arc<dyn Broker>, propagate_errors: bool) -> Self {
        Self {
            broker,
            addresses: DashMap::new(),
            propagate_errors,
        }
    }

    /// Record the provider address for a logical queue name. First write
    /// wins; later calls for the same name are ignored.
    pub fn cache_address(&self, name: &str, address: &str) {
        self.addresses
            .entry(name.to_string())
            .or_insert_with(|| address.to_string());
    }

    pub fn cached_address(&self, name: &str) -> Option<String> {
        self.addresses.get(name).map(|address| address.clone())
    }

    /// Delete the message from its queue. Each call issues a delete; acking
    /// the same message twice is not treated as idempotent here.
    pub async fn ack(&self, queue_name: &str, message: &QueueMessage) -> Result<(), EventsError> {
        let Some(url) = self.cached_address(queue_name) else {
            return self.unknown_queue(queue_name, "ack");
        };

        match self.broker.delete_message(&url, &message.receipt_handle).await {
            Ok(()) => {
                debug!(queue = %queue_name, message_id = %message.message_id, "Message acked");
                Ok(())
            }
            Err(source) => {
                warn!(queue = %queue_name, message_id = %message.message_id, error = %source,
                    "Ack failed");
                if self.propagate_errors {
                    Err(EventsError::DeliveryControl {
                        queue: queue_name.to_string(),
                        source,
                    })
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Zero the message's visibility window so the queue redelivers it
    /// immediately instead of waiting out the original timeout
    pub async fn nack(&self, queue_name: &str, message: &QueueMessage) -> Result<(), EventsError> {
        let Some(url) = self.cached_address(queue_name) else {
            return self.unknown_queue(queue_name, "nack");
        };

        match self
            .broker
            .change_message_visibility(&url, &message.receipt_handle, 0)
            .await
        {
            Ok(()) => {
                debug!(queue = %queue_name, message_id = %message.message_id, "Message nacked");
                Ok(())
            }
            Err(source) => {
                warn!(queue = %queue_name, message_id = %message.message_id, error = %source,
                    "Nack failed");
                if self.propagate_errors {
                    Err(EventsError::DeliveryControl {
                        queue: queue_name.to_string(),
                        source,
                    })
                } else {
                    Ok(())
                }
            }
        }
    }

    fn unknown_queue(&self, queue_name: &str, operation: &str) -> Result<(), EventsError> {
        warn!(queue = %queue_name, operation = operation, "No cached address for queue");
        if self.propagate_errors {
            Err(EventsError::UnknownQueue(queue_name.to_string()))
        } else {
            Ok(())
        }
    }
}
