//! Message envelope returned by receive calls

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A message as seen by the consumer side.
///
/// The receipt handle identifies this particular receive of the message and
/// rotates on every redelivery; ack/nack must use the handle from the receive
/// that produced the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    /// Provider metadata (receive counts, timestamps) keyed by attribute name
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl QueueMessage {
    pub fn new(message_id: impl Into<String>, receipt_handle: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            receipt_handle: receipt_handle.into(),
            body: body.into(),
            attributes: HashMap::new(),
        }
    }
}
