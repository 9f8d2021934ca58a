//! Provider-agnostic event/queue consumer
//!
//! Provisions queues subscribed to a named topic, polls them on a fixed
//! interval, and dispatches received messages to registered handlers under a
//! bounded concurrency budget. Handlers settle each message with ack (delete)
//! or nack (immediate redelivery); unsettled messages come back once their
//! visibility window expires.
//!
//! Backends implement the [`Broker`] trait: `relayq-memory` for in-process
//! development and tests, `relayq-aws` for the managed services.

mod consumer;
mod delivery;
mod dispatch;
pub mod error;
pub mod handler;
pub mod options;
pub mod provision;

pub use consumer::EventConsumer;
pub use error::EventsError;
pub use handler::{handler_fn, Delivery, EventHandler, HandlerError};
pub use options::ConsumerOptions;
pub use provision::{queue_url_to_arn, Provisioner};

pub use relayq_core::{Broker, BrokerError, QueueMessage, ReceiveOptions};
