//! Handler trait and per-message delivery context

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;

use crate::delivery::DeliveryControl;
use crate::error::EventsError;
use relayq_core::QueueMessage;

/// Error type handlers may return. Failures are logged by the dispatch
/// engine and never abort the poll loop.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Caller-supplied message processor.
///
/// Each invocation receives one message and is responsible for settling it
/// with [`Delivery::ack`] or [`Delivery::nack`]; an unsettled message
/// reappears once its visibility window expires.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError>;
}

/// A received message together with the control handle for settling it
pub struct Delivery {
    queue_name: String,
    message: QueueMessage,
    control: Arc<DeliveryControl>,
}

impl Delivery {
    pub(crate) fn new(
        queue_name: String,
        message: QueueMessage,
        control: Arc<DeliveryControl>,
    ) -> Self {
        Self {
            queue_name,
            message,
            control,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn message(&self) -> &QueueMessage {
        &self.message
    }

    pub fn body(&self) -> &str {
        &self.message.body
    }

    /// Deserialize the JSON body produced by `EventConsumer::send`
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.message.body)
    }

    /// Delete the message from its queue
    pub async fn ack(&self) -> Result<(), EventsError> {
        self.control.ack(&self.queue_name, &self.message).await
    }

    /// Reset the message's visibility so it is immediately redeliverable
    pub async fn nack(&self) -> Result<(), EventsError> {
        self.control.nack(&self.queue_name, &self.message).await
    }
}

type BoxHandlerFn =
    Box<dyn Fn(Delivery) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

struct FnHandler(BoxHandlerFn);

#[async_trait]
impl EventHandler for FnHandler {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError> {
        (self.0)(delivery).await
    }
}

/// Adapt an async closure into an [`EventHandler`]
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(Box::new(move |delivery| Box::pin(f(delivery)))))
}
