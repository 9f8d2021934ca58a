//! Consumer facade and poll loop

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::delivery::DeliveryControl;
use crate::dispatch::{Dispatcher, PendingMessage};
use crate::error::EventsError;
use crate::handler::EventHandler;
use crate::options::ConsumerOptions;
use crate::provision::Provisioner;
use relayq_core::{Broker, QueueMessage};

/// One registered listener queue
#[derive(Clone)]
struct QueueRegistration {
    name: String,
    queue_url: String,
    handler: Arc<dyn EventHandler>,
}

/// Polling consumer over a broker backend.
///
/// [`initialize`](Self::initialize) provisions the topic,
/// [`register_queue`](Self::register_queue) provisions each listener queue
/// and subscribes it, and [`run`](Self::run) polls registered queues on the
/// listen interval, dispatching received messages into their handlers.
pub struct EventConsumer {
    broker: Arc<dyn Broker>,
    options: Arc<ConsumerOptions>,
    provisioner: Provisioner,
    delivery: Arc<DeliveryControl>,
    dispatcher: Dispatcher,
    topic_address: String,
    registrations: Mutex<Vec<QueueRegistration>>,
}

impl EventConsumer {
    /// Validate options and resolve the topic address
    pub async fn initialize(
        broker: Arc<dyn Broker>,
        options: ConsumerOptions,
    ) -> Result<Self, EventsError> {
        options.validate()?;
        let options = Arc::new(options);

        let provisioner = Provisioner::new(broker.clone(), options.clone());
        let topic_address = provisioner.ensure_topic(&options.topic_name).await?;
        if topic_address.is_empty() {
            return Err(EventsError::Configuration(format!(
                "resolved an empty address for topic {}",
                options.topic_name
            )));
        }

        let delivery = Arc::new(DeliveryControl::new(
            broker.clone(),
            options.propagate_errors,
        ));
        let dispatcher = Dispatcher::new(
            options.max_number_of_messages.clamp(1, 10) as usize,
            delivery.clone(),
        );

        info!(topic = %options.topic_name, address = %topic_address, "Consumer initialized");
        Ok(Self {
            broker,
            options,
            provisioner,
            delivery,
            dispatcher,
            topic_address,
            registrations: Mutex::new(Vec::new()),
        })
    }

    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    pub fn topic_address(&self) -> &str {
        &self.topic_address
    }

    /// Access to the provisioner, mainly for the caller-invoked retry helpers
    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    /// Provision a listener queue, subscribe it to the topic, and register
    /// its handler for polling
    pub async fn register_queue(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), EventsError> {
        let name = name.into();
        let provider_name = self.options.effective_queue_name(&name);

        let queue_url = self.provisioner.ensure_queue(&provider_name).await?;
        self.provisioner
            .subscribe(&queue_url, &self.topic_address)
            .await?;
        self.delivery.cache_address(&name, &queue_url);

        info!(queue = %name, url = %queue_url, "Queue registered");
        self.registrations.lock().push(QueueRegistration {
            name,
            queue_url,
            handler,
        });
        Ok(())
    }

    /// Serialize a payload as JSON and send it to a queue
    pub async fn send<T: Serialize>(&self, name: &str, payload: &T) -> Result<(), EventsError> {
        let body = serde_json::to_string(payload)?;
        self.send_raw(name, body).await
    }

    /// Send a raw body to a queue by logical name
    pub async fn send_raw(&self, name: &str, body: String) -> Result<(), EventsError> {
        let queue_url = self.resolve_queue_url(name).await?;

        match self.broker.send_message(&queue_url, body).await {
            Ok(message_id) => {
                debug!(queue = %name, message_id = %message_id, "Message sent");
                Ok(())
            }
            Err(source) => {
                warn!(queue = %name, error = %source, "Send failed");
                if self.options.propagate_errors {
                    Err(EventsError::Send {
                        queue: name.to_string(),
                        source,
                    })
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Delete a message from its queue
    pub async fn ack(&self, queue_name: &str, message: &QueueMessage) -> Result<(), EventsError> {
        self.delivery.ack(queue_name, message).await
    }

    /// Make a message immediately redeliverable
    pub async fn nack(&self, queue_name: &str, message: &QueueMessage) -> Result<(), EventsError> {
        self.delivery.nack(queue_name, message).await
    }

    /// Poll registered queues on the listen interval forever, dispatching
    /// received messages between cycles.
    ///
    /// With `propagate_errors` unset this never returns; with it set, the
    /// first receive failure ends the loop once its cycle (remaining queues
    /// plus dispatch) has completed.
    pub async fn run(&self) -> Result<(), EventsError> {
        info!(
            topic = %self.topic_address,
            interval_ms = self.options.listen_interval,
            "Consumer loop started"
        );

        loop {
            tokio::time::sleep(Duration::from_millis(self.options.listen_interval)).await;
            let first_error = self.poll_registered_queues().await;
            self.dispatcher.process_received_messages().await;

            if let Some(error) = first_error {
                if self.options.propagate_errors {
                    return Err(error);
                }
            }
        }
    }

    /// One receive call per registered queue, sequentially in registration
    /// order. Returns the first failure; later queues are still polled.
    async fn poll_registered_queues(&self) -> Option<EventsError> {
        let registrations: Vec<QueueRegistration> = self.registrations.lock().clone();
        let receive_options = self.options.receive_options();

        let mut first_error = None;
        for registration in registrations {
            match self
                .broker
                .receive_message(&registration.queue_url, &receive_options)
                .await
            {
                Ok(messages) => {
                    for message in messages {
                        self.dispatcher.enqueue(PendingMessage {
                            queue_name: registration.name.clone(),
                            handler: registration.handler.clone(),
                            message,
                        });
                    }
                }
                Err(source) => {
                    warn!(queue = %registration.name, error = %source, "Receive failed");
                    if first_error.is_none() {
                        first_error = Some(EventsError::Receive {
                            queue: registration.name.clone(),
                            source,
                        });
                    }
                }
            }
        }
        first_error
    }

    /// Resolve a logical queue name to its provider address, consulting the
    /// cache first and falling back to a name lookup
    async fn resolve_queue_url(&self, name: &str) -> Result<String, EventsError> {
        if let Some(url) = self.delivery.cached_address(name) {
            return Ok(url);
        }

        let provider_name = self.options.effective_queue_name(name);
        match self.provisioner.find_queue(&provider_name).await {
            Ok(Some(url)) => {
                self.delivery.cache_address(name, &url);
                Ok(url)
            }
            Ok(None) => Err(EventsError::UnknownQueue(name.to_string())),
            Err(source) => Err(EventsError::Provisioning {
                resource: format!("queue {provider_name}"),
                source,
            }),
        }
    }
}
