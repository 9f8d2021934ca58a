//! Idempotent queue/topic provisioning

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::error::EventsError;
use crate::options::ConsumerOptions;
use relayq_core::{Broker, BrokerError};

/// Matches `https://{service}.{region}.{domain}/{account}/{name}` endpoints
static QUEUE_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https://(\w+)\.([\w-]+)\.([\w.]+)/(\w+)/([\w-]+)$").expect("static regex compile")
});

/// Rewrite an HTTP(S) queue endpoint into the resource-identifier form the
/// topic subscription call requires. Any other address form passes through
/// unchanged.
pub fn queue_url_to_arn(queue_url: &str) -> String {
    match QUEUE_URL_RE.captures(queue_url) {
        Some(caps) => format!("arn:aws:{}:{}:{}:{}", &caps[1], &caps[2], &caps[4], &caps[5]),
        None => queue_url.to_string(),
    }
}

/// Creates or discovers queues and topics and wires subscriptions.
///
/// Lookups run before every creation so repeated provisioning of the same
/// name resolves to the existing resource. A lookup failure is treated as
/// "not found" and falls through to creation rather than aborting.
pub struct Provisioner {
    broker: Arc<dyn Broker>,
    options: Arc<ConsumerOptions>,
}

impl Provisioner {
    pub(crate) fn new(broker: Arc<dyn Broker>, options: Arc<ConsumerOptions>) -> Self {
        Self { broker, options }
    }

    /// Resolve a topic address by name, creating the topic if no existing
    /// topic address contains the name
    pub async fn ensure_topic(&self, name: &str) -> Result<String, EventsError> {
        match self.find_topic(name).await {
            Ok(Some(address)) => return Ok(address),
            Ok(None) => {}
            Err(error) => {
                warn!(topic = %name, error = %error, "Topic lookup failed, creating");
            }
        }

        let address = self
            .broker
            .create_topic(name)
            .await
            .map_err(|source| EventsError::Provisioning {
                resource: format!("topic {name}"),
                source,
            })?;
        info!(topic = %name, address = %address, "Topic provisioned");
        Ok(address)
    }

    async fn find_topic(&self, name: &str) -> Result<Option<String>, BrokerError> {
        let topics = self.broker.list_topics().await?;
        Ok(topics.into_iter().find(|address| address.contains(name)))
    }

    /// Resolve a queue address by provider-side name, creating the queue if
    /// the name lookup comes back empty
    pub async fn ensure_queue(&self, name: &str) -> Result<String, EventsError> {
        match self.find_queue(name).await {
            Ok(Some(url)) => return Ok(url),
            Ok(None) => {}
            Err(error) => {
                warn!(queue = %name, error = %error, "Queue lookup failed, creating");
            }
        }

        let url = self
            .broker
            .create_queue(name)
            .await
            .map_err(|source| EventsError::Provisioning {
                resource: format!("queue {name}"),
                source,
            })?;
        info!(queue = %name, url = %url, "Queue provisioned");
        Ok(url)
    }

    /// Prefix-list queues and pick the exact name match, so sibling queues
    /// sharing a prefix never satisfy each other's lookup
    pub(crate) async fn find_queue(&self, name: &str) -> Result<Option<String>, BrokerError> {
        let urls = self.broker.list_queues(Some(name)).await?;
        Ok(urls
            .into_iter()
            .find(|url| url.split('/').next_back() == Some(name)))
    }

    /// Subscribe a queue to the topic, translating the queue address into
    /// the endpoint form the subscription call requires
    pub async fn subscribe(&self, queue_url: &str, topic_address: &str) -> Result<(), EventsError> {
        let endpoint = queue_url_to_arn(queue_url);
        self.broker
            .subscribe(topic_address, &endpoint)
            .await
            .map_err(|source| EventsError::Provisioning {
                resource: format!("subscription {queue_url}"),
                source,
            })?;
        info!(topic = %topic_address, endpoint = %endpoint, "Queue subscribed to topic");
        Ok(())
    }

    /// Wait out the configured retry interval and re-attempt queue
    /// provisioning once. Never invoked by the engine itself.
    pub async fn ensure_queue_retry(&self, name: &str) -> Result<String, EventsError> {
        tokio::time::sleep(Duration::from_millis(self.options.retry_interval)).await;
        self.ensure_queue(name).await
    }

    /// Wait out the configured retry interval and re-attempt topic
    /// provisioning once. Never invoked by the engine itself.
    pub async fn ensure_topic_retry(&self, name: &str) -> Result<String, EventsError> {
        tokio::time::sleep(Duration::from_millis(self.options.retry_interval)).await;
        self.ensure_topic(name).await
    }
}
