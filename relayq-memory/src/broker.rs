//! Process-local queue/topic broker

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use relayq_core::{Broker, BrokerError, QueueMessage, ReceiveOptions};

/// Sleep between polls while honoring a long-poll wait
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

fn queue_url(name: &str) -> String {
    format!("memory://queues/{}", name)
}

fn topic_address(name: &str) -> String {
    format!("memory://topics/{}", name)
}

/// A message held by a queue. Stays in place until deleted; receives hide it
/// behind `invisible_until` and rotate the receipt handle.
#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    receipt_handle: String,
    body: String,
    sent_timestamp: i64,
    receive_count: i32,
    first_received_timestamp: Option<i64>,
    invisible_until: Option<DateTime<Utc>>,
}

impl StoredMessage {
    fn new(body: String) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            receipt_handle: Uuid::new_v4().to_string(),
            body,
            sent_timestamp: Utc::now().timestamp_millis(),
            receive_count: 0,
            first_received_timestamp: None,
            invisible_until: None,
        }
    }

    fn visible_at(&self, now: DateTime<Utc>) -> bool {
        self.invisible_until.map_or(true, |until| until <= now)
    }
}

/// In-memory broker backend
#[derive(Debug, Default)]
pub struct MemoryBroker {
    /// Queue name -> queue address
    queues: DashMap<String, String>,
    /// Queue name -> messages in arrival order
    messages: DashMap<String, VecDeque<StoredMessage>>,
    /// Topic name -> topic address
    topics: DashMap<String, String>,
    /// Topic address -> subscribed queue endpoints
    subscriptions: DashMap<String, Vec<String>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a queue address back to its name, verifying it exists
    fn queue_name(&self, queue_url: &str) -> Result<String, BrokerError> {
        let name = queue_url.split('/').next_back().unwrap_or(queue_url);
        if !self.queues.contains_key(name) {
            return Err(BrokerError::QueueNotFound(queue_url.to_string()));
        }
        Ok(name.to_string())
    }

    fn topic_exists(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t.value() == topic)
    }

    /// One synchronous receive pass: mark up to `max_messages` visible
    /// messages received and return copies of them.
    fn reserve_batch(
        &self,
        name: &str,
        options: &ReceiveOptions,
    ) -> Result<Vec<QueueMessage>, BrokerError> {
        let mut messages = self
            .messages
            .get_mut(name)
            .ok_or_else(|| BrokerError::QueueNotFound(name.to_string()))?;

        let max = options.max_messages.clamp(1, 10) as usize;
        let now = Utc::now();
        let mut result = Vec::new();

        for msg in messages.iter_mut() {
            if result.len() == max {
                break;
            }
            if !msg.visible_at(now) {
                continue;
            }

            msg.receive_count += 1;
            if msg.first_received_timestamp.is_none() {
                msg.first_received_timestamp = Some(now.timestamp_millis());
            }
            msg.receipt_handle = Uuid::new_v4().to_string();
            msg.invisible_until =
                Some(now + chrono::Duration::seconds(i64::from(options.visibility_timeout.max(0))));

            let mut out =
                QueueMessage::new(msg.message_id.clone(), msg.receipt_handle.clone(), msg.body.clone());
            out.attributes
                .insert("ApproximateReceiveCount".to_string(), msg.receive_count.to_string());
            out.attributes
                .insert("SentTimestamp".to_string(), msg.sent_timestamp.to_string());
            if let Some(first) = msg.first_received_timestamp {
                out.attributes
                    .insert("ApproximateFirstReceiveTimestamp".to_string(), first.to_string());
            }
            result.push(out);
        }

        Ok(result)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn create_queue(&self, name: &str) -> Result<String, BrokerError> {
        if let Some(url) = self.queues.get(name) {
            return Ok(url.clone());
        }

        let url = queue_url(name);
        info!(name = %name, url = %url, "Creating queue");
        self.queues.insert(name.to_string(), url.clone());
        self.messages.insert(name.to_string(), VecDeque::new());
        Ok(url)
    }

    async fn list_queues(&self, prefix: Option<&str>) -> Result<Vec<String>, BrokerError> {
        Ok(self
            .queues
            .iter()
            .filter(|q| prefix.map_or(true, |p| q.key().starts_with(p)))
            .map(|q| q.value().clone())
            .collect())
    }

    async fn delete_queue(&self, queue_url: &str) -> Result<(), BrokerError> {
        let name = self.queue_name(queue_url)?;
        info!(name = %name, "Deleting queue");
        self.queues.remove(&name);
        self.messages.remove(&name);
        Ok(())
    }

    async fn create_topic(&self, name: &str) -> Result<String, BrokerError> {
        if let Some(address) = self.topics.get(name) {
            return Ok(address.clone());
        }

        let address = topic_address(name);
        info!(name = %name, address = %address, "Creating topic");
        self.topics.insert(name.to_string(), address.clone());
        self.subscriptions.insert(address.clone(), Vec::new());
        Ok(address)
    }

    async fn list_topics(&self) -> Result<Vec<String>, BrokerError> {
        Ok(self.topics.iter().map(|t| t.value().clone()).collect())
    }

    async fn delete_topic(&self, topic: &str) -> Result<(), BrokerError> {
        let name = self
            .topics
            .iter()
            .find(|t| t.value() == topic)
            .map(|t| t.key().clone())
            .ok_or_else(|| BrokerError::TopicNotFound(topic.to_string()))?;

        info!(name = %name, "Deleting topic");
        self.topics.remove(&name);
        self.subscriptions.remove(topic);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, endpoint: &str) -> Result<(), BrokerError> {
        if !self.topic_exists(topic) {
            return Err(BrokerError::TopicNotFound(topic.to_string()));
        }

        let mut subs = self.subscriptions.entry(topic.to_string()).or_default();
        // Re-subscribing the same endpoint is a no-op, as on managed providers
        if !subs.iter().any(|e| e == endpoint) {
            subs.push(endpoint.to_string());
            info!(topic = %topic, endpoint = %endpoint, "Subscribed");
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, body: String) -> Result<String, BrokerError> {
        if !self.topic_exists(topic) {
            return Err(BrokerError::TopicNotFound(topic.to_string()));
        }

        let message_id = Uuid::new_v4().to_string();
        let endpoints = self
            .subscriptions
            .get(topic)
            .map(|s| s.clone())
            .unwrap_or_default();

        let mut delivered = 0usize;
        for endpoint in &endpoints {
            let name = endpoint.split('/').next_back().unwrap_or(endpoint);
            if let Some(mut messages) = self.messages.get_mut(name) {
                messages.push_back(StoredMessage::new(body.clone()));
                delivered += 1;
            }
        }

        info!(topic = %topic, message_id = %message_id, subscriber_count = endpoints.len(),
            delivered = delivered, "Published message");
        Ok(message_id)
    }

    async fn send_message(&self, queue_url: &str, body: String) -> Result<String, BrokerError> {
        let name = self.queue_name(queue_url)?;

        let message = StoredMessage::new(body);
        let message_id = message.message_id.clone();
        if let Some(mut messages) = self.messages.get_mut(&name) {
            messages.push_back(message);
        }

        info!(queue = %name, message_id = %message_id, "Sent message");
        Ok(message_id)
    }

    async fn receive_message(
        &self,
        queue_url: &str,
        options: &ReceiveOptions,
    ) -> Result<Vec<QueueMessage>, BrokerError> {
        let name = self.queue_name(queue_url)?;
        let deadline =
            Instant::now() + Duration::from_secs(options.wait_time_seconds.max(0) as u64);

        loop {
            let batch = self.reserve_batch(&name, options)?;
            if !batch.is_empty() || Instant::now() >= deadline {
                debug!(queue = %name, count = batch.len(), "Received messages");
                return Ok(batch);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), BrokerError> {
        let name = self.queue_name(queue_url)?;
        let mut messages = self
            .messages
            .get_mut(&name)
            .ok_or_else(|| BrokerError::QueueNotFound(name.clone()))?;

        let original_len = messages.len();
        messages.retain(|m| m.receipt_handle != receipt_handle);

        if messages.len() == original_len {
            return Err(BrokerError::MessageNotFound(receipt_handle.to_string()));
        }

        info!(queue = %name, receipt = %receipt_handle, "Deleted message");
        Ok(())
    }

    async fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout: i32,
    ) -> Result<(), BrokerError> {
        let name = self.queue_name(queue_url)?;
        let mut messages = self
            .messages
            .get_mut(&name)
            .ok_or_else(|| BrokerError::QueueNotFound(name.clone()))?;

        let now = Utc::now();
        match messages.iter_mut().find(|m| m.receipt_handle == receipt_handle) {
            Some(msg) => {
                msg.invisible_until =
                    Some(now + chrono::Duration::seconds(i64::from(visibility_timeout.max(0))));
                debug!(queue = %name, receipt = %receipt_handle, timeout = visibility_timeout,
                    "Changed message visibility");
                Ok(())
            }
            None => Err(BrokerError::MessageNotFound(receipt_handle.to_string())),
        }
    }
}
