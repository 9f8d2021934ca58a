//! Consumer configuration

use serde::Deserialize;

use crate::error::EventsError;
use relayq_core::ReceiveOptions;

/// Tunable options for an [`EventConsumer`](crate::EventConsumer).
///
/// Only `topic_name` is required; everything else carries a default matching
/// a low-latency polling consumer.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerOptions {
    /// Logical topic every registered queue is subscribed to
    pub topic_name: String,

    /// Milliseconds to sleep between poll cycles
    #[serde(default = "default_listen_interval")]
    pub listen_interval: u64,

    /// Milliseconds between dispatch passes; recognized but currently unused
    #[serde(default = "default_process_interval")]
    pub process_interval: u64,

    /// Receive batch size and per-pass concurrency budget, clamped to 1..=10
    #[serde(default = "default_max_number_of_messages")]
    pub max_number_of_messages: i32,

    /// Seconds a received-but-unacked message stays hidden
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout: i32,

    /// Long-poll wait per receive call; 0 polls non-blocking
    #[serde(default)]
    pub wait_time_seconds: i32,

    /// When true, receive/send/ack/nack failures surface as errors instead of
    /// being logged and absorbed
    #[serde(default)]
    pub propagate_errors: bool,

    /// Milliseconds the caller-invoked provisioning retry helpers wait before
    /// re-attempting
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,

    /// Optional namespace prefix; the provider-side queue name becomes
    /// `{prefix}-{name}`
    #[serde(default)]
    pub queue_prefix: Option<String>,
}

impl ConsumerOptions {
    pub fn new(topic_name: impl Into<String>) -> Self {
        Self {
            topic_name: topic_name.into(),
            listen_interval: default_listen_interval(),
            process_interval: default_process_interval(),
            max_number_of_messages: default_max_number_of_messages(),
            visibility_timeout: default_visibility_timeout(),
            wait_time_seconds: 0,
            propagate_errors: false,
            retry_interval: default_retry_interval(),
            queue_prefix: None,
        }
    }

    /// Load options from an optional `relayq` config file and `RELAYQ_*`
    /// environment variables
    pub fn load() -> Result<Self, EventsError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("relayq").required(false))
            .add_source(config::Environment::with_prefix("RELAYQ"))
            .build()
            .map_err(|e| EventsError::Configuration(e.to_string()))?;

        settings
            .try_deserialize::<Self>()
            .map_err(|e| EventsError::Configuration(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), EventsError> {
        if self.topic_name.trim().is_empty() {
            return Err(EventsError::Configuration(
                "topic name not specified for events".to_string(),
            ));
        }
        Ok(())
    }

    /// Provider-side name for a logical queue name
    pub fn effective_queue_name(&self, name: &str) -> String {
        match &self.queue_prefix {
            Some(prefix) => format!("{prefix}-{name}"),
            None => name.to_string(),
        }
    }

    pub fn receive_options(&self) -> ReceiveOptions {
        ReceiveOptions {
            max_messages: self.max_number_of_messages.clamp(1, 10),
            visibility_timeout: self.visibility_timeout,
            wait_time_seconds: self.wait_time_seconds,
        }
    }
}

fn default_listen_interval() -> u64 {
    300
}

fn default_process_interval() -> u64 {
    300
}

fn default_max_number_of_messages() -> i32 {
    10
}

fn default_visibility_timeout() -> i32 {
    120
}

fn default_retry_interval() -> u64 {
    5000
}
