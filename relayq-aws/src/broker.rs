//! SQS/SNS client adapter

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::types::MessageSystemAttributeName;
use tracing::{debug, info};

use relayq_core::{Broker, BrokerError, QueueMessage, ReceiveOptions};

/// Broker backend over the managed AWS services.
///
/// Queue addresses are SQS queue URLs; topic addresses are SNS topic ARNs.
/// Subscription endpoints must be queue ARNs, as SNS requires.
#[derive(Debug, Clone)]
pub struct AwsBroker {
    sqs: aws_sdk_sqs::Client,
    sns: aws_sdk_sns::Client,
}

impl AwsBroker {
    pub fn new(sqs: aws_sdk_sqs::Client, sns: aws_sdk_sns::Client) -> Self {
        Self { sqs, sns }
    }

    /// Build clients from ambient AWS configuration (environment, profile,
    /// instance metadata), optionally overriding the endpoint for local
    /// emulators.
    pub async fn connect(endpoint_url: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(endpoint) = endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;

        Self {
            sqs: aws_sdk_sqs::Client::new(&config),
            sns: aws_sdk_sns::Client::new(&config),
        }
    }
}

#[async_trait]
impl Broker for AwsBroker {
    async fn create_queue(&self, name: &str) -> Result<String, BrokerError> {
        let resp = self
            .sqs
            .create_queue()
            .queue_name(name)
            .send()
            .await
            .map_err(|e| BrokerError::Provider(format!("sqs create_queue: {e}")))?;

        let url = resp.queue_url().ok_or_else(|| {
            BrokerError::Provider("sqs create_queue: response missing queue url".to_string())
        })?;
        info!(name = %name, url = %url, "Created queue");
        Ok(url.to_string())
    }

    async fn list_queues(&self, prefix: Option<&str>) -> Result<Vec<String>, BrokerError> {
        let mut req = self.sqs.list_queues();
        if let Some(prefix) = prefix {
            req = req.queue_name_prefix(prefix);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| BrokerError::Provider(format!("sqs list_queues: {e}")))?;
        Ok(resp.queue_urls().to_vec())
    }

    async fn delete_queue(&self, queue_url: &str) -> Result<(), BrokerError> {
        self.sqs
            .delete_queue()
            .queue_url(queue_url)
            .send()
            .await
            .map_err(|e| BrokerError::Provider(format!("sqs delete_queue: {e}")))?;
        info!(url = %queue_url, "Deleted queue");
        Ok(())
    }

    async fn create_topic(&self, name: &str) -> Result<String, BrokerError> {
        let resp = self
            .sns
            .create_topic()
            .name(name)
            .send()
            .await
            .map_err(|e| BrokerError::Provider(format!("sns create_topic: {e}")))?;

        let arn = resp.topic_arn().ok_or_else(|| {
            BrokerError::Provider("sns create_topic: response missing topic arn".to_string())
        })?;
        info!(name = %name, arn = %arn, "Created topic");
        Ok(arn.to_string())
    }

    async fn list_topics(&self) -> Result<Vec<String>, BrokerError> {
        let resp = self
            .sns
            .list_topics()
            .send()
            .await
            .map_err(|e| BrokerError::Provider(format!("sns list_topics: {e}")))?;

        Ok(resp
            .topics()
            .iter()
            .filter_map(|t| t.topic_arn().map(String::from))
            .collect())
    }

    async fn delete_topic(&self, topic: &str) -> Result<(), BrokerError> {
        self.sns
            .delete_topic()
            .topic_arn(topic)
            .send()
            .await
            .map_err(|e| BrokerError::Provider(format!("sns delete_topic: {e}")))?;
        info!(arn = %topic, "Deleted topic");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, endpoint: &str) -> Result<(), BrokerError> {
        self.sns
            .subscribe()
            .topic_arn(topic)
            .protocol("sqs")
            .endpoint(endpoint)
            .send()
            .await
            .map_err(|e| BrokerError::Provider(format!("sns subscribe: {e}")))?;
        info!(topic = %topic, endpoint = %endpoint, "Subscribed");
        Ok(())
    }

    async fn publish(&self, topic: &str, body: String) -> Result<String, BrokerError> {
        let resp = self
            .sns
            .publish()
            .topic_arn(topic)
            .message(body)
            .send()
            .await
            .map_err(|e| BrokerError::Provider(format!("sns publish: {e}")))?;
        Ok(resp.message_id.unwrap_or_default())
    }

    async fn send_message(&self, queue_url: &str, body: String) -> Result<String, BrokerError> {
        let resp = self
            .sqs
            .send_message()
            .queue_url(queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| BrokerError::Provider(format!("sqs send: {e}")))?;
        Ok(resp.message_id.unwrap_or_default())
    }

    async fn receive_message(
        &self,
        queue_url: &str,
        options: &ReceiveOptions,
    ) -> Result<Vec<QueueMessage>, BrokerError> {
        let resp = self
            .sqs
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(options.max_messages.clamp(1, 10))
            .visibility_timeout(options.visibility_timeout)
            .wait_time_seconds(options.wait_time_seconds)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .send()
            .await
            .map_err(|e| BrokerError::Provider(format!("sqs receive: {e}")))?;

        let mut out = Vec::new();
        if let Some(messages) = resp.messages {
            for m in messages {
                if let (Some(message_id), Some(receipt_handle), Some(body)) =
                    (m.message_id, m.receipt_handle, m.body)
                {
                    let mut msg = QueueMessage::new(message_id, receipt_handle, body);
                    if let Some(attributes) = m.attributes {
                        for (name, value) in attributes {
                            msg.attributes.insert(name.as_str().to_string(), value);
                        }
                    }
                    out.push(msg);
                }
            }
        }

        debug!(queue = %queue_url, count = out.len(), "Received messages");
        Ok(out)
    }

    async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), BrokerError> {
        self.sqs
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| BrokerError::Provider(format!("sqs delete: {e}")))?;
        Ok(())
    }

    async fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout: i32,
    ) -> Result<(), BrokerError> {
        self.sqs
            .change_message_visibility()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(visibility_timeout)
            .send()
            .await
            .map_err(|e| BrokerError::Provider(format!("sqs visibility: {e}")))?;
        Ok(())
    }
}
