//! End-to-end consumer tests over the in-memory broker

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use relayq::{
    handler_fn, Broker, BrokerError, ConsumerOptions, EventConsumer, EventHandler, EventsError,
    QueueMessage, ReceiveOptions,
};
use relayq_memory::MemoryBroker;

/// Memory broker wrapper that counts provisioning/delete calls and can
/// simulate provider outages.
struct InstrumentedBroker {
    inner: MemoryBroker,
    create_queue_calls: AtomicUsize,
    create_topic_calls: AtomicUsize,
    delete_message_calls: AtomicUsize,
    fail_queue_creates: AtomicBool,
    fail_topic_lists: AtomicBool,
    fail_receives: AtomicBool,
}

impl InstrumentedBroker {
    fn new() -> Self {
        Self {
            inner: MemoryBroker::new(),
            create_queue_calls: AtomicUsize::new(0),
            create_topic_calls: AtomicUsize::new(0),
            delete_message_calls: AtomicUsize::new(0),
            fail_queue_creates: AtomicBool::new(false),
            fail_topic_lists: AtomicBool::new(false),
            fail_receives: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Broker for InstrumentedBroker {
    async fn create_queue(&self, name: &str) -> Result<String, BrokerError> {
        if self.fail_queue_creates.load(Ordering::SeqCst) {
            return Err(BrokerError::Provider("simulated create outage".to_string()));
        }
        self.create_queue_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.create_queue(name).await
    }

    async fn list_queues(&self, prefix: Option<&str>) -> Result<Vec<String>, BrokerError> {
        self.inner.list_queues(prefix).await
    }

    async fn delete_queue(&self, queue_url: &str) -> Result<(), BrokerError> {
        self.inner.delete_queue(queue_url).await
    }

    async fn create_topic(&self, name: &str) -> Result<String, BrokerError> {
        self.create_topic_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.create_topic(name).await
    }

    async fn list_topics(&self) -> Result<Vec<String>, BrokerError> {
        if self.fail_topic_lists.load(Ordering::SeqCst) {
            return Err(BrokerError::Provider("simulated list outage".to_string()));
        }
        self.inner.list_topics().await
    }

    async fn delete_topic(&self, topic: &str) -> Result<(), BrokerError> {
        self.inner.delete_topic(topic).await
    }

    async fn subscribe(&self, topic: &str, endpoint: &str) -> Result<(), BrokerError> {
        self.inner.subscribe(topic, endpoint).await
    }

    async fn publish(&self, topic: &str, body: String) -> Result<String, BrokerError> {
        self.inner.publish(topic, body).await
    }

    async fn send_message(&self, queue_url: &str, body: String) -> Result<String, BrokerError> {
        self.inner.send_message(queue_url, body).await
    }

    async fn receive_message(
        &self,
        queue_url: &str,
        options: &ReceiveOptions,
    ) -> Result<Vec<QueueMessage>, BrokerError> {
        if self.fail_receives.load(Ordering::SeqCst) {
            return Err(BrokerError::Provider(
                "simulated receive outage".to_string(),
            ));
        }
        self.inner.receive_message(queue_url, options).await
    }

    async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), BrokerError> {
        self.delete_message_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_message(queue_url, receipt_handle).await
    }

    async fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout: i32,
    ) -> Result<(), BrokerError> {
        self.inner
            .change_message_visibility(queue_url, receipt_handle, visibility_timeout)
            .await
    }
}

/// Options with a short poll interval so tests settle quickly
fn fast_options(topic: &str) -> ConsumerOptions {
    let mut options = ConsumerOptions::new(topic);
    options.listen_interval = 25;
    options
}

fn noop_handler() -> Arc<dyn EventHandler> {
    handler_fn(|_delivery| async { Ok(()) })
}

#[tokio::test]
async fn test_queue_provisioning_is_idempotent() {
    let broker = Arc::new(InstrumentedBroker::new());
    let consumer = EventConsumer::initialize(broker.clone(), fast_options("events"))
        .await
        .unwrap();

    let first = consumer.provisioner().ensure_queue("orders").await.unwrap();
    let second = consumer.provisioner().ensure_queue("orders").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(broker.create_queue_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_topic_provisioning_is_idempotent() {
    let broker = Arc::new(InstrumentedBroker::new());

    let first = EventConsumer::initialize(broker.clone(), fast_options("events"))
        .await
        .unwrap();
    let second = EventConsumer::initialize(broker.clone(), fast_options("events"))
        .await
        .unwrap();

    assert_eq!(first.topic_address(), second.topic_address());
    assert_eq!(broker.create_topic_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_topic_lookup_failure_falls_through_to_create() {
    let broker = Arc::new(InstrumentedBroker::new());
    broker.fail_topic_lists.store(true, Ordering::SeqCst);

    let consumer = EventConsumer::initialize(broker.clone(), fast_options("events"))
        .await
        .unwrap();

    assert!(!consumer.topic_address().is_empty());
    assert_eq!(broker.create_topic_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_blank_topic_name_fails_initialization() {
    let broker = Arc::new(MemoryBroker::new());
    let result = EventConsumer::initialize(broker, fast_options(" ")).await;
    assert!(matches!(result, Err(EventsError::Configuration(_))));
}

// Provisioning failures surface in both error modes; the propagation switch
// only governs receive, send, and delivery-control failures.
#[tokio::test]
async fn test_provisioning_errors_surface_in_both_modes() {
    for propagate in [false, true] {
        let broker = Arc::new(InstrumentedBroker::new());
        let mut options = fast_options("events");
        options.propagate_errors = propagate;

        let consumer = EventConsumer::initialize(broker.clone(), options)
            .await
            .unwrap();
        broker.fail_queue_creates.store(true, Ordering::SeqCst);

        let result = consumer.register_queue("orders", noop_handler()).await;
        assert!(
            matches!(result, Err(EventsError::Provisioning { .. })),
            "propagate_errors={propagate}"
        );
    }
}

#[tokio::test]
async fn test_end_to_end_single_message() {
    let broker = Arc::new(MemoryBroker::new());
    let consumer = Arc::new(
        EventConsumer::initialize(broker, fast_options("events"))
            .await
            .unwrap(),
    );

    let invocations = Arc::new(AtomicUsize::new(0));
    let seen = invocations.clone();
    consumer
        .register_queue(
            "orders",
            handler_fn(move |delivery| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    delivery.ack().await?;
                    Ok(())
                }
            }),
        )
        .await
        .unwrap();

    consumer
        .send_raw("orders", "one event".to_string())
        .await
        .unwrap();

    let runner = consumer.clone();
    let handle = tokio::spawn(async move { runner.run().await });
    // Several poll cycles pass; the acked message must not come back
    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.abort();

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_slot_budget_bounds_concurrent_handlers() {
    let broker = Arc::new(MemoryBroker::new());
    let mut options = fast_options("events");
    options.max_number_of_messages = 2;
    let consumer = Arc::new(EventConsumer::initialize(broker, options).await.unwrap());

    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let handled = Arc::new(AtomicUsize::new(0));

    let handler = {
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        let handled = handled.clone();
        handler_fn(move |delivery| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            let handled = handled.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                delivery.ack().await?;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                handled.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    };

    consumer
        .register_queue("orders", handler.clone())
        .await
        .unwrap();
    consumer.register_queue("billing", handler).await.unwrap();

    // One poll cycle ingests four messages; with two slots that takes two
    // drain passes before polling resumes
    for _ in 0..2 {
        consumer
            .send_raw("orders", "work".to_string())
            .await
            .unwrap();
        consumer
            .send_raw("billing", "work".to_string())
            .await
            .unwrap();
    }

    let runner = consumer.clone();
    let handle = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(400)).await;
    handle.abort();

    assert_eq!(handled.load(Ordering::SeqCst), 4);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_dispatch_starts_in_fifo_order() {
    let broker = Arc::new(MemoryBroker::new());
    let consumer = Arc::new(
        EventConsumer::initialize(broker, fast_options("events"))
            .await
            .unwrap(),
    );

    let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = order.clone();
    consumer
        .register_queue(
            "orders",
            handler_fn(move |delivery| {
                let seen = seen.clone();
                async move {
                    seen.lock().push(delivery.body().to_string());
                    delivery.ack().await?;
                    Ok(())
                }
            }),
        )
        .await
        .unwrap();

    for body in ["first", "second", "third"] {
        consumer.send_raw("orders", body.to_string()).await.unwrap();
    }

    let runner = consumer.clone();
    let handle = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.abort();

    assert_eq!(*order.lock(), vec!["first", "second", "third"]);
}

#[tokio::test]
async fn test_nack_makes_message_redeliverable() {
    let broker = Arc::new(MemoryBroker::new());
    let consumer = Arc::new(
        EventConsumer::initialize(broker, fast_options("events"))
            .await
            .unwrap(),
    );

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    consumer
        .register_queue(
            "orders",
            handler_fn(move |delivery| {
                let counter = counter.clone();
                async move {
                    // First delivery fails over to the queue; second sticks
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        delivery.nack().await?;
                    } else {
                        delivery.ack().await?;
                    }
                    Ok(())
                }
            }),
        )
        .await
        .unwrap();

    consumer
        .send_raw("orders", "retry me".to_string())
        .await
        .unwrap();

    let runner = consumer.clone();
    let handle = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(400)).await;
    handle.abort();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_ack_issues_one_delete_per_call() {
    let broker = Arc::new(InstrumentedBroker::new());
    let consumer = Arc::new(
        EventConsumer::initialize(broker.clone(), fast_options("events"))
            .await
            .unwrap(),
    );

    let captured: Arc<Mutex<Option<QueueMessage>>> = Arc::new(Mutex::new(None));
    let slot = captured.clone();
    consumer
        .register_queue(
            "orders",
            handler_fn(move |delivery| {
                let slot = slot.clone();
                async move {
                    *slot.lock() = Some(delivery.message().clone());
                    delivery.ack().await?;
                    Ok(())
                }
            }),
        )
        .await
        .unwrap();

    consumer.send_raw("orders", "done".to_string()).await.unwrap();

    let runner = consumer.clone();
    let handle = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.abort();

    assert_eq!(broker.delete_message_calls.load(Ordering::SeqCst), 1);

    // A second ack is not absorbed as idempotent; it issues another delete,
    // which the swallow mode then absorbs when the provider rejects it
    let message = captured.lock().take().unwrap();
    consumer.ack("orders", &message).await.unwrap();
    assert_eq!(broker.delete_message_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_receive_failure_swallow_mode_keeps_polling() {
    let broker = Arc::new(InstrumentedBroker::new());
    let consumer = Arc::new(
        EventConsumer::initialize(broker.clone(), fast_options("events"))
            .await
            .unwrap(),
    );
    consumer
        .register_queue("orders", noop_handler())
        .await
        .unwrap();
    broker.fail_receives.store(true, Ordering::SeqCst);

    let runner = consumer.clone();
    let handle = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!handle.is_finished());
    handle.abort();
}

#[tokio::test]
async fn test_receive_failure_propagate_mode_ends_run() {
    let broker = Arc::new(InstrumentedBroker::new());
    let mut options = fast_options("events");
    options.propagate_errors = true;

    let consumer = EventConsumer::initialize(broker.clone(), options)
        .await
        .unwrap();
    consumer
        .register_queue("orders", noop_handler())
        .await
        .unwrap();
    broker.fail_receives.store(true, Ordering::SeqCst);

    let result = tokio::time::timeout(Duration::from_secs(2), consumer.run()).await;
    assert!(matches!(result, Ok(Err(EventsError::Receive { .. }))));
}

#[tokio::test]
async fn test_handler_panic_is_isolated() {
    let broker = Arc::new(MemoryBroker::new());
    let consumer = Arc::new(
        EventConsumer::initialize(broker, fast_options("events"))
            .await
            .unwrap(),
    );

    let ok_count = Arc::new(AtomicUsize::new(0));
    let counter = ok_count.clone();
    consumer
        .register_queue(
            "orders",
            handler_fn(move |delivery| {
                let counter = counter.clone();
                async move {
                    if delivery.body() == "boom" {
                        panic!("handler exploded");
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                    delivery.ack().await?;
                    Ok(())
                }
            }),
        )
        .await
        .unwrap();

    // The panicking message and a sibling land in the same dispatch pass
    consumer.send_raw("orders", "boom".to_string()).await.unwrap();
    consumer.send_raw("orders", "ok".to_string()).await.unwrap();

    let runner = consumer.clone();
    let handle = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(150)).await;

    // Loop must still be polling after the panic
    consumer
        .send_raw("orders", "ok-later".to_string())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    handle.abort();

    assert_eq!(ok_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_send_to_unregistered_queue_errors_in_both_modes() {
    for propagate in [false, true] {
        let broker = Arc::new(MemoryBroker::new());
        let mut options = fast_options("events");
        options.propagate_errors = propagate;

        let consumer = EventConsumer::initialize(broker, options).await.unwrap();
        let result = consumer.send_raw("ghost", "lost".to_string()).await;
        assert!(
            matches!(result, Err(EventsError::UnknownQueue(_))),
            "propagate_errors={propagate}"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderPlaced {
    id: u32,
    sku: String,
}

#[tokio::test]
async fn test_queue_prefix_and_typed_payloads() {
    let broker = Arc::new(MemoryBroker::new());
    let mut options = fast_options("events");
    options.queue_prefix = Some("staging".to_string());

    let consumer = Arc::new(
        EventConsumer::initialize(broker.clone(), options)
            .await
            .unwrap(),
    );

    let received: Arc<Mutex<Vec<OrderPlaced>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    consumer
        .register_queue(
            "orders",
            handler_fn(move |delivery| {
                let sink = sink.clone();
                async move {
                    sink.lock().push(delivery.payload::<OrderPlaced>()?);
                    delivery.ack().await?;
                    Ok(())
                }
            }),
        )
        .await
        .unwrap();

    // The provider-side queue carries the namespace prefix
    let urls = broker.list_queues(Some("staging-")).await.unwrap();
    assert_eq!(urls.len(), 1);
    assert!(urls[0].ends_with("staging-orders"));

    let event = OrderPlaced {
        id: 7,
        sku: "ABC-1".to_string(),
    };
    consumer.send("orders", &event).await.unwrap();

    let runner = consumer.clone();
    let handle = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.abort();

    assert_eq!(*received.lock(), vec![event]);
}

#[tokio::test]
async fn test_retry_helper_waits_before_reattempting() {
    let broker = Arc::new(MemoryBroker::new());
    let mut options = fast_options("events");
    options.retry_interval = 40;

    let consumer = EventConsumer::initialize(broker, options).await.unwrap();

    let started = Instant::now();
    let url = consumer
        .provisioner()
        .ensure_queue_retry("orders")
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(40));
    assert!(url.ends_with("orders"));
}
