//! Slot-bounded dispatch of buffered messages

use std::collections::VecDeque;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::delivery::DeliveryControl;
use crate::handler::{Delivery, EventHandler};
use relayq_core::QueueMessage;

/// An inbox entry: one received message bound to its queue's handler
pub(crate) struct PendingMessage {
    pub queue_name: String,
    pub handler: Arc<dyn EventHandler>,
    pub message: QueueMessage,
}

/// Drains the inbox in passes of at most `max_slots` concurrent handler
/// invocations.
pub(crate) struct Dispatcher {
    inbox: Mutex<VecDeque<PendingMessage>>,
    max_slots: usize,
    delivery: Arc<DeliveryControl>,
}

impl Dispatcher {
    pub fn new(max_slots: usize, delivery: Arc<DeliveryControl>) -> Self {
        Self {
            inbox: Mutex::new(VecDeque::new()),
            max_slots,
            delivery,
        }
    }

    pub fn enqueue(&self, pending: PendingMessage) {
        self.inbox.lock().push_back(pending);
    }

    /// Run drain passes until the inbox is empty.
    ///
    /// Each pass resets the slot budget, starts up to that many handler
    /// invocations in inbox order, and waits for all of them before looking
    /// at the inbox again. Handler errors and panics are logged and never
    /// escape the pass.
    pub async fn process_received_messages(&self) {
        loop {
            let batch = self.take_batch();
            if batch.is_empty() {
                return;
            }
            debug!(count = batch.len(), "Dispatching batch");

            let invocations: Vec<_> = batch
                .into_iter()
                .map(|pending| tokio::spawn(invoke(self.delivery.clone(), pending)))
                .collect();

            for result in join_all(invocations).await {
                if let Err(join_error) = result {
                    if join_error.is_panic() {
                        error!(error = %join_error, "Handler panicked");
                    }
                }
            }
        }
    }

    /// Pop up to `max_slots` messages in FIFO order
    fn take_batch(&self) -> Vec<PendingMessage> {
        let mut inbox = self.inbox.lock();
        let mut slots = self.max_slots;
        let mut batch = Vec::new();
        while slots > 0 {
            match inbox.pop_front() {
                Some(pending) => {
                    batch.push(pending);
                    slots -= 1;
                }
                None => break,
            }
        }
        batch
    }
}

async fn invoke(delivery: Arc<DeliveryControl>, pending: PendingMessage) {
    let PendingMessage {
        queue_name,
        handler,
        message,
    } = pending;
    let message_id = message.message_id.clone();

    let context = Delivery::new(queue_name.clone(), message, delivery);
    if let Err(error) = handler.handle(context).await {
        error!(queue = %queue_name, message_id = %message_id, error = %error, "Handler failed");
    }
}
