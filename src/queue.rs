//! Update-queue contract: at-least-once delivery of `(course_id, post_id)`
//! pairs feeding the incremental scraper.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Body of an update message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMessage {
    pub course_id: String,
    pub post_id: String,
}

/// A received message; the handle deletes it after successful processing.
#[derive(Clone, Debug)]
pub struct QueueMessage {
    pub receipt_handle: String,
    pub body: UpdateMessage,
}

#[async_trait]
pub trait UpdateQueue: Send + Sync {
    /// Long-poll receive of up to `max` messages, waiting at most `wait`.
    /// An empty response means the queue is drained for now.
    async fn receive(&self, max: usize, wait: Duration)
    -> Result<Vec<QueueMessage>, QueueError>;

    /// Deletes a message by receipt handle. Messages never deleted are
    /// redelivered later.
    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;
}

/// In-process queue with visibility semantics for tests and local runs:
/// received messages move in-flight and only [`redeliver`](Self::redeliver)
/// puts undeleted ones back.
#[derive(Default)]
pub struct InMemoryQueue {
    ready: Mutex<VecDeque<QueueMessage>>,
    in_flight: Mutex<Vec<QueueMessage>>,
    counter: Mutex<u64>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, body: UpdateMessage) {
        let mut counter = self.counter.lock();
        *counter += 1;
        let handle = format!("handle-{}", *counter);
        self.ready.lock().push_back(QueueMessage {
            receipt_handle: handle,
            body,
        });
    }

    /// Moves every undeleted in-flight message back to the ready queue,
    /// simulating a visibility timeout expiring.
    pub fn redeliver(&self) {
        // Same lock order as receive.
        let mut ready = self.ready.lock();
        let mut in_flight = self.in_flight.lock();
        for message in in_flight.drain(..) {
            ready.push_back(message);
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn ready_count(&self) -> usize {
        self.ready.lock().len()
    }
}

#[async_trait]
impl UpdateQueue for InMemoryQueue {
    async fn receive(
        &self,
        max: usize,
        _wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut ready = self.ready.lock();
        let mut in_flight = self.in_flight.lock();
        let mut received = Vec::new();
        while received.len() < max {
            let Some(message) = ready.pop_front() else {
                break;
            };
            in_flight.push(message.clone());
            received.push(message);
        }
        Ok(received)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.in_flight
            .lock()
            .retain(|message| message.receipt_handle != receipt_handle);
        Ok(())
    }
}
