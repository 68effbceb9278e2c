//! In-process queues
//!
//! Test doubles for the SQS queue and consumer.

use super::{JobQueue, JobSource, QueueName, ReceivedMessage};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Queues {
    next_id: u64,
    messages: HashMap<QueueName, VecDeque<String>>,
    failing_enqueues: u32,
}

/// FIFO queues held in memory
#[derive(Default)]
pub struct MemoryQueue {
    inner: Mutex<Queues>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn queues(&self) -> MutexGuard<'_, Queues> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `count` enqueues fail
    pub fn fail_next_enqueues(&self, count: u32) {
        self.queues().failing_enqueues = count;
    }

    pub fn len(&self, queue: QueueName) -> usize {
        self.queues().messages.get(&queue).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, queue: QueueName) -> bool {
        self.len(queue) == 0
    }

    /// Pending bodies of `queue`, decoded, in enqueue order. Undecodable
    /// bodies are skipped.
    pub fn jobs<T: DeserializeOwned>(&self, queue: QueueName) -> Vec<T> {
        self.queues()
            .messages
            .get(&queue)
            .map(|bodies| {
                bodies
                    .iter()
                    .filter_map(|body| serde_json::from_str(body).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove and return up to `max` bodies from the front of `queue`
    pub fn take(&self, queue: QueueName, max: usize) -> Vec<String> {
        let mut queues = self.queues();
        let Some(bodies) = queues.messages.get_mut(&queue) else {
            return Vec::new();
        };
        let n = max.min(bodies.len());
        bodies.drain(..n).collect()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, queue: QueueName, body: String) -> Result<String> {
        let mut queues = self.queues();
        if queues.failing_enqueues > 0 {
            queues.failing_enqueues -= 1;
            return Err(AppError::QueueError {
                message: format!("injected enqueue failure on '{}'", queue),
            });
        }

        queues.next_id += 1;
        let id = queues.next_id;
        queues.messages.entry(queue).or_default().push_back(body);

        Ok(format!("mem-{}", id))
    }
}

/// Consumer side of one `MemoryQueue` queue
pub struct MemoryConsumer {
    queue: Arc<MemoryQueue>,
    name: QueueName,
    batch_size: usize,
    deleted: AtomicUsize,
}

impl MemoryConsumer {
    pub fn new(queue: Arc<MemoryQueue>, name: QueueName) -> Self {
        Self {
            queue,
            name,
            batch_size: 10,
            deleted: AtomicUsize::new(0),
        }
    }

    /// Messages acknowledged so far
    pub fn deleted(&self) -> usize {
        self.deleted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobSource for MemoryConsumer {
    async fn receive(&self) -> Result<Vec<ReceivedMessage>> {
        let messages = self
            .queue
            .take(self.name, self.batch_size)
            .into_iter()
            .enumerate()
            .map(|(i, body)| ReceivedMessage {
                body: Some(body),
                receipt_handle: format!("{}-{}", self.name, i),
            })
            .collect::<Vec<_>>();

        if messages.is_empty() {
            // Stand-in for long polling
            tokio::task::yield_now().await;
        }

        Ok(messages)
    }

    async fn delete(&self, _receipt_handle: &str) -> Result<()> {
        self.deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
