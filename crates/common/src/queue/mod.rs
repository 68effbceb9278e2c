//! Job queues for async pipeline stages
//!
//! Provides:
//! - Named queues and their job payloads
//! - SQS client wrapper (`Queue`) and the routing `SqsJobQueue`
//! - In-process `MemoryQueue` test double
//! - The shared consume loop used by the worker binaries

mod consumer;
mod memory;

pub use consumer::{poll_once, run_consumer, JobOutcome};
pub use memory::{MemoryConsumer, MemoryQueue};

use crate::config::QueueConfig;
use crate::db::CompanyRef;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use aws_sdk_sqs::Client as SqsClient;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// Named queues of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    /// `FetchReportJob`s consumed by the ingestion worker
    FetchFinancialReport,
    /// `SentenceBatchJob`s consumed by the embedding worker
    FinancialSentences,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::FetchFinancialReport => "fetch-financial-report",
            QueueName::FinancialSentences => "financial-sentences",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// At-least-once job dispatch
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a serialized job body. Returns the broker's message id.
    async fn enqueue(&self, queue: QueueName, body: String) -> Result<String>;
}

/// A received message awaiting deletion
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub body: Option<String>,
    pub receipt_handle: String,
}

/// Source side of a single queue
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn receive(&self) -> Result<Vec<ReceivedMessage>>;

    async fn delete(&self, receipt_handle: &str) -> Result<()>;
}

/// Serialize and enqueue a job
pub async fn dispatch<T: Serialize + Sync>(
    queue: &dyn JobQueue,
    name: QueueName,
    job: &T,
) -> Result<String> {
    let body = serde_json::to_string(job).map_err(|e| AppError::QueueError {
        message: format!("Failed to serialize message: {}", e),
    })?;

    let message_id = queue.enqueue(name, body).await?;
    crate::metrics::record_job_dispatched(name.as_str());

    Ok(message_id)
}

/// Parse message body as JSON
pub fn parse_message<T: DeserializeOwned>(message: &ReceivedMessage) -> Result<T> {
    let body = message.body.as_ref().ok_or_else(|| AppError::QueueError {
        message: "Message has no body".to_string(),
    })?;

    serde_json::from_str(body).map_err(|e| AppError::QueueError {
        message: format!("Failed to parse message: {}", e),
    })
}

// ============================================================================
// SQS
// ============================================================================

/// SQS queue client wrapper for one queue URL
pub struct Queue {
    client: SqsClient,
    url: String,
    max_messages: i32,
    visibility_timeout: i32,
    wait_time_seconds: i32,
}

impl Queue {
    /// Wrap an existing client for `url`
    pub fn with_client(client: SqsClient, url: String, config: &QueueConfig) -> Self {
        Self {
            client,
            url,
            max_messages: config.batch_size.clamp(1, 10),
            visibility_timeout: config.visibility_timeout_secs,
            wait_time_seconds: config.poll_timeout_secs,
        }
    }

    /// Client for `url` built from the ambient AWS configuration
    pub async fn connect(url: String, config: &QueueConfig) -> Self {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::with_client(SqsClient::new(&aws_config), url, config)
    }

    /// Send a message body to the queue
    pub async fn send(&self, body: String) -> Result<String> {
        let result = self
            .client
            .send_message()
            .queue_url(&self.url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to send message: {}", e),
            })?;

        let message_id = result.message_id.unwrap_or_default();
        debug!(message_id = %message_id, "Message sent to queue");

        Ok(message_id)
    }
}

#[async_trait]
impl JobSource for Queue {
    async fn receive(&self) -> Result<Vec<ReceivedMessage>> {
        let result = self
            .client
            .receive_message()
            .queue_url(&self.url)
            .max_number_of_messages(self.max_messages)
            .visibility_timeout(self.visibility_timeout)
            .wait_time_seconds(self.wait_time_seconds)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to receive messages: {}", e),
            })?;

        let messages: Vec<ReceivedMessage> = result
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| {
                m.receipt_handle.map(|receipt_handle| ReceivedMessage {
                    body: m.body,
                    receipt_handle,
                })
            })
            .collect();
        debug!(count = messages.len(), "Received messages from queue");

        Ok(messages)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to delete message: {}", e),
            })?;

        debug!("Message deleted from queue");
        Ok(())
    }
}

/// Routes named queues to their SQS URLs
pub struct SqsJobQueue {
    fetch: Option<Queue>,
    sentences: Option<Queue>,
}

impl SqsJobQueue {
    pub async fn new(config: &QueueConfig) -> Self {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = SqsClient::new(&aws_config);

        let queue_for = |url: &Option<String>| {
            url.clone()
                .map(|url| Queue::with_client(client.clone(), url, config))
        };

        Self {
            fetch: queue_for(&config.fetch_queue_url),
            sentences: queue_for(&config.sentences_queue_url),
        }
    }

    fn queue(&self, name: QueueName) -> Result<&Queue> {
        let queue = match name {
            QueueName::FetchFinancialReport => self.fetch.as_ref(),
            QueueName::FinancialSentences => self.sentences.as_ref(),
        };
        queue.ok_or_else(|| AppError::Configuration {
            message: format!("No queue URL configured for '{}'", name),
        })
    }
}

#[async_trait]
impl JobQueue for SqsJobQueue {
    async fn enqueue(&self, queue: QueueName, body: String) -> Result<String> {
        self.queue(queue)?.send(body).await
    }
}

// ============================================================================
// Job payloads
// ============================================================================

/// Batch of companies whose income statements should be fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchReportJob {
    pub job_id: Uuid,
    pub companies: Vec<CompanyRef>,
}

/// Statement sentences of a batch of companies, ready for embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceBatchJob {
    pub job_id: Uuid,
    pub companies: Vec<CompanySentences>,
}

/// All sentences of one company, newest calendar year first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanySentences {
    pub company_id: i64,
    pub sentences: Vec<TaggedSentence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedSentence {
    pub statement_id: i64,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_names() {
        assert_eq!(QueueName::FetchFinancialReport.as_str(), "fetch-financial-report");
        assert_eq!(QueueName::FinancialSentences.to_string(), "financial-sentences");
    }

    #[test]
    fn test_fetch_job_wire_format() {
        let job = FetchReportJob {
            job_id: Uuid::nil(),
            companies: vec![CompanyRef {
                company_id: 7,
                symbol: "AAPL".to_string(),
            }],
        };

        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["companies"][0]["symbol"], "AAPL");
        assert_eq!(json["companies"][0]["company_id"], 7);
    }

    #[test]
    fn test_parse_message_without_body() {
        let message = ReceivedMessage {
            body: None,
            receipt_handle: "r".to_string(),
        };
        let parsed: Result<FetchReportJob> = parse_message(&message);
        assert!(matches!(parsed, Err(AppError::QueueError { .. })));
    }

    #[tokio::test]
    async fn test_dispatch_serializes_into_named_queue() {
        let queue = MemoryQueue::new();
        let job = SentenceBatchJob {
            job_id: Uuid::new_v4(),
            companies: vec![],
        };

        dispatch(&queue, QueueName::FinancialSentences, &job).await.unwrap();

        let sent: Vec<SentenceBatchJob> = queue.jobs(QueueName::FinancialSentences);
        assert_eq!(sent, vec![job]);
        assert!(queue.jobs::<FetchReportJob>(QueueName::FetchFinancialReport).is_empty());
    }
}
