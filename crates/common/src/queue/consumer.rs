//! Queue polling loop shared by the worker binaries

use super::{parse_message, JobSource, QueueName, ReceivedMessage};
use crate::errors::Result;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Outcome of handling one job. Handlers report, they never fail.
pub trait JobOutcome {
    /// Short label used in logs and metrics
    fn label(&self) -> &'static str;
}

const MAX_FAILURES: u32 = 5;
const CIRCUIT_BREAK_DURATION: Duration = Duration::from_secs(30);
const RECEIVE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Receive one round of messages, handle each and delete it.
///
/// Every received message is deleted, including undecodable ones. Returns the
/// number of messages received.
pub async fn poll_once<S, J, O, H, Fut>(source: &S, queue: QueueName, handler: &H) -> Result<usize>
where
    S: JobSource + ?Sized,
    J: DeserializeOwned,
    O: JobOutcome,
    H: Fn(J) -> Fut,
    Fut: Future<Output = O>,
{
    let messages = source.receive().await?;
    Ok(handle_round(source, queue, handler, messages).await)
}

async fn handle_round<S, J, O, H, Fut>(
    source: &S,
    queue: QueueName,
    handler: &H,
    messages: Vec<ReceivedMessage>,
) -> usize
where
    S: JobSource + ?Sized,
    J: DeserializeOwned,
    O: JobOutcome,
    H: Fn(J) -> Fut,
    Fut: Future<Output = O>,
{
    let received = messages.len();

    for message in messages {
        let started = Instant::now();

        let label = match parse_message::<J>(&message) {
            Ok(job) => handler(job).await.label(),
            Err(e) => {
                error!(queue = %queue, error = %e, "Discarding undecodable message");
                "undecodable"
            }
        };

        crate::metrics::record_job_processed(queue.as_str(), label, started.elapsed());

        if let Err(e) = source.delete(&message.receipt_handle).await {
            error!(queue = %queue, error = %e, "Failed to delete message");
        }
    }

    received
}

/// Poll `source` until `shutdown` resolves.
///
/// Receive failures open a circuit breaker after repeated errors. Shutdown is
/// only observed between rounds: a received round is always handled and
/// deleted before the loop exits.
pub async fn run_consumer<S, J, O, H, Fut>(
    source: &S,
    queue: QueueName,
    handler: H,
    shutdown: impl Future<Output = ()>,
) where
    S: JobSource + ?Sized,
    J: DeserializeOwned,
    O: JobOutcome,
    H: Fn(J) -> Fut,
    Fut: Future<Output = O>,
{
    tokio::pin!(shutdown);
    let mut consecutive_failures = 0;

    info!(queue = %queue, "Starting queue polling");

    loop {
        if consecutive_failures >= MAX_FAILURES {
            warn!(
                queue = %queue,
                failures = consecutive_failures,
                "Circuit breaker open, pausing..."
            );
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(CIRCUIT_BREAK_DURATION) => {}
            }
            consecutive_failures = 0;
            info!(queue = %queue, "Circuit breaker reset, resuming...");
        }

        let received = tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!(queue = %queue, "Shutdown signal received");
                break;
            }
            result = source.receive() => result,
        };

        match received {
            Ok(messages) => {
                consecutive_failures = 0;
                handle_round(source, queue, &handler, messages).await;
            }
            Err(e) => {
                consecutive_failures += 1;
                error!(
                    queue = %queue,
                    error = %e,
                    failures = consecutive_failures,
                    "Failed to receive messages from queue"
                );
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(RECEIVE_RETRY_DELAY) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{dispatch, FetchReportJob, JobQueue, MemoryConsumer, MemoryQueue};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    struct Done;

    impl JobOutcome for Done {
        fn label(&self) -> &'static str {
            "done"
        }
    }

    #[tokio::test]
    async fn test_poll_once_deletes_every_message() {
        let queue = Arc::new(MemoryQueue::new());
        let job = FetchReportJob {
            job_id: Uuid::new_v4(),
            companies: vec![],
        };
        dispatch(queue.as_ref(), QueueName::FetchFinancialReport, &job)
            .await
            .unwrap();
        queue
            .enqueue(QueueName::FetchFinancialReport, "not json".to_string())
            .await
            .unwrap();

        let handled = AtomicUsize::new(0);
        let consumer = MemoryConsumer::new(queue.clone(), QueueName::FetchFinancialReport);
        let received = poll_once(&consumer, QueueName::FetchFinancialReport, &|_: FetchReportJob| {
            handled.fetch_add(1, Ordering::SeqCst);
            async { Done }
        })
        .await
        .unwrap();

        assert_eq!(received, 2);
        assert_eq!(handled.load(Ordering::SeqCst), 1);
        assert_eq!(consumer.deleted(), 2);
        assert_eq!(queue.len(QueueName::FetchFinancialReport), 0);
    }

    #[tokio::test]
    async fn test_run_consumer_stops_on_shutdown() {
        let queue = Arc::new(MemoryQueue::new());
        let consumer = MemoryConsumer::new(queue, QueueName::FinancialSentences);

        run_consumer(
            &consumer,
            QueueName::FinancialSentences,
            |_: FetchReportJob| async { Done },
            async {},
        )
        .await;
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_job() {
        let queue = Arc::new(MemoryQueue::new());
        let job = FetchReportJob {
            job_id: Uuid::new_v4(),
            companies: vec![],
        };
        dispatch(queue.as_ref(), QueueName::FetchFinancialReport, &job)
            .await
            .unwrap();

        let consumer = MemoryConsumer::new(queue.clone(), QueueName::FetchFinancialReport);
        let started = AtomicUsize::new(0);
        let finished = AtomicUsize::new(0);

        run_consumer(
            &consumer,
            QueueName::FetchFinancialReport,
            |_: FetchReportJob| {
                started.fetch_add(1, Ordering::SeqCst);
                let finished = &finished;
                async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Done
                }
            },
            tokio::time::sleep(Duration::from_millis(50)),
        )
        .await;

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(consumer.deleted(), 1);
        assert!(queue.is_empty(QueueName::FetchFinancialReport));
    }
}
