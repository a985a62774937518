//! Fan-out consumer pool.
//!
//! `concurrency` tasks share one [`EventSource`]. A delivery is acknowledged
//! only after the fan-out worker applied it; failures and timeouts are handed
//! back to the queue after an exponential backoff and retried without limit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use event_queue::{Delivery, EventSource, QueueError};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::FanoutWorker;
use crate::metrics::{FANOUT_DURATION_SECONDS, FANOUT_EVENTS_TOTAL, FEED_ITEMS_WRITTEN_TOTAL};

const MAX_BACKOFF_SECS: u64 = 60;

/// Delay before handing back a delivery that failed `attempt` times before.
pub fn calculate_backoff(attempt: u32) -> Duration {
    let backoff_secs = 1u64
        .checked_shl(attempt)
        .unwrap_or(MAX_BACKOFF_SECS)
        .min(MAX_BACKOFF_SECS);
    Duration::from_secs(backoff_secs)
}

pub struct WorkerPool {
    source: Arc<dyn EventSource>,
    worker: Arc<FanoutWorker>,
    concurrency: usize,
    task_timeout: Duration,
}

impl WorkerPool {
    pub fn new(
        source: Arc<dyn EventSource>,
        worker: Arc<FanoutWorker>,
        concurrency: usize,
        task_timeout: Duration,
    ) -> Self {
        Self {
            source,
            worker,
            concurrency: concurrency.max(1),
            task_timeout,
        }
    }

    /// Run until `shutdown` flips to `true` or the source closes.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(
            concurrency = self.concurrency,
            task_timeout_secs = self.task_timeout.as_secs(),
            "Starting fan-out worker pool"
        );

        let mut tasks = JoinSet::new();
        for task_id in 0..self.concurrency {
            let consumer = Consumer {
                task_id,
                source: self.source.clone(),
                worker: self.worker.clone(),
                task_timeout: self.task_timeout,
            };
            tasks.spawn(consumer.run(shutdown.clone()));
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Fan-out task join error: {}", e);
            }
        }

        info!("Fan-out worker pool stopped");
    }
}

struct Consumer {
    task_id: usize,
    source: Arc<dyn EventSource>,
    worker: Arc<FanoutWorker>,
    task_timeout: Duration,
}

impl Consumer {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let delivery = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                received = self.source.recv() => received,
            };

            match delivery {
                Ok(delivery) => self.process(delivery, &mut shutdown).await,
                Err(QueueError::Closed) => {
                    info!(task_id = self.task_id, "Event source closed");
                    break;
                }
                Err(e) => {
                    error!(task_id = self.task_id, "Failed to receive feed event: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        debug!(task_id = self.task_id, "Fan-out task exiting");
    }

    async fn process(&self, delivery: Delivery, shutdown: &mut watch::Receiver<bool>) {
        let kind = delivery.event().kind();
        let event_id = delivery.envelope.event_id;
        let started = Instant::now();

        let outcome = tokio::time::timeout(self.task_timeout, self.worker.handle(delivery.event())).await;

        FANOUT_DURATION_SECONDS
            .with_label_values(&[kind])
            .observe(started.elapsed().as_secs_f64());

        let failure = match outcome {
            Ok(Ok(written)) => {
                FANOUT_EVENTS_TOTAL.with_label_values(&[kind, "applied"]).inc();
                FEED_ITEMS_WRITTEN_TOTAL
                    .with_label_values(&[kind])
                    .inc_by(written);

                if let Err(e) = self.source.ack(&delivery).await {
                    // Not fatal: the event will come back and re-apply as a no-op.
                    warn!(event_id = %event_id, "Failed to ack feed event: {}", e);
                }

                debug!(event_id = %event_id, kind, written, "Feed event applied");
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {:?}", self.task_timeout),
        };

        FANOUT_EVENTS_TOTAL.with_label_values(&[kind, "retried"]).inc();

        let backoff = calculate_backoff(delivery.attempt);
        warn!(
            event_id = %event_id,
            kind,
            attempt = delivery.attempt,
            backoff_secs = backoff.as_secs(),
            error = %failure,
            "Feed event failed, scheduling redelivery"
        );

        // Shutdown cuts the backoff short; the delivery is still handed back.
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.changed() => {}
        }

        if let Err(e) = self.source.nack(delivery).await {
            error!(event_id = %event_id, "Failed to hand back feed event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        assert_eq!(calculate_backoff(0), Duration::from_secs(1));
        assert_eq!(calculate_backoff(1), Duration::from_secs(2));
        assert_eq!(calculate_backoff(5), Duration::from_secs(32));
        assert_eq!(calculate_backoff(6), Duration::from_secs(60));
        assert_eq!(calculate_backoff(200), Duration::from_secs(60));
    }
}
