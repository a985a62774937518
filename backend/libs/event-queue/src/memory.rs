//! In-process queue backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::debug;

use crate::{Delivery, EventEnvelope, EventPublisher, EventSource, QueueError, QueueResult, Receipt};

type Slot = (EventEnvelope, u32);

struct Inner {
    tx: StdMutex<Option<mpsc::UnboundedSender<Slot>>>,
    rx: Mutex<mpsc::UnboundedReceiver<Slot>>,
    /// Published or redelivered events that have not been acked yet.
    pending: AtomicUsize,
    idle: Notify,
}

/// Unbounded in-memory queue implementing both sides of the contract.
///
/// `nack` appends the delivery to the tail, so a handed-back event is
/// delivered after everything already queued. Clones share the same queue.
#[derive(Clone)]
pub struct InMemoryQueue {
    inner: Arc<Inner>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                tx: StdMutex::new(Some(tx)),
                rx: Mutex::new(rx),
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Number of events that were published but not acknowledged yet.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Resolves once every published event has been acknowledged.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting events. Queued events are still delivered, after which
    /// `recv` returns [`QueueError::Closed`].
    pub fn close(&self) {
        if let Ok(mut tx) = self.inner.tx.lock() {
            tx.take();
        }
    }

    fn enqueue(&self, slot: Slot) -> QueueResult<()> {
        let guard = self
            .inner
            .tx
            .lock()
            .map_err(|_| QueueError::PublishFailed("queue lock poisoned".to_string()))?;
        let tx = guard.as_ref().ok_or(QueueError::Closed)?;
        tx.send(slot).map_err(|_| QueueError::Closed)
    }
}

#[async_trait]
impl EventPublisher for InMemoryQueue {
    async fn publish(&self, envelope: &EventEnvelope) -> QueueResult<()> {
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.enqueue((envelope.clone(), 0)) {
            self.inner.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(e);
        }

        debug!(
            event_id = %envelope.event_id,
            event_type = envelope.event.event_type(),
            "Event queued in memory"
        );
        Ok(())
    }
}

#[async_trait]
impl EventSource for InMemoryQueue {
    async fn recv(&self) -> QueueResult<Delivery> {
        let mut rx = self.inner.rx.lock().await;
        let (envelope, attempt) = rx.recv().await.ok_or(QueueError::Closed)?;
        Ok(Delivery {
            envelope,
            attempt,
            receipt: Receipt::Memory,
        })
    }

    async fn ack(&self, _delivery: &Delivery) -> QueueResult<()> {
        let previous = self.inner.pending.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 {
            self.inner.idle.notify_waiters();
        }
        Ok(())
    }

    async fn nack(&self, delivery: Delivery) -> QueueResult<()> {
        // The event stays pending while it sits in the queue again.
        self.enqueue((delivery.envelope, delivery.attempt + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FeedEvent;
    use std::time::Duration;
    use uuid::Uuid;

    fn patched() -> EventEnvelope {
        EventEnvelope::new(FeedEvent::PostPatched {
            post_id: Uuid::new_v4(),
        })
    }

    #[tokio::test]
    async fn test_publish_recv_ack() {
        let queue = InMemoryQueue::new();
        let envelope = patched();

        queue.publish(&envelope).await.unwrap();
        assert_eq!(queue.pending(), 1);

        let delivery = queue.recv().await.unwrap();
        assert_eq!(delivery.envelope, envelope);
        assert_eq!(delivery.attempt, 0);

        queue.ack(&delivery).await.unwrap();
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_nack_redelivers_after_queued_events() {
        let queue = InMemoryQueue::new();
        let first = patched();
        let second = patched();
        queue.publish(&first).await.unwrap();
        queue.publish(&second).await.unwrap();

        let delivery = queue.recv().await.unwrap();
        assert_eq!(delivery.envelope, first);
        queue.nack(delivery).await.unwrap();

        let next = queue.recv().await.unwrap();
        assert_eq!(next.envelope, second);
        let again = queue.recv().await.unwrap();
        assert_eq!(again.envelope, first);
        assert_eq!(again.attempt, 1);
        assert_eq!(queue.pending(), 2);
    }

    #[tokio::test]
    async fn test_wait_idle_resolves_after_last_ack() {
        let queue = InMemoryQueue::new();
        queue.publish(&patched()).await.unwrap();

        let consumer = queue.clone();
        tokio::spawn(async move {
            let delivery = consumer.recv().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            consumer.ack(&delivery).await.unwrap();
        });

        tokio::time::timeout(Duration::from_secs(2), queue.wait_idle())
            .await
            .expect("queue should drain");
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let queue = InMemoryQueue::new();
        queue.publish(&patched()).await.unwrap();
        queue.close();

        assert!(matches!(
            queue.publish(&patched()).await,
            Err(QueueError::Closed)
        ));
        assert!(queue.recv().await.is_ok());
        assert!(matches!(queue.recv().await, Err(QueueError::Closed)));
    }
}
