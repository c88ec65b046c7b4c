//! Bounded FIFO used for both the Ingestion Queue (E) and the Post-Process
//! Queue (G). Producers block on `put` up to a short timeout, then the
//! caller must treat the submission as retriable; consumers block on `get`
//! until an item arrives or the queue is closed.

use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

pub struct QueueFullError;

pub struct BoundedQueue<T> {
    tx: mpsc::Sender<T>,
    rx: Mutex<mpsc::Receiver<T>>,
    capacity: usize,
    put_timeout: Duration,
}

impl<T: Send + 'static> BoundedQueue<T> {
    pub fn new(capacity: usize, put_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        BoundedQueue {
            tx,
            rx: Mutex::new(rx),
            capacity,
            put_timeout,
        }
    }

    /// Blocks until the item is accepted or `put_timeout` elapses, in which
    /// case the caller should surface a retriable error to its own caller
    /// rather than losing the item silently.
    pub async fn put(&self, item: T) -> Result<(), QueueFullError> {
        match tokio::time::timeout(self.put_timeout, self.tx.send(item)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(QueueFullError),
            Err(_) => Err(QueueFullError),
        }
    }

    /// Blocks until an item is available or the queue is closed (shutdown).
    pub async fn get(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }

    /// Approximate current depth; exact under single-producer use, a lower
    /// bound otherwise since `capacity()` is a snapshot.
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let q = BoundedQueue::new(4, Duration::from_millis(50));
        q.put(1).await.ok().unwrap();
        q.put(2).await.ok().unwrap();
        assert_eq!(q.get().await, Some(1));
        assert_eq!(q.get().await, Some(2));
    }

    #[tokio::test]
    async fn put_times_out_when_full_and_uncollected() {
        let q = BoundedQueue::new(1, Duration::from_millis(20));
        q.put(1).await.ok().unwrap();
        let result = q.put(2).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn len_reflects_pending_items() {
        let q = BoundedQueue::new(4, Duration::from_millis(50));
        assert_eq!(q.len(), 0);
        q.put(1).await.ok().unwrap();
        q.put(2).await.ok().unwrap();
        assert_eq!(q.len(), 2);
        q.get().await;
        assert_eq!(q.len(), 1);
    }
}
