use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

/// Unbounded FIFO queue shared by a fixed set of consumers.
///
/// Consumers take turns on the receiving end, so items leave in the order
/// they were pushed. Closing stops new pushes; consumers keep receiving until
/// the queue is empty and then get `None`.
pub struct WorkQueue<T> {
    sender: Mutex<Option<mpsc::UnboundedSender<T>>>,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<T>>,
    size: AtomicUsize,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: AsyncMutex::new(rx),
            size: AtomicUsize::new(0),
        }
    }

    fn sender(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<T>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push an item; hands it back if the queue is closed
    pub fn push(&self, item: T) -> Result<(), T> {
        let sender = self.sender();
        let Some(tx) = sender.as_ref() else {
            return Err(item);
        };

        self.size.fetch_add(1, Ordering::AcqRel);
        tx.send(item).map_err(|rejected| {
            self.size.fetch_sub(1, Ordering::AcqRel);
            rejected.0
        })
    }

    /// Wait for the next item. `None` once closed and empty.
    pub async fn pop(&self) -> Option<T> {
        let item = self.receiver.lock().await.recv().await;
        if item.is_some() {
            self.size.fetch_sub(1, Ordering::AcqRel);
        }
        item
    }

    /// Stop accepting items. Returns false if already closed.
    pub fn close(&self) -> bool {
        self.sender().take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }

    /// Drop everything still queued and return how many items that was.
    ///
    /// Waits for any consumer currently inside `pop` to leave it.
    pub async fn clear(&self) -> usize {
        let mut rx = self.receiver.lock().await;
        let mut dropped = 0;
        while let Ok(item) = rx.try_recv() {
            drop(item);
            self.size.fetch_sub(1, Ordering::AcqRel);
            dropped += 1;
        }
        dropped
    }

    /// Returns the current number of items in the queue
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
