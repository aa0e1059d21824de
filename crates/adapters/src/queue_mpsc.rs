//! Bounded in-process dispatch queue on a tokio mpsc channel.
//!
//! No persistence: jobs still buffered when the process exits are lost.
//! `ack` is a no-op because a dequeued job is never handed out again.

use async_trait::async_trait;
use linkreply_domain::{DispatchJob, DispatchQueue, QueueError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, mpsc};
use tracing::trace;

/// In-memory queue; clones share the same channel
#[derive(Clone)]
pub struct MpscDispatchQueue {
    receiver: Arc<Mutex<mpsc::Receiver<DispatchJob>>>,
    // Dropped by `close()` so `recv` yields None once the buffer drains
    sender: Arc<StdMutex<Option<mpsc::Sender<DispatchJob>>>>,
    capacity: usize,
    depth: Arc<AtomicUsize>,
}

impl MpscDispatchQueue {
    /// Create a queue buffering at most `capacity` jobs (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            receiver: Arc::new(Mutex::new(receiver)),
            sender: Arc::new(StdMutex::new(Some(sender))),
            capacity,
            depth: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stop accepting jobs; already buffered jobs can still be dequeued
    pub fn close(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            if sender.take().is_some() {
                trace!("Closed dispatch queue");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().map(|s| s.is_none()).unwrap_or(true)
    }

    /// Enqueue without waiting; fails with `Full` when the buffer is at capacity
    pub fn try_enqueue(&self, job: DispatchJob) -> Result<(), QueueError> {
        let sender = self.sender()?;
        sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })?;
        self.depth.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn sender(&self) -> Result<mpsc::Sender<DispatchJob>, QueueError> {
        self.sender
            .lock()
            .map_err(|e| QueueError::Backend(e.to_string()))?
            .clone()
            .ok_or(QueueError::Closed)
    }
}

#[async_trait]
impl DispatchQueue for MpscDispatchQueue {
    /// Waits for buffer space when the queue is full
    async fn enqueue(&self, job: DispatchJob) -> Result<(), QueueError> {
        let sender = self.sender()?;
        // Count before sending so a fast consumer never underflows the gauge
        self.depth.fetch_add(1, Ordering::SeqCst);
        if sender.send(job).await.is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed);
        }
        trace!("Enqueued dispatch job");
        Ok(())
    }

    async fn dequeue(&self) -> Option<DispatchJob> {
        let mut receiver = self.receiver.lock().await;
        let job = receiver.recv().await;
        if job.is_some() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        trace!(has_job = job.is_some(), "Dequeued dispatch job");
        job
    }

    async fn depth(&self) -> Option<usize> {
        Some(self.depth.load(Ordering::SeqCst))
    }
}
