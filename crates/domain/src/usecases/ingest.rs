//! Ingestion use case - validates normalized events and enqueues them

use std::sync::Arc;
use uuid::Uuid;

use crate::{
    model::{DispatchJob, NormalizedEvent},
    ports::{Clock, DispatchQueue, QueueError},
};

/// Errors from event ingestion
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Invalid event: {0}")]
    InvalidEvent(String),
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Hands normalized events to the dispatch queue
pub struct EventIngestor<Q, Cl>
where
    Q: DispatchQueue + ?Sized,
    Cl: Clock + ?Sized,
{
    queue: Arc<Q>,
    clock: Arc<Cl>,
}

impl<Q, Cl> EventIngestor<Q, Cl>
where
    Q: DispatchQueue + ?Sized,
    Cl: Clock + ?Sized,
{
    pub fn new(queue: Arc<Q>, clock: Arc<Cl>) -> Self {
        Self { queue, clock }
    }

    /// Enqueue an event, returning the job ID
    pub async fn ingest(&self, event: NormalizedEvent) -> Result<Uuid, IngestError> {
        if event.account_id.trim().is_empty() {
            return Err(IngestError::InvalidEvent("missing account_id".to_string()));
        }
        if event.platform.trim().is_empty() {
            return Err(IngestError::InvalidEvent("missing platform".to_string()));
        }

        let job = DispatchJob {
            id: Uuid::new_v4(),
            event,
            enqueued_at: self.clock.now(),
        };
        let job_id = job.id;

        tracing::debug!(
            job_id = %job_id,
            platform = %job.event.platform,
            account_id = %job.event.account_id,
            kind = %job.event.kind,
            "Enqueueing event"
        );

        self.queue.enqueue(job).await?;
        Ok(job_id)
    }
}
