//! Application use cases around the rule engine

pub mod ingest;
pub mod worker;

pub use ingest::{EventIngestor, IngestError};
pub use worker::{AdapterRegistry, DispatchWorker, DispatchWorkerConfig};
