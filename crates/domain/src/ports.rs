//! Port definitions (traits) for external dependencies
//!
//! These traits define the boundaries between the rule engine and the
//! infrastructure around it. Adapters implement these traits to connect to
//! real storage, queues and social platforms.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::model::{DispatchJob, ExecutionRecord, OutboundMessage, Rule};

/// Error type for rule store operations
#[derive(Debug, Error)]
pub enum RuleStoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Rule not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Rule store is read-only")]
    ReadOnly,
}

/// Port for loading and managing rule definitions
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Active rules for an account, ordered by priority desc then creation asc
    async fn list_active_rules(&self, account_id: &str) -> Result<Vec<Rule>, RuleStoreError>;

    /// Fetch a single rule regardless of its active flag
    async fn get_rule(&self, rule_id: &str) -> Result<Option<Rule>, RuleStoreError>;

    /// Insert or replace a rule
    async fn save_rule(&self, rule: &Rule) -> Result<(), RuleStoreError>;

    /// Toggle a rule on or off
    async fn set_active(&self, rule_id: &str, active: bool) -> Result<(), RuleStoreError>;

    /// Delete a rule
    async fn delete_rule(&self, rule_id: &str) -> Result<(), RuleStoreError>;
}

/// Error type for platform send operations
#[derive(Debug, Error)]
pub enum SendError {
    #[error("API error (status {status:?}): {message}")]
    Api {
        status: Option<u16>,
        message: String,
    },
    #[error("Rate limited, retry after: {0:?}")]
    RateLimited(Option<std::time::Duration>),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Message rejected: {0}")]
    Rejected(String),
    #[error("Adapter disabled")]
    Disabled,
}

impl SendError {
    /// Whether a later attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            SendError::RateLimited(_) | SendError::Network(_) => true,
            SendError::Api { status, .. } => status.is_none_or(|s| s >= 500),
            SendError::Auth(_) | SendError::Rejected(_) | SendError::Disabled => false,
        }
    }
}

/// Result of a successful send
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Platform-specific message ID
    pub id: String,
}

/// Port for sending a rendered reply through a social platform
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Send a message on behalf of an account
    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, SendError>;

    /// Platform name this adapter serves (e.g., "instagram")
    fn platform(&self) -> &str;

    /// Check if this adapter is enabled
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Error type for dispatch queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue is closed")]
    Closed,
    #[error("Queue is full")]
    Full,
    #[error("Queue backend error: {0}")]
    Backend(String),
}

/// Port decoupling event ingestion from evaluation and sending
///
/// Delivery is at-least-once: a job may be handed out again if it is not
/// acknowledged, so consumers dedupe on the event fingerprint.
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Enqueue a job
    async fn enqueue(&self, job: DispatchJob) -> Result<(), QueueError>;

    /// Wait for the next job; `None` once the queue is closed and drained
    async fn dequeue(&self) -> Option<DispatchJob>;

    /// Acknowledge a processed job
    async fn ack(&self, _job: &DispatchJob) -> Result<(), QueueError> {
        Ok(())
    }

    /// Number of jobs waiting, if the backend can tell
    async fn depth(&self) -> Option<usize> {
        None
    }
}

/// Error type for execution log operations
#[derive(Debug, Error)]
pub enum ExecutionLogError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Port for persisting execution outcomes
#[async_trait]
pub trait ExecutionLog: Send + Sync {
    /// Record an execution
    async fn record(&self, record: &ExecutionRecord) -> Result<(), ExecutionLogError>;

    /// Whether an event was already answered (sent or dry run)
    async fn has_executed(&self, event_fingerprint: &str) -> Result<bool, ExecutionLogError>;

    /// Most recent executions for an account, newest first
    async fn list_recent(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, ExecutionLogError>;
}

/// Port for time/clock operations (enables deterministic testing)
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> OffsetDateTime;
}

/// Real clock implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}
