//! Dispatch worker - dequeues events, selects a rule, and sends the reply

use std::collections::{HashMap, HashSet};
use std::future::{self, Future};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::{Duration, sleep};
use uuid::Uuid;

use crate::{
    engine::RuleEvaluator,
    model::{DispatchJob, DispatchOutcome, ExecutionRecord, ExecutionStatus, OutboundMessage},
    ports::{
        Clock, DispatchQueue, ExecutionLog, PlatformAdapter, RuleStore, SendError, SendReceipt,
    },
};

/// Configuration for the dispatch worker
#[derive(Debug, Clone)]
pub struct DispatchWorkerConfig {
    /// Dry run mode (evaluate and record, but don't send)
    pub dry_run: bool,
    /// Maximum jobs processed concurrently
    pub max_concurrent: usize,
    /// Send attempts per job, including the first
    pub max_attempts: u32,
    /// Base delay before the first retry; doubles per attempt
    pub retry_backoff: Duration,
    /// Upper bound on any single retry wait, including a server's Retry-After
    pub max_retry_delay: Duration,
}

impl Default for DispatchWorkerConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            max_concurrent: 4,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(30),
        }
    }
}

/// Platform adapters keyed by platform name
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own platform name, replacing any previous one
    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters
            .insert(adapter.platform().to_ascii_lowercase(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, platform: &str) -> Option<&Arc<dyn PlatformAdapter>> {
        self.adapters.get(&platform.to_ascii_lowercase())
    }

    pub fn platforms(&self) -> Vec<&str> {
        let mut platforms: Vec<_> = self.adapters.keys().map(String::as_str).collect();
        platforms.sort_unstable();
        platforms
    }
}

/// Dispatch worker orchestrator
pub struct DispatchWorker<Q, R, L, Cl>
where
    Q: DispatchQueue + ?Sized,
    R: RuleStore + ?Sized,
    L: ExecutionLog + ?Sized,
    Cl: Clock + ?Sized,
{
    queue: Arc<Q>,
    rule_store: Arc<R>,
    execution_log: Arc<L>,
    adapters: AdapterRegistry,
    evaluator: RuleEvaluator,
    clock: Arc<Cl>,
    config: DispatchWorkerConfig,
    // Fingerprints of events currently being processed
    in_flight: Mutex<HashSet<String>>,
}

impl<Q, R, L, Cl> DispatchWorker<Q, R, L, Cl>
where
    Q: DispatchQueue + ?Sized,
    R: RuleStore + ?Sized,
    L: ExecutionLog + ?Sized,
    Cl: Clock + ?Sized,
{
    pub fn new(
        queue: Arc<Q>,
        rule_store: Arc<R>,
        execution_log: Arc<L>,
        adapters: AdapterRegistry,
        evaluator: RuleEvaluator,
        clock: Arc<Cl>,
        config: DispatchWorkerConfig,
    ) -> Self {
        Self {
            queue,
            rule_store,
            execution_log,
            adapters,
            evaluator,
            clock,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Process jobs until the queue is closed and drained
    pub async fn run_until_idle(&self) -> Vec<(Uuid, DispatchOutcome)> {
        self.run(future::pending()).await
    }

    /// Process jobs until the queue is drained or `shutdown` resolves,
    /// returning the outcomes of the jobs that finished.
    ///
    /// Jobs in flight at shutdown are dropped unacknowledged, so an
    /// at-least-once queue hands them out again.
    pub async fn run<F>(&self, shutdown: F) -> Vec<(Uuid, DispatchOutcome)>
    where
        F: Future<Output = ()>,
    {
        let max_concurrent = self.config.max_concurrent.max(1);
        let mut tasks: FuturesUnordered<BoxFuture<'_, (Uuid, DispatchOutcome)>> =
            FuturesUnordered::new();
        let mut results = Vec::new();
        let mut exhausted = false;
        tokio::pin!(shutdown);

        while !(exhausted && tasks.is_empty()) {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(in_flight = tasks.len(), "Dispatch worker stopping");
                    break;
                }
                job = self.queue.dequeue(), if !exhausted && tasks.len() < max_concurrent => {
                    match job {
                        Some(job) => tasks.push(Box::pin(self.handle(job))),
                        None => exhausted = true,
                    }
                }
                Some(result) = tasks.next(), if !tasks.is_empty() => results.push(result),
            }
        }

        results
    }

    async fn handle(&self, job: DispatchJob) -> (Uuid, DispatchOutcome) {
        let outcome = self.process_job(&job).await;

        match &outcome {
            DispatchOutcome::Failed { error } => {
                tracing::error!(job_id = %job.id, error = %error, "Job failed");
            }
            _ => {
                if let Err(e) = self.queue.ack(&job).await {
                    tracing::warn!(job_id = %job.id, error = %e, "Failed to ack job");
                }
            }
        }

        (job.id, outcome)
    }

    /// Process a single job
    pub async fn process_job(&self, job: &DispatchJob) -> DispatchOutcome {
        let event = &job.event;
        let fingerprint = event.fingerprint();

        // Held until the outcome is recorded so a concurrent redelivery
        // cannot pass the execution log check below
        let Some(_claim) = self.claim(&fingerprint) else {
            return DispatchOutcome::Skipped {
                reason: "Event already being processed".to_string(),
            };
        };

        // At-least-once delivery: skip events already answered
        match self.execution_log.has_executed(&fingerprint).await {
            Ok(true) => {
                return DispatchOutcome::Skipped {
                    reason: "Event already answered".to_string(),
                };
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to check execution log, continuing");
            }
            Ok(false) => {}
        }

        let rules = match self.rule_store.list_active_rules(&event.account_id).await {
            Ok(rules) => rules,
            Err(e) => {
                return DispatchOutcome::Failed {
                    error: format!("Loading rules failed: {}", e),
                };
            }
        };

        let Some(selection) = self.evaluator.select(&rules, event) else {
            return DispatchOutcome::NoMatch;
        };
        let message = selection.message().to_string();

        tracing::info!(
            job_id = %job.id,
            rule_id = %selection.rule.id,
            platform = %event.platform,
            account_id = %event.account_id,
            "Rule matched"
        );

        if self.config.dry_run {
            tracing::info!(
                rule_id = %selection.rule.id,
                message = %message,
                "[DRY RUN] Would reply"
            );
            self.record(
                &fingerprint,
                job,
                &selection.rule.id,
                &message,
                ExecutionStatus::DryRun,
                None,
                None,
                0,
            )
            .await;
            return DispatchOutcome::Replied {
                rule_id: selection.rule.id,
                message,
                external_id: None,
                dry_run: true,
            };
        }

        let Some(adapter) = self
            .adapters
            .get(&event.platform)
            .filter(|adapter| adapter.is_enabled())
        else {
            return DispatchOutcome::Skipped {
                reason: format!("No enabled adapter for platform '{}'", event.platform),
            };
        };

        let outbound = OutboundMessage {
            account_id: event.account_id.clone(),
            recipient_id: event.sender_id.clone(),
            reply_to_event_id: event.event_id.clone(),
            text: message.clone(),
        };

        let (result, attempts) = self.send_with_retry(adapter.as_ref(), &outbound).await;

        match result {
            Ok(receipt) => {
                self.record(
                    &fingerprint,
                    job,
                    &selection.rule.id,
                    &message,
                    ExecutionStatus::Sent,
                    Some(receipt.id.clone()),
                    None,
                    attempts,
                )
                .await;
                DispatchOutcome::Replied {
                    rule_id: selection.rule.id,
                    message,
                    external_id: Some(receipt.id),
                    dry_run: false,
                }
            }
            Err(e) => {
                let error = format!("Send failed after {} attempt(s): {}", attempts, e);
                self.record(
                    &fingerprint,
                    job,
                    &selection.rule.id,
                    &message,
                    ExecutionStatus::Failed,
                    None,
                    Some(error.clone()),
                    attempts,
                )
                .await;
                DispatchOutcome::Failed { error }
            }
        }
    }

    /// Send, retrying retryable errors with exponential backoff
    async fn send_with_retry(
        &self,
        adapter: &dyn PlatformAdapter,
        message: &OutboundMessage,
    ) -> (Result<SendReceipt, SendError>, u32) {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match adapter.send(message).await {
                Ok(receipt) => return (Ok(receipt), attempt),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry_delay(&e, attempt);
                    tracing::warn!(
                        platform = adapter.platform(),
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Send failed, retrying"
                    );
                    sleep(delay).await;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }

    /// Wait before the next attempt: the server's Retry-After when given,
    /// otherwise exponential backoff. Never longer than `max_retry_delay`.
    fn retry_delay(&self, error: &SendError, attempt: u32) -> Duration {
        let delay = match error {
            SendError::RateLimited(Some(retry_after)) => *retry_after,
            _ => backoff_delay(self.config.retry_backoff, attempt),
        };
        delay.min(self.config.max_retry_delay)
    }

    fn claim(&self, fingerprint: &str) -> Option<Claim<'_>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        in_flight.insert(fingerprint.to_string()).then(|| Claim {
            in_flight: &self.in_flight,
            fingerprint: fingerprint.to_string(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        fingerprint: &str,
        job: &DispatchJob,
        rule_id: &str,
        message: &str,
        status: ExecutionStatus,
        external_id: Option<String>,
        error: Option<String>,
        attempts: u32,
    ) {
        let record = ExecutionRecord {
            id: Uuid::new_v4(),
            event_fingerprint: fingerprint.to_string(),
            rule_id: rule_id.to_string(),
            account_id: job.event.account_id.clone(),
            platform: job.event.platform.clone(),
            message: message.to_string(),
            status,
            external_id,
            error,
            attempts,
            executed_at: self.clock.now(),
        };

        if let Err(e) = self.execution_log.record(&record).await {
            tracing::error!(error = %e, "Failed to record execution");
        }
    }
}

/// Releases an in-flight fingerprint when dropped
struct Claim<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    fingerprint: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.fingerprint);
    }
}

/// `base * 2^(attempt - 1)`, capped to avoid overflow
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent)
}
