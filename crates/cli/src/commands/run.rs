//! Run command - ingest events, evaluate rules, and dispatch replies

use anyhow::{Context, Result, bail};
use futures::FutureExt;
use linkreply_adapters::{
    outbox::{OutboxAdapter, OutboxWriter},
    platforms::GraphMessagingAdapter,
    queue::MpscDispatchQueue,
    rules::{FileRuleStore, SqliteStore},
};
use linkreply_domain::{
    Clock, DispatchOutcome, DispatchQueue, NormalizedEvent, PlatformAdapter, RuleStore,
    SystemClock,
    engine::{EvaluatorConfig, RuleEvaluator},
    usecases::{AdapterRegistry, DispatchWorker, DispatchWorkerConfig, EventIngestor},
};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::args::RunArgs;
use crate::config::{AppConfig, PlatformConfig, RuleSource};

pub async fn execute(args: RunArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;

    let require_approval = args.require_approval;
    let outbox_path = if require_approval {
        Some(args.outbox.clone().unwrap_or_else(default_outbox_path))
    } else {
        None
    };

    if args.outbox.is_some() && !require_approval {
        tracing::warn!("--outbox is ignored without --require-approval");
    }

    let mut dry_run = args.dry_run || config.general.dry_run;
    if require_approval && dry_run {
        tracing::info!("--require-approval overrides dry-run");
        dry_run = false;
    }

    tracing::info!(
        dry_run = dry_run,
        require_approval = require_approval,
        outbox = ?outbox_path,
        rule_source = ?config.general.rule_source,
        events = %args.events.display(),
        "Starting linkreply run"
    );

    // Build dependencies
    let state_store = Arc::new(
        SqliteStore::new(&config.general.state_db_path)
            .await
            .context("Failed to initialize SQLite state store")?,
    );

    let rule_store: Arc<dyn RuleStore> = match config.general.rule_source {
        RuleSource::File => Arc::new(
            FileRuleStore::open(&config.general.rules_path).context("Failed to load rules")?,
        ),
        RuleSource::Sqlite => state_store.clone(),
    };

    let adapters = match outbox_path {
        Some(path) => build_outbox_adapters(&config, path).await?,
        None => build_graph_adapters(&config, dry_run)?,
    };

    let clock = Arc::new(SystemClock);
    let evaluator = RuleEvaluator::new(
        clock.clone(),
        EvaluatorConfig {
            link_page_url: config.general.link_page_url(),
            utc_offset: config.general.utc_offset()?,
        },
    );

    let queue = Arc::new(MpscDispatchQueue::new(config.dispatch.queue_capacity));
    let ingestor = EventIngestor::new(queue.clone(), clock.clone());

    let worker = DispatchWorker::new(
        queue.clone(),
        rule_store,
        state_store,
        adapters,
        evaluator,
        clock,
        DispatchWorkerConfig {
            dry_run,
            max_concurrent: config.dispatch.max_concurrent,
            max_attempts: config.dispatch.max_attempts,
            retry_backoff: config.dispatch.retry_backoff(),
            max_retry_delay: config.dispatch.max_retry_delay(),
        },
    );

    let reader = open_events(&args.events).await?;

    let shutdown = shutdown_signal().boxed().shared();

    // Ingest and dispatch concurrently so a full queue never stalls the reader
    let produce = async {
        tokio::select! {
            stats = ingest_lines(&ingestor, reader) => {
                queue.close();
                Some(stats)
            }
            _ = shutdown.clone() => None,
        }
    };

    let (ingest, results) = tokio::join!(produce, worker.run(shutdown.clone()));

    let mut summary = Summary::default();
    for (job_id, outcome) in &results {
        summary.add(outcome);
        match outcome {
            DispatchOutcome::Replied {
                rule_id,
                external_id,
                dry_run,
                ..
            } => {
                tracing::info!(
                    job_id = %job_id,
                    rule_id = %rule_id,
                    external_id = ?external_id,
                    dry_run = dry_run,
                    "Replied"
                );
            }
            DispatchOutcome::NoMatch => {
                tracing::debug!(job_id = %job_id, "No rule matched");
            }
            DispatchOutcome::Skipped { reason } => {
                tracing::debug!(job_id = %job_id, reason = %reason, "Skipped");
            }
            DispatchOutcome::Failed { error } => {
                tracing::error!(job_id = %job_id, error = %error, "Failed");
            }
        }
    }

    match ingest {
        Some(ingest) => println!(
            "Ingested {} events ({} rejected)",
            ingest.accepted, ingest.rejected
        ),
        None => println!("Interrupted before every event was ingested"),
    }
    println!(
        "Processed {} jobs: {} replied, {} no match, {} skipped, {} failed",
        results.len(),
        summary.replied,
        summary.no_match,
        summary.skipped,
        summary.failed
    );

    tracing::info!("linkreply run completed");
    Ok(())
}

#[derive(Debug, Default)]
struct IngestStats {
    accepted: usize,
    rejected: usize,
}

#[derive(Debug, Default)]
struct Summary {
    replied: usize,
    no_match: usize,
    skipped: usize,
    failed: usize,
}

impl Summary {
    fn add(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Replied { .. } => self.replied += 1,
            DispatchOutcome::NoMatch => self.no_match += 1,
            DispatchOutcome::Skipped { .. } => self.skipped += 1,
            DispatchOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}

async fn open_events(path: &Path) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(tokio::io::stdin()));
    }

    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open events file: {}", path.display()))?;
    Ok(Box::new(file))
}

/// Parse one event per line; blank lines are skipped, bad lines are logged
async fn ingest_lines<Q, Cl>(
    ingestor: &EventIngestor<Q, Cl>,
    reader: Box<dyn AsyncRead + Unpin + Send>,
) -> IngestStats
where
    Q: DispatchQueue + ?Sized,
    Cl: Clock + ?Sized,
{
    let mut stats = IngestStats::default();
    let mut lines = BufReader::new(reader).lines();
    let mut line_number = 0usize;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read events");
                break;
            }
        };
        line_number += 1;

        if line.trim().is_empty() {
            continue;
        }

        let event: NormalizedEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(line = line_number, error = %e, "Skipping malformed event");
                stats.rejected += 1;
                continue;
            }
        };

        match ingestor.ingest(event).await {
            Ok(_) => stats.accepted += 1,
            Err(e) => {
                tracing::warn!(line = line_number, error = %e, "Event rejected");
                stats.rejected += 1;
            }
        }
    }

    stats
}

fn platforms(config: &AppConfig) -> [(&'static str, &PlatformConfig); 2] {
    [
        ("instagram", &config.instagram),
        ("facebook", &config.facebook),
    ]
}

async fn build_outbox_adapters(config: &AppConfig, path: PathBuf) -> Result<AdapterRegistry> {
    let writer = OutboxWriter::new(path.clone())
        .await
        .context("Failed to initialize outbox writer")?;

    tracing::info!(outbox = %path.display(), "Writing approvals to outbox");

    let mut registry = AdapterRegistry::new();
    for (name, platform) in platforms(config) {
        if platform.enabled {
            registry.register(Arc::new(OutboxAdapter::new(writer.clone(), name)));
        }
    }

    if registry.platforms().is_empty() {
        tracing::warn!("Require approval enabled but no platforms are enabled");
    }

    Ok(registry)
}

fn build_graph_adapters(config: &AppConfig, dry_run: bool) -> Result<AdapterRegistry> {
    let mut registry = AdapterRegistry::new();

    for (name, platform) in platforms(config) {
        let adapter: Arc<dyn PlatformAdapter> = if dry_run || !platform.enabled {
            Arc::new(GraphMessagingAdapter::disabled(name))
        } else {
            let token = load_access_token(&platform.access_token_env, name)?;
            Arc::new(GraphMessagingAdapter::with_base_url(
                name,
                token,
                platform.base_url.clone(),
                platform.api_version.clone(),
            ))
        };
        registry.register(adapter);
    }

    Ok(registry)
}

pub(crate) fn load_access_token(env_var: &str, platform: &str) -> Result<SecretString> {
    if env_var.trim().is_empty() {
        bail!("No access token env var configured for platform {}", platform);
    }

    let token = std::env::var(env_var).with_context(|| {
        format!(
            "Missing access token env var {} for platform {}",
            env_var, platform
        )
    })?;

    if token.trim().is_empty() {
        bail!(
            "Access token env var {} is empty for platform {}",
            env_var,
            platform
        );
    }

    Ok(SecretString::new(token.into()))
}

fn default_outbox_path() -> PathBuf {
    PathBuf::from("./outbox.jsonl")
}
