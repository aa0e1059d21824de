//! Outbox adapter for approval mode: replies are written to a JSONL file
//! instead of being sent.

use async_trait::async_trait;
use linkreply_domain::{OutboundMessage, PlatformAdapter, SendError, SendReceipt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Shared append-only JSONL writer
#[derive(Debug, Clone)]
pub struct OutboxWriter {
    path: PathBuf,
    file: Arc<Mutex<tokio::fs::File>>,
}

impl OutboxWriter {
    pub async fn new(path: PathBuf) -> Result<Self, OutboxError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, entry: &OutboxEntry<'_>) -> Result<(), OutboxError> {
        let line = serde_json::to_string(entry)?;
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

/// Platform adapter that queues replies for manual approval
#[derive(Debug, Clone)]
pub struct OutboxAdapter {
    writer: OutboxWriter,
    platform: String,
}

impl OutboxAdapter {
    /// One adapter per platform; several may share a writer
    pub fn new(writer: OutboxWriter, platform: impl Into<String>) -> Self {
        Self {
            writer,
            platform: platform.into(),
        }
    }
}

#[derive(Serialize)]
struct OutboxEntry<'a> {
    id: &'a str,
    platform: &'a str,
    account_id: &'a str,
    recipient_id: Option<&'a str>,
    reply_to_event_id: Option<&'a str>,
    text: &'a str,
    queued_at: String,
}

#[async_trait]
impl PlatformAdapter for OutboxAdapter {
    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, SendError> {
        let id = Uuid::new_v4().to_string();
        let queued_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| SendError::Rejected(format!("Outbox timestamp: {}", e)))?;

        let entry = OutboxEntry {
            id: &id,
            platform: &self.platform,
            account_id: &message.account_id,
            recipient_id: message.recipient_id.as_deref(),
            reply_to_event_id: message.reply_to_event_id.as_deref(),
            text: &message.text,
            queued_at,
        };

        self.writer.append(&entry).await.map_err(|error| SendError::Api {
            status: None,
            message: format!("Outbox write failed: {}", error),
        })?;

        tracing::info!(
            platform = %self.platform,
            path = %self.writer.path().display(),
            "Reply written to outbox"
        );

        Ok(SendReceipt { id })
    }

    fn platform(&self) -> &str {
        &self.platform
    }
}
