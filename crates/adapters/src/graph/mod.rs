//! Platform adapters for Meta Graph API platforms

mod messaging;

pub use messaging::{DEFAULT_API_VERSION, DEFAULT_BASE_URL, GraphMessagingAdapter};

use async_trait::async_trait;
use linkreply_domain::{OutboundMessage, PlatformAdapter, SendError, SendReceipt};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Stub platform adapter for testing
pub struct StubAdapter {
    platform: String,
    enabled: bool,
    sent: Mutex<Vec<OutboundMessage>>,
    failures: Mutex<VecDeque<SendError>>,
}

impl StubAdapter {
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            enabled: true,
            sent: Mutex::new(vec![]),
            failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Fail the next sends with these errors, in order, then succeed
    pub fn with_failures(self, failures: impl IntoIterator<Item = SendError>) -> Self {
        Self {
            failures: Mutex::new(failures.into_iter().collect()),
            ..self
        }
    }

    pub fn disabled(platform: impl Into<String>) -> Self {
        Self {
            enabled: false,
            ..Self::new(platform)
        }
    }

    /// Get all messages that were sent
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PlatformAdapter for StubAdapter {
    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, SendError> {
        if !self.enabled {
            return Err(SendError::Disabled);
        }

        let failure = self
            .failures
            .lock()
            .map_err(|e| SendError::Network(e.to_string()))?
            .pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        let mut sent = self
            .sent
            .lock()
            .map_err(|e| SendError::Network(e.to_string()))?;
        sent.push(message.clone());

        Ok(SendReceipt {
            id: format!("stub_{}_{}", self.platform, sent.len()),
        })
    }

    fn platform(&self) -> &str {
        &self.platform
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}
