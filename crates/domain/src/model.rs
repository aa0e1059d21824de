//! Domain models and value objects

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

/// Kind of inbound social-media interaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    Comment,
    Message,
    Mention,
    StoryReply,
    FirstMessage,
    /// Any tag an adapter produced that this engine does not know
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Comment => "comment",
            EventKind::Message => "message",
            EventKind::Mention => "mention",
            EventKind::StoryReply => "story_reply",
            EventKind::FirstMessage => "first_message",
            EventKind::Other(tag) => tag,
        }
    }
}

impl From<String> for EventKind {
    fn from(tag: String) -> Self {
        match tag.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "comment" => EventKind::Comment,
            "message" => EventKind::Message,
            "mention" => EventKind::Mention,
            "story_reply" => EventKind::StoryReply,
            "first_message" => EventKind::FirstMessage,
            _ => EventKind::Other(tag),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform-agnostic inbound event, produced by platform adapters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// What kind of interaction this is
    pub kind: EventKind,
    /// Free-text content (comment body, message text)
    #[serde(default)]
    pub content: Option<String>,
    /// Display name of the sender
    #[serde(default)]
    pub sender_name: Option<String>,
    /// ISO-8601 timestamp as delivered by the platform
    pub timestamp: String,
    /// Originating platform identifier (e.g. "instagram")
    pub platform: String,
    /// Social account the event was delivered to
    pub account_id: String,
    /// Platform-assigned event ID, if any
    #[serde(default)]
    pub event_id: Option<String>,
    /// Platform-scoped sender ID, used as the reply recipient
    #[serde(default)]
    pub sender_id: Option<String>,
}

impl NormalizedEvent {
    /// Stable key identifying this event across redeliveries
    pub fn fingerprint(&self) -> String {
        if let Some(id) = self.event_id.as_deref().filter(|id| !id.is_empty()) {
            return format!("{}:{}", self.platform, id);
        }

        let mut hasher = Sha256::new();
        for part in [
            self.platform.as_str(),
            self.account_id.as_str(),
            self.kind.as_str(),
            self.timestamp.as_str(),
            self.sender_id.as_deref().unwrap_or_default(),
            self.sender_name.as_deref().unwrap_or_default(),
            self.content.as_deref().unwrap_or_default(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        format!("{}:{:x}", self.platform, hasher.finalize())
    }
}

/// Condition under which a rule is considered for execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Any keyword appears in a comment's text
    KeywordComment {
        #[serde(default)]
        keywords: Vec<String>,
    },
    /// Any keyword appears in a direct message's text
    KeywordDm {
        #[serde(default)]
        keywords: Vec<String>,
    },
    /// The account was mentioned
    Mention,
    /// First message from a new contact
    FirstMessage,
    /// Event arrives during the configured local hour (exact hour, not a range)
    OutOfHours {
        #[serde(default)]
        hour: Option<u8>,
    },
    /// Someone replied to a story
    StoryReply,
    /// A trigger type this build does not know; never matches
    #[serde(other)]
    Unsupported,
}

impl TriggerSpec {
    pub fn label(&self) -> &'static str {
        match self {
            TriggerSpec::KeywordComment { .. } => "keyword_comment",
            TriggerSpec::KeywordDm { .. } => "keyword_dm",
            TriggerSpec::Mention => "mention",
            TriggerSpec::FirstMessage => "first_message",
            TriggerSpec::OutOfHours { .. } => "out_of_hours",
            TriggerSpec::StoryReply => "story_reply",
            TriggerSpec::Unsupported => "unsupported",
        }
    }
}

/// Effect performed when a rule's trigger matches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpec {
    /// Reply with a templated text message
    SendReply { template: String },
}

impl ActionSpec {
    pub fn template(&self) -> &str {
        match self {
            ActionSpec::SendReply { template } => template,
        }
    }
}

/// A user-defined auto-reply rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique rule ID
    pub id: String,
    /// Owning user/workspace
    pub owner_id: String,
    /// Social account the rule listens on
    pub account_id: String,
    /// Optional human-readable label
    #[serde(default)]
    pub name: Option<String>,
    pub trigger: TriggerSpec,
    pub action: ActionSpec,
    /// Higher values are evaluated first
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Creation time, breaks priority ties (earlier first)
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

fn default_active() -> bool {
    true
}

/// Outcome of evaluating a single rule against a single event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub matched: bool,
    pub rendered_message: Option<String>,
    pub chosen_action: Option<ActionSpec>,
}

impl EvaluationResult {
    pub fn no_match() -> Self {
        Self {
            matched: false,
            rendered_message: None,
            chosen_action: None,
        }
    }

    pub fn matched(rendered_message: String, action: ActionSpec) -> Self {
        Self {
            matched: true,
            rendered_message: Some(rendered_message),
            chosen_action: Some(action),
        }
    }
}

/// Unit of work carried by the dispatch queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchJob {
    pub id: Uuid,
    pub event: NormalizedEvent,
    #[serde(with = "time::serde::rfc3339")]
    pub enqueued_at: OffsetDateTime,
}

/// Message handed to a platform adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    /// Account sending the reply
    pub account_id: String,
    /// Platform-scoped recipient, if the event carried one
    pub recipient_id: Option<String>,
    /// Event being answered, if the platform assigned an ID
    pub reply_to_event_id: Option<String>,
    /// Rendered reply text
    pub text: String,
}

/// Final status of an execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Sent,
    Failed,
    DryRun,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Sent => "sent",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::DryRun => "dry_run",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sent" => Some(ExecutionStatus::Sent),
            "failed" => Some(ExecutionStatus::Failed),
            "dry_run" => Some(ExecutionStatus::DryRun),
            _ => None,
        }
    }
}

/// Record of a rule execution (for idempotency and audit)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub event_fingerprint: String,
    pub rule_id: String,
    pub account_id: String,
    pub platform: String,
    pub message: String,
    pub status: ExecutionStatus,
    /// Platform message ID when sent
    pub external_id: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub executed_at: OffsetDateTime,
}

/// Processing result for a single dispatch job
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A rule matched and the reply was sent (or would have been, in dry run)
    Replied {
        rule_id: String,
        message: String,
        external_id: Option<String>,
        dry_run: bool,
    },
    /// No active rule matched the event
    NoMatch,
    /// Event was not processed (duplicate, no adapter, ...)
    Skipped { reason: String },
    /// Loading rules or sending failed
    Failed { error: String },
}
