//! Trigger matching - decides whether a rule's trigger fires for an event

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::model::{EventKind, NormalizedEvent, TriggerSpec};

/// How the "local hour" of an event timestamp is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalTime {
    /// Use the offset written in the timestamp itself
    #[default]
    EventOffset,
    /// Convert to a fixed server offset first
    Fixed(UtcOffset),
}

/// Stateless trigger matcher
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerMatcher {
    local_time: LocalTime,
}

impl TriggerMatcher {
    pub fn new(local_time: LocalTime) -> Self {
        Self { local_time }
    }

    /// Returns true if `trigger` fires for `event`.
    ///
    /// Missing or malformed event fields never raise; they simply do not match.
    pub fn matches(&self, trigger: &TriggerSpec, event: &NormalizedEvent) -> bool {
        match trigger {
            TriggerSpec::KeywordComment { keywords } | TriggerSpec::KeywordDm { keywords } => {
                event
                    .content
                    .as_deref()
                    .is_some_and(|content| contains_any_keyword(content, keywords))
            }
            TriggerSpec::Mention => event.kind == EventKind::Mention,
            TriggerSpec::FirstMessage => event.kind == EventKind::FirstMessage,
            TriggerSpec::StoryReply => event.kind == EventKind::StoryReply,
            // Exact hour equality, not a window
            TriggerSpec::OutOfHours { hour } => match (hour, self.local_hour(&event.timestamp)) {
                (Some(hour), Some(event_hour)) if *hour <= 23 => *hour == event_hour,
                _ => false,
            },
            TriggerSpec::Unsupported => false,
        }
    }

    /// Hour-of-day of the timestamp in local time, if it parses
    pub fn local_hour(&self, timestamp: &str) -> Option<u8> {
        let timestamp = timestamp.trim();

        if let Ok(parsed) = OffsetDateTime::parse(timestamp, &Rfc3339) {
            let local = match self.local_time {
                LocalTime::EventOffset => parsed,
                LocalTime::Fixed(offset) => parsed.to_offset(offset),
            };
            return Some(local.hour());
        }

        // Offset-less timestamps are taken as already local
        parse_naive(timestamp).map(|parsed| parsed.hour())
    }
}

/// Match with the default local-time policy
pub fn matches(trigger: &TriggerSpec, event: &NormalizedEvent) -> bool {
    TriggerMatcher::default().matches(trigger, event)
}

fn contains_any_keyword(content: &str, keywords: &[String]) -> bool {
    let content = content.to_lowercase();
    keywords
        .iter()
        .map(|keyword| keyword.trim())
        .filter(|keyword| !keyword.is_empty())
        .any(|keyword| content.contains(&keyword.to_lowercase()))
}

fn parse_naive(timestamp: &str) -> Option<PrimitiveDateTime> {
    let (head, fraction) = match timestamp.split_once('.') {
        Some((head, fraction)) => (head, Some(fraction)),
        None => (timestamp, None),
    };
    if let Some(fraction) = fraction {
        if fraction.is_empty() || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }

    PrimitiveDateTime::parse(
        head,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    )
    .ok()
}
