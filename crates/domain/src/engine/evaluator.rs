//! Rule evaluation - combines trigger matching and template rendering
//!
//! The evaluator is a pure decision function: it never sends anything.
//! Callers take the returned message to a platform adapter themselves.

use std::cmp::Ordering;
use std::sync::Arc;

use time::UtcOffset;

use crate::engine::matcher::{LocalTime, TriggerMatcher};
use crate::engine::template::TemplateRenderer;
use crate::model::{EvaluationResult, NormalizedEvent, Rule, TriggerSpec};
use crate::ports::{Clock, SystemClock};

/// Configuration for the evaluator
#[derive(Debug, Clone, Default)]
pub struct EvaluatorConfig {
    /// Link page URL bound to `{linkPageUrl}`
    pub link_page_url: Option<String>,
    /// Server offset for out-of-hours matching and `{date}`/`{time}`.
    /// `None` matches against the timestamp's own offset and renders in UTC.
    pub utc_offset: Option<UtcOffset>,
}

/// The first rule that matched an event, with its rendered reply
#[derive(Debug, Clone)]
pub struct Selection {
    pub rule: Rule,
    pub result: EvaluationResult,
}

impl Selection {
    pub fn message(&self) -> &str {
        self.result.rendered_message.as_deref().unwrap_or_default()
    }
}

/// Evaluates rules against events
#[derive(Clone)]
pub struct RuleEvaluator {
    matcher: TriggerMatcher,
    renderer: TemplateRenderer,
    link_page_url: Option<String>,
}

impl Default for RuleEvaluator {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), EvaluatorConfig::default())
    }
}

impl RuleEvaluator {
    pub fn new(clock: Arc<dyn Clock>, config: EvaluatorConfig) -> Self {
        let local_time = config
            .utc_offset
            .map(LocalTime::Fixed)
            .unwrap_or(LocalTime::EventOffset);

        Self {
            matcher: TriggerMatcher::new(local_time),
            renderer: TemplateRenderer::new(clock, config.utc_offset.unwrap_or(UtcOffset::UTC)),
            link_page_url: config.link_page_url,
        }
    }

    /// Evaluate a single rule against an event
    pub fn evaluate(&self, rule: &Rule, event: &NormalizedEvent) -> EvaluationResult {
        if !self.matcher.matches(&rule.trigger, event) {
            return EvaluationResult::no_match();
        }

        let bindings = self
            .renderer
            .bindings_at_now(event.sender_name.clone(), self.link_page_url.clone());
        let rendered = self.renderer.render(rule.action.template(), &bindings);

        EvaluationResult::matched(rendered, rule.action.clone())
    }

    /// Pick the first matching rule for an event.
    ///
    /// Only active rules of the event's account are considered, in descending
    /// priority with ties going to the earlier-created rule. At most one rule
    /// is applied per event.
    pub fn select(&self, rules: &[Rule], event: &NormalizedEvent) -> Option<Selection> {
        let mut candidates: Vec<&Rule> = rules
            .iter()
            .filter(|rule| rule.active && rule.account_id == event.account_id)
            .collect();
        candidates.sort_by(|a, b| precedence(a, b));

        for rule in candidates {
            let result = self.evaluate(rule, event);
            if result.matched {
                tracing::debug!(
                    rule_id = %rule.id,
                    trigger = rule.trigger.label(),
                    priority = rule.priority,
                    "Rule matched"
                );
                return Some(Selection {
                    rule: rule.clone(),
                    result,
                });
            }
        }

        tracing::debug!(
            account_id = %event.account_id,
            kind = %event.kind,
            "No rule matched"
        );
        None
    }
}

/// Evaluation order: priority desc, then creation asc
pub fn precedence(a: &Rule, b: &Rule) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
}

/// Sort rules into evaluation order (stable)
pub fn sort_by_precedence(rules: &mut [Rule]) {
    rules.sort_by(precedence);
}

/// Problems with a rule that make it unable to ever fire, or fire badly
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleIssue {
    /// Keyword trigger with no usable keyword
    NoKeywords,
    /// Out-of-hours trigger without an hour
    MissingHour,
    /// Out-of-hours hour outside 0..=23
    HourOutOfRange(u8),
    /// Trigger type not understood by this build
    UnsupportedTrigger,
    /// Reply template is blank
    EmptyTemplate,
}

impl std::fmt::Display for RuleIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleIssue::NoKeywords => {
                write!(f, "keyword trigger has no keywords and will never match")
            }
            RuleIssue::MissingHour => {
                write!(f, "out_of_hours trigger has no hour and will never match")
            }
            RuleIssue::HourOutOfRange(hour) => write!(
                f,
                "out_of_hours hour {} is outside 0-23 and will never match",
                hour
            ),
            RuleIssue::UnsupportedTrigger => {
                write!(f, "trigger type is not supported and will never match")
            }
            RuleIssue::EmptyTemplate => write!(f, "reply template is empty"),
        }
    }
}

/// Lint a rule. Issues are advisory and never change matching.
pub fn validate_rule(rule: &Rule) -> Vec<RuleIssue> {
    let mut issues = Vec::new();

    match &rule.trigger {
        TriggerSpec::KeywordComment { keywords } | TriggerSpec::KeywordDm { keywords } => {
            if keywords.iter().all(|k| k.trim().is_empty()) {
                issues.push(RuleIssue::NoKeywords);
            }
        }
        TriggerSpec::OutOfHours { hour: None } => issues.push(RuleIssue::MissingHour),
        TriggerSpec::OutOfHours { hour: Some(hour) } if *hour > 23 => {
            issues.push(RuleIssue::HourOutOfRange(*hour))
        }
        TriggerSpec::Unsupported => issues.push(RuleIssue::UnsupportedTrigger),
        TriggerSpec::OutOfHours { .. }
        | TriggerSpec::Mention
        | TriggerSpec::FirstMessage
        | TriggerSpec::StoryReply => {}
    }

    if rule.action.template().trim().is_empty() {
        issues.push(RuleIssue::EmptyTemplate);
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::template::unresolved_tokens;
    use crate::model::{ActionSpec, EventKind};
    use time::OffsetDateTime;
    use time::macros::datetime;

    struct FakeClock {
        time: OffsetDateTime,
    }

    impl Clock for FakeClock {
        fn now(&self) -> OffsetDateTime {
            self.time
        }
    }

    fn evaluator() -> RuleEvaluator {
        RuleEvaluator::new(
            Arc::new(FakeClock {
                time: datetime!(2024-05-01 14:05:09 UTC),
            }),
            EvaluatorConfig {
                link_page_url: Some("https://x.io/j".to_string()),
                utc_offset: None,
            },
        )
    }

    fn rule(id: &str, trigger: TriggerSpec, template: &str, priority: i32) -> Rule {
        Rule {
            id: id.to_string(),
            owner_id: "user_1".to_string(),
            account_id: "acct_1".to_string(),
            name: None,
            trigger,
            action: ActionSpec::SendReply {
                template: template.to_string(),
            },
            priority,
            active: true,
            created_at: datetime!(2024-01-01 00:00:00 UTC),
        }
    }

    fn comment(content: &str) -> NormalizedEvent {
        NormalizedEvent {
            kind: EventKind::Comment,
            content: Some(content.to_string()),
            sender_name: Some("Jordan".to_string()),
            timestamp: "2024-05-01T14:00:00Z".to_string(),
            platform: "instagram".to_string(),
            account_id: "acct_1".to_string(),
            event_id: None,
            sender_id: Some("igsid_1".to_string()),
        }
    }

    fn price_trigger() -> TriggerSpec {
        TriggerSpec::KeywordComment {
            keywords: vec!["price".to_string()],
        }
    }

    #[test]
    fn test_evaluate_no_match() {
        let rule = rule("r1", price_trigger(), "Hi {userName}", 0);
        let result = evaluator().evaluate(&rule, &comment("nice photo"));

        assert!(!result.matched);
        assert!(result.rendered_message.is_none());
        assert!(result.chosen_action.is_none());
    }

    #[test]
    fn test_evaluate_match_renders_all_tokens() {
        let rule = rule(
            "r1",
            price_trigger(),
            "Hi {userName}! Prices at {linkPageUrl} ({date} {time})",
            0,
        );
        let result = evaluator().evaluate(&rule, &comment("what's the price?"));

        assert!(result.matched);
        let message = result.rendered_message.as_deref().unwrap();
        assert_eq!(
            message,
            "Hi Jordan! Prices at https://x.io/j (5/1/2024 2:05:09 PM)"
        );
        assert!(unresolved_tokens(message).is_empty());
        assert_eq!(result.chosen_action, Some(rule.action.clone()));
    }

    #[test]
    fn test_evaluate_defaults_missing_sender() {
        let rule = rule("r1", TriggerSpec::Mention, "Thanks {userName}", 0);
        let mut event = comment("");
        event.kind = EventKind::Mention;
        event.sender_name = None;

        let result = evaluator().evaluate(&rule, &event);
        assert_eq!(result.rendered_message.as_deref(), Some("Thanks @user"));
    }

    #[test]
    fn test_select_prefers_higher_priority() {
        let rules = vec![
            rule("low", price_trigger(), "low", 1),
            rule("high", price_trigger(), "high", 10),
        ];
        let selection = evaluator().select(&rules, &comment("price")).unwrap();
        assert_eq!(selection.rule.id, "high");
        assert_eq!(selection.message(), "high");
    }

    #[test]
    fn test_select_breaks_ties_by_creation_order() {
        let mut newer = rule("newer", price_trigger(), "newer", 5);
        newer.created_at = datetime!(2024-03-01 00:00:00 UTC);
        let mut older = rule("older", price_trigger(), "older", 5);
        older.created_at = datetime!(2024-02-01 00:00:00 UTC);

        let selection = evaluator().select(&[newer, older], &comment("price")).unwrap();
        assert_eq!(selection.rule.id, "older");
    }

    #[test]
    fn test_select_falls_through_to_first_match() {
        let rules = vec![
            rule("mention", TriggerSpec::Mention, "mention", 10),
            rule("price", price_trigger(), "price", 1),
        ];
        let selection = evaluator().select(&rules, &comment("price")).unwrap();
        assert_eq!(selection.rule.id, "price");
    }

    #[test]
    fn test_select_skips_inactive_and_foreign_rules() {
        let mut inactive = rule("inactive", price_trigger(), "inactive", 10);
        inactive.active = false;
        let mut foreign = rule("foreign", price_trigger(), "foreign", 10);
        foreign.account_id = "acct_2".to_string();

        assert!(evaluator().select(&[inactive, foreign], &comment("price")).is_none());
    }

    #[test]
    fn test_select_unsupported_trigger_never_wins() {
        let rules = vec![rule("unknown", TriggerSpec::Unsupported, "never", 100)];
        assert!(evaluator().select(&rules, &comment("price")).is_none());
    }

    #[test]
    fn test_validate_rule_flags_dead_triggers() {
        let empty = rule("r", TriggerSpec::KeywordDm { keywords: vec![" ".to_string()] }, "x", 0);
        assert_eq!(validate_rule(&empty), vec![RuleIssue::NoKeywords]);

        let no_hour = rule("r", TriggerSpec::OutOfHours { hour: None }, "x", 0);
        assert_eq!(validate_rule(&no_hour), vec![RuleIssue::MissingHour]);

        let bad_hour = rule("r", TriggerSpec::OutOfHours { hour: Some(30) }, " ", 0);
        assert_eq!(
            validate_rule(&bad_hour),
            vec![RuleIssue::HourOutOfRange(30), RuleIssue::EmptyTemplate]
        );

        let ok = rule("r", price_trigger(), "Hi {userName}", 0);
        assert!(validate_rule(&ok).is_empty());
    }
}
