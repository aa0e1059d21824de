//! The rule engine core: pure, synchronous, no I/O

pub mod evaluator;
pub mod matcher;
pub mod template;

pub use evaluator::{
    EvaluatorConfig, RuleEvaluator, RuleIssue, Selection, sort_by_precedence, validate_rule,
};
pub use matcher::{LocalTime, TriggerMatcher, matches};
pub use template::{TemplateBindings, TemplateRenderer, render};
