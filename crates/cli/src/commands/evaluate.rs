//! Evaluate command - run the rule engine against one event

use anyhow::{Context, Result, bail};
use linkreply_adapters::rules::FileRuleStore;
use linkreply_domain::engine::{EvaluatorConfig, RuleEvaluator};
use linkreply_domain::{EvaluationResult, NormalizedEvent, SystemClock};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::args::EvaluateArgs;
use crate::config::AppConfig;

pub async fn execute(args: EvaluateArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref()).unwrap_or_default();

    let rules_path = args.rules.as_ref().unwrap_or(&config.general.rules_path);
    let store = FileRuleStore::open(rules_path).context("Failed to load rules")?;

    let event = read_event(args.event.as_deref())?;

    let evaluator = RuleEvaluator::new(
        Arc::new(SystemClock),
        EvaluatorConfig {
            link_page_url: args.link_page_url.clone().or(config.general.link_page_url()),
            utc_offset: config.general.utc_offset()?,
        },
    );

    tracing::debug!(
        rules = store.rules().len(),
        kind = %event.kind,
        account_id = %event.account_id,
        "Evaluating event"
    );

    let (rule_id, result) = match args.rule_id.as_deref() {
        Some(rule_id) => {
            let Some(rule) = store.rules().iter().find(|r| r.id == rule_id) else {
                bail!("Rule not found: {}", rule_id);
            };
            let result = evaluator.evaluate(rule, &event);
            (result.matched.then(|| rule.id.clone()), result)
        }
        None => match evaluator.select(store.rules(), &event) {
            Some(selection) => (Some(selection.rule.id), selection.result),
            None => (None, EvaluationResult::no_match()),
        },
    };

    if args.json {
        let output = serde_json::json!({
            "matched": result.matched,
            "rule_id": rule_id,
            "rendered_message": result.rendered_message,
            "chosen_action": result.chosen_action,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        match (rule_id, result.rendered_message) {
            (Some(rule_id), Some(message)) => {
                println!("Matched rule: {}", rule_id);
                println!();
                println!("{}", message);
            }
            _ => println!("No rule matched"),
        }
    }

    Ok(())
}

fn read_event(path: Option<&Path>) -> Result<NormalizedEvent> {
    let content = match path {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event file: {}", path.display()))?,
        // Default to stdin if no file or "-"
        _ => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read from stdin")?;
            text
        }
    };

    serde_json::from_str(&content).context("Failed to parse event JSON")
}
