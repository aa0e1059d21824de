//! Rules command - list, validate, and import reply rules

use anyhow::{Context, Result};
use linkreply_adapters::rules::{FileRuleStore, SqliteStore};
use linkreply_domain::engine::{RuleIssue, validate_rule};
use linkreply_domain::{Rule, RuleStore};
use std::path::{Path, PathBuf};

use crate::args::{RulesArgs, RulesCommands};
use crate::config::{AppConfig, RuleSource};

pub async fn execute(args: RulesArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref()).unwrap_or_default();

    match args.command {
        RulesCommands::List {
            rules,
            account,
            json,
        } => list_rules(&config, rules, account, json).await,
        RulesCommands::Validate { rules } => {
            let path = rules.unwrap_or_else(|| config.general.rules_path.clone());
            validate_rules(&path)
        }
        RulesCommands::Import { rules, db, force } => {
            let path = rules.unwrap_or_else(|| config.general.rules_path.clone());
            let db = db.unwrap_or_else(|| config.general.state_db_path.clone());
            import_rules(&path, &db, force).await
        }
    }
}

async fn list_rules(
    config: &AppConfig,
    rules_path: Option<PathBuf>,
    account: Option<String>,
    json: bool,
) -> Result<()> {
    let (source, mut rules) = match (rules_path, config.general.rule_source) {
        (Some(path), _) => (path.display().to_string(), load_file(&path)?),
        (None, RuleSource::File) => (
            config.general.rules_path.display().to_string(),
            load_file(&config.general.rules_path)?,
        ),
        (None, RuleSource::Sqlite) => {
            let store = SqliteStore::new(&config.general.state_db_path)
                .await
                .context("Failed to open SQLite rule store")?;
            (
                config.general.state_db_path.display().to_string(),
                store.list_rules().await.context("Failed to list rules")?,
            )
        }
    };

    if let Some(account) = account.as_deref() {
        rules.retain(|r| r.account_id == account);
    }

    if json {
        let output = serde_json::json!({
            "source": source,
            "count": rules.len(),
            "rules": rules,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Reply Rules ({} found in {})", rules.len(), source);
        println!("========================");
        println!();

        for rule in &rules {
            print_rule(rule);
        }
    }

    Ok(())
}

fn print_rule(rule: &Rule) {
    let status = if rule.active { "active" } else { "paused" };
    println!("ID: {} [{}]", rule.id, status);
    if let Some(ref name) = rule.name {
        println!("  Name: {}", name);
    }
    println!("  Account: {}", rule.account_id);
    println!("  Trigger: {}", rule.trigger.label());
    println!("  Priority: {}", rule.priority);
    println!("  Template: {}", rule.action.template());
    println!();
}

fn load_file(path: &Path) -> Result<Vec<Rule>> {
    let store = FileRuleStore::open(path).context("Failed to load rules")?;
    Ok(store.rules().to_vec())
}

/// Per-rule issues, skipping clean rules
fn lint(rules: &[Rule]) -> Vec<(&Rule, Vec<RuleIssue>)> {
    rules
        .iter()
        .map(|rule| (rule, validate_rule(rule)))
        .filter(|(_, issues)| !issues.is_empty())
        .collect()
}

fn validate_rules(path: &Path) -> Result<()> {
    println!("Validating rules in: {}", path.display());

    let rules = match FileRuleStore::open(path) {
        Ok(store) => store.rules().to_vec(),
        Err(e) => {
            eprintln!("✗ Validation failed: {}", e);
            std::process::exit(1);
        }
    };

    let problems = lint(&rules);
    if problems.is_empty() {
        println!("✓ Validation passed ({} rules)", rules.len());
        return Ok(());
    }

    for (rule, issues) in &problems {
        for issue in issues {
            eprintln!("  {}: {}", rule.id, issue);
        }
    }
    eprintln!(
        "✗ Validation failed: {} of {} rules have issues",
        problems.len(),
        rules.len()
    );
    std::process::exit(1);
}

async fn import_rules(path: &Path, db: &Path, force: bool) -> Result<()> {
    let rules = load_file(path)?;

    let problems = lint(&rules);
    for (rule, issues) in &problems {
        for issue in issues {
            tracing::warn!(rule_id = %rule.id, issue = %issue, "Rule has issues");
        }
    }
    if !problems.is_empty() && !force {
        anyhow::bail!(
            "{} rules have issues; fix them or pass --force to import anyway",
            problems.len()
        );
    }

    let store = SqliteStore::new(db)
        .await
        .context("Failed to open SQLite rule store")?;

    for rule in &rules {
        store
            .save_rule(rule)
            .await
            .with_context(|| format!("Failed to save rule {}", rule.id))?;
    }

    tracing::info!(count = rules.len(), db = %db.display(), "Imported rules");
    println!("Imported {} rules into {}", rules.len(), db.display());

    Ok(())
}
