//! Read-only rule store backed by a TOML file
//!
//! ```toml
//! [[rules]]
//! id = "price_reply"
//! owner_id = "user_1"
//! account_id = "17841400000000000"
//! priority = 10
//! created_at = "2024-05-01T09:00:00Z"
//! trigger = { type = "keyword_comment", keywords = ["price", "cost"] }
//! action = { type = "send_reply", template = "Hi {userName}! Prices: {linkPageUrl}" }
//! ```

use async_trait::async_trait;
use linkreply_domain::engine::sort_by_precedence;
use linkreply_domain::{Rule, RuleStore, RuleStoreError};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Errors loading a rules file
#[derive(Debug, thiserror::Error)]
pub enum RulesFileError {
    #[error("IO error reading {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Parse error in {file}: {message}")]
    Parse { file: String, message: String },
    #[error("Duplicate rule ID '{id}' in {file}")]
    DuplicateId { id: String, file: String },
    #[error("Rule with empty ID in {file}")]
    EmptyId { file: String },
}

#[derive(Deserialize)]
struct RulesDocument {
    #[serde(default)]
    rules: Vec<Rule>,
}

/// Rules loaded once from a TOML file
#[derive(Debug, Clone)]
pub struct FileRuleStore {
    path: PathBuf,
    rules: Vec<Rule>,
}

impl FileRuleStore {
    /// Load and validate a rules file
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RulesFileError> {
        let path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&path).map_err(|source| RulesFileError::Io {
            file: path.display().to_string(),
            source,
        })?;
        let rules = Self::parse(&content, &path.display().to_string())?;

        tracing::debug!(path = %path.display(), count = rules.len(), "Loaded rules file");

        Ok(Self { path, rules })
    }

    /// Parse rules from TOML text; `source` names the origin in errors
    pub fn parse(content: &str, source: &str) -> Result<Vec<Rule>, RulesFileError> {
        let document: RulesDocument =
            toml::from_str(content).map_err(|e| RulesFileError::Parse {
                file: source.to_string(),
                message: e.to_string(),
            })?;

        let mut seen: HashSet<&str> = HashSet::new();
        for rule in &document.rules {
            if rule.id.trim().is_empty() {
                return Err(RulesFileError::EmptyId {
                    file: source.to_string(),
                });
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(RulesFileError::DuplicateId {
                    id: rule.id.clone(),
                    file: source.to_string(),
                });
            }
        }

        let mut rules = document.rules;
        sort_by_precedence(&mut rules);
        Ok(rules)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All rules in evaluation order, active or not
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

#[async_trait]
impl RuleStore for FileRuleStore {
    async fn list_active_rules(&self, account_id: &str) -> Result<Vec<Rule>, RuleStoreError> {
        Ok(self
            .rules
            .iter()
            .filter(|r| r.active && r.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn get_rule(&self, rule_id: &str) -> Result<Option<Rule>, RuleStoreError> {
        Ok(self.rules.iter().find(|r| r.id == rule_id).cloned())
    }

    async fn save_rule(&self, _rule: &Rule) -> Result<(), RuleStoreError> {
        Err(RuleStoreError::ReadOnly)
    }

    async fn set_active(&self, _rule_id: &str, _active: bool) -> Result<(), RuleStoreError> {
        Err(RuleStoreError::ReadOnly)
    }

    async fn delete_rule(&self, _rule_id: &str) -> Result<(), RuleStoreError> {
        Err(RuleStoreError::ReadOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkreply_domain::TriggerSpec;
    use tempfile::TempDir;

    const RULES: &str = r#"
[[rules]]
id = "greeting"
owner_id = "user_1"
account_id = "acct_1"
priority = 1
created_at = "2024-01-01T00:00:00Z"
trigger = { type = "first_message" }
action = { type = "send_reply", template = "Welcome {userName}!" }

[[rules]]
id = "price"
owner_id = "user_1"
account_id = "acct_1"
name = "Pricing"
priority = 10
created_at = "2024-02-01T00:00:00Z"
trigger = { type = "keyword_comment", keywords = ["price", "cost"] }
action = { type = "send_reply", template = "Prices at {linkPageUrl}" }

[[rules]]
id = "paused"
owner_id = "user_1"
account_id = "acct_1"
active = false
created_at = "2024-02-01T00:00:00Z"
trigger = { type = "mention" }
action = { type = "send_reply", template = "Thanks!" }

[[rules]]
id = "future"
owner_id = "user_1"
account_id = "acct_1"
created_at = "2024-02-01T00:00:00Z"
trigger = { type = "sentiment", threshold = 0.5 }
action = { type = "send_reply", template = "?" }
"#;

    #[tokio::test]
    async fn test_open_and_list_active_rules() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.toml");
        std::fs::write(&path, RULES).unwrap();

        let store = FileRuleStore::open(&path).unwrap();
        assert_eq!(store.rules().len(), 4);

        let active = store.list_active_rules("acct_1").await.unwrap();
        let ids: Vec<_> = active.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["price", "greeting", "future"]);
        assert!(store.list_active_rules("acct_2").await.unwrap().is_empty());
    }

    #[test]
    fn test_unknown_trigger_type_loads_as_unsupported() {
        let rules = FileRuleStore::parse(RULES, "inline").unwrap();
        let future = rules.iter().find(|r| r.id == "future").unwrap();
        assert_eq!(future.trigger, TriggerSpec::Unsupported);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let content = r#"
[[rules]]
id = "dup"
owner_id = "u"
account_id = "a"
created_at = "2024-01-01T00:00:00Z"
trigger = { type = "mention" }
action = { type = "send_reply", template = "one" }

[[rules]]
id = "dup"
owner_id = "u"
account_id = "a"
created_at = "2024-01-01T00:00:00Z"
trigger = { type = "story_reply" }
action = { type = "send_reply", template = "two" }
"#;
        assert!(matches!(
            FileRuleStore::parse(content, "inline"),
            Err(RulesFileError::DuplicateId { .. })
        ));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        assert!(matches!(
            FileRuleStore::parse("[[rules]]\nid = ", "inline"),
            Err(RulesFileError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn test_mutations_are_rejected() {
        let store = FileRuleStore {
            path: PathBuf::from("inline"),
            rules: FileRuleStore::parse(RULES, "inline").unwrap(),
        };
        assert!(matches!(
            store.set_active("price", false).await,
            Err(RuleStoreError::ReadOnly)
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            FileRuleStore::open("/nonexistent/rules.toml"),
            Err(RulesFileError::Io { .. })
        ));
    }
}
