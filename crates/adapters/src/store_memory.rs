//! In-memory rule store and execution log for testing and offline mode

use async_trait::async_trait;
use linkreply_domain::engine::sort_by_precedence;
use linkreply_domain::{
    ExecutionLog, ExecutionLogError, ExecutionRecord, ExecutionStatus, Rule, RuleStore,
    RuleStoreError,
};
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory rule store implementation
pub struct InMemoryRuleStore {
    rules: RwLock<HashMap<String, Rule>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
        }
    }

    /// Create a store pre-populated with rules
    pub fn with_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        Self {
            rules: RwLock::new(rules.into_iter().map(|r| (r.id.clone(), r)).collect()),
        }
    }
}

impl Default for InMemoryRuleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn list_active_rules(&self, account_id: &str) -> Result<Vec<Rule>, RuleStoreError> {
        let rules = self
            .rules
            .read()
            .map_err(|e| RuleStoreError::Database(e.to_string()))?;
        let mut active: Vec<Rule> = rules
            .values()
            .filter(|r| r.active && r.account_id == account_id)
            .cloned()
            .collect();
        // Map iteration order is arbitrary; make equal-precedence ties deterministic
        active.sort_by(|a, b| a.id.cmp(&b.id));
        sort_by_precedence(&mut active);
        Ok(active)
    }

    async fn get_rule(&self, rule_id: &str) -> Result<Option<Rule>, RuleStoreError> {
        let rules = self
            .rules
            .read()
            .map_err(|e| RuleStoreError::Database(e.to_string()))?;
        Ok(rules.get(rule_id).cloned())
    }

    async fn save_rule(&self, rule: &Rule) -> Result<(), RuleStoreError> {
        let mut rules = self
            .rules
            .write()
            .map_err(|e| RuleStoreError::Database(e.to_string()))?;
        rules.insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    async fn set_active(&self, rule_id: &str, active: bool) -> Result<(), RuleStoreError> {
        let mut rules = self
            .rules
            .write()
            .map_err(|e| RuleStoreError::Database(e.to_string()))?;
        let rule = rules
            .get_mut(rule_id)
            .ok_or_else(|| RuleStoreError::NotFound(rule_id.to_string()))?;
        rule.active = active;
        Ok(())
    }

    async fn delete_rule(&self, rule_id: &str) -> Result<(), RuleStoreError> {
        let mut rules = self
            .rules
            .write()
            .map_err(|e| RuleStoreError::Database(e.to_string()))?;
        rules
            .remove(rule_id)
            .map(|_| ())
            .ok_or_else(|| RuleStoreError::NotFound(rule_id.to_string()))
    }
}

/// In-memory execution log implementation
#[derive(Default)]
pub struct InMemoryExecutionLog {
    records: RwLock<Vec<ExecutionRecord>>,
}

impl InMemoryExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionLog for InMemoryExecutionLog {
    async fn record(&self, record: &ExecutionRecord) -> Result<(), ExecutionLogError> {
        let mut records = self
            .records
            .write()
            .map_err(|e| ExecutionLogError::Database(e.to_string()))?;
        records.push(record.clone());
        Ok(())
    }

    async fn has_executed(&self, event_fingerprint: &str) -> Result<bool, ExecutionLogError> {
        let records = self
            .records
            .read()
            .map_err(|e| ExecutionLogError::Database(e.to_string()))?;
        Ok(records.iter().any(|r| {
            r.event_fingerprint == event_fingerprint && r.status != ExecutionStatus::Failed
        }))
    }

    async fn list_recent(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, ExecutionLogError> {
        let records = self
            .records
            .read()
            .map_err(|e| ExecutionLogError::Database(e.to_string()))?;
        Ok(records
            .iter()
            .rev()
            .filter(|r| r.account_id == account_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkreply_domain::{ActionSpec, TriggerSpec};
    use time::OffsetDateTime;
    use time::macros::datetime;
    use uuid::Uuid;

    fn rule(id: &str, account_id: &str, priority: i32, created_at: OffsetDateTime) -> Rule {
        Rule {
            id: id.to_string(),
            owner_id: "user_1".to_string(),
            account_id: account_id.to_string(),
            name: None,
            trigger: TriggerSpec::Mention,
            action: ActionSpec::SendReply {
                template: "Thanks {userName}!".to_string(),
            },
            priority,
            active: true,
            created_at,
        }
    }

    fn record(fingerprint: &str, status: ExecutionStatus) -> ExecutionRecord {
        ExecutionRecord {
            id: Uuid::new_v4(),
            event_fingerprint: fingerprint.to_string(),
            rule_id: "r1".to_string(),
            account_id: "acct_1".to_string(),
            platform: "instagram".to_string(),
            message: "Thanks Jordan!".to_string(),
            status,
            external_id: None,
            error: None,
            attempts: 1,
            executed_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn test_list_active_rules_is_ordered_and_filtered() {
        let store = InMemoryRuleStore::with_rules([
            rule("old_low", "acct_1", 1, datetime!(2024-01-01 00:00 UTC)),
            rule("new_high", "acct_1", 5, datetime!(2024-03-01 00:00 UTC)),
            rule("old_high", "acct_1", 5, datetime!(2024-02-01 00:00 UTC)),
            rule("other", "acct_2", 9, datetime!(2024-01-01 00:00 UTC)),
        ]);

        let rules = store.list_active_rules("acct_1").await.unwrap();
        let ids: Vec<_> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["old_high", "new_high", "old_low"]);
    }

    #[tokio::test]
    async fn test_toggle_and_delete() {
        let store = InMemoryRuleStore::new();
        store
            .save_rule(&rule("r1", "acct_1", 0, OffsetDateTime::now_utc()))
            .await
            .unwrap();

        store.set_active("r1", false).await.unwrap();
        assert!(store.list_active_rules("acct_1").await.unwrap().is_empty());
        assert!(!store.get_rule("r1").await.unwrap().unwrap().active);

        store.delete_rule("r1").await.unwrap();
        assert!(store.get_rule("r1").await.unwrap().is_none());
        assert!(matches!(
            store.delete_rule("r1").await,
            Err(RuleStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_execution_does_not_count_as_executed() {
        let log = InMemoryExecutionLog::new();
        log.record(&record("ig:1", ExecutionStatus::Failed)).await.unwrap();
        assert!(!log.has_executed("ig:1").await.unwrap());

        log.record(&record("ig:1", ExecutionStatus::Sent)).await.unwrap();
        assert!(log.has_executed("ig:1").await.unwrap());
        assert!(!log.has_executed("ig:2").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_recent_newest_first() {
        let log = InMemoryExecutionLog::new();
        for i in 0..3 {
            log.record(&record(&format!("ig:{}", i), ExecutionStatus::Sent))
                .await
                .unwrap();
        }

        let recent = log.list_recent("acct_1", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event_fingerprint, "ig:2");
        assert_eq!(recent[1].event_fingerprint, "ig:1");
    }
}
