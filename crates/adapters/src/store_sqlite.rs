//! SQLite rule store and execution log

use async_trait::async_trait;
use linkreply_domain::engine::sort_by_precedence;
use linkreply_domain::{
    ActionSpec, ExecutionLog, ExecutionLogError, ExecutionRecord, ExecutionStatus, Rule,
    RuleStore, RuleStoreError, TriggerSpec,
};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::path::Path;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

type RuleRow = (
    String,
    String,
    String,
    Option<String>,
    String,
    String,
    i64,
    bool,
    String,
);

type ExecutionRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    i64,
    String,
);

/// SQLite-backed store for rules and execution records
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database file and run migrations
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, RuleStoreError> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RuleStoreError::Database(format!("Failed to create directory: {}", e))
                })?;
            }
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(|e| RuleStoreError::Database(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing)
    pub async fn in_memory() -> Result<Self, RuleStoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| RuleStoreError::Database(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), RuleStoreError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS rules (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                name TEXT,
                trigger_json TEXT NOT NULL,
                action_json TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_rules_account
            ON rules(account_id, active)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                event_fingerprint TEXT NOT NULL,
                rule_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                message TEXT NOT NULL,
                status TEXT NOT NULL,
                external_id TEXT,
                error TEXT,
                attempts INTEGER NOT NULL,
                executed_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_executions_fingerprint
            ON executions(event_fingerprint)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_executions_account
            ON executions(account_id, executed_at)
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| RuleStoreError::Database(e.to_string()))?;
        }

        Ok(())
    }

    /// Every rule, active or not, in evaluation order
    pub async fn list_rules(&self) -> Result<Vec<Rule>, RuleStoreError> {
        let rows: Vec<RuleRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, account_id, name, trigger_json, action_json, priority, active, created_at
            FROM rules
            ORDER BY account_id ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RuleStoreError::Database(e.to_string()))?;

        let mut rules = rows
            .into_iter()
            .map(Self::rule_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        sort_by_precedence(&mut rules);
        Ok(rules)
    }

    fn rule_from_row(row: RuleRow) -> Result<Rule, RuleStoreError> {
        let (
            id,
            owner_id,
            account_id,
            name,
            trigger_json,
            action_json,
            priority,
            active,
            created_at,
        ) = row;

        let trigger: TriggerSpec = serde_json::from_str(&trigger_json)
            .map_err(|e| RuleStoreError::Serialization(format!("rule {} trigger: {}", id, e)))?;
        let action: ActionSpec = serde_json::from_str(&action_json)
            .map_err(|e| RuleStoreError::Serialization(format!("rule {} action: {}", id, e)))?;
        let priority = i32::try_from(priority)
            .map_err(|e| RuleStoreError::Serialization(format!("rule {} priority: {}", id, e)))?;
        let created_at = OffsetDateTime::parse(&created_at, &Rfc3339)
            .map_err(|e| RuleStoreError::Serialization(e.to_string()))?;

        Ok(Rule {
            id,
            owner_id,
            account_id,
            name,
            trigger,
            action,
            priority,
            active,
            created_at,
        })
    }

    fn record_from_row(row: ExecutionRow) -> Result<ExecutionRecord, ExecutionLogError> {
        let (
            id,
            event_fingerprint,
            rule_id,
            account_id,
            platform,
            message,
            status,
            external_id,
            error,
            attempts,
            executed_at,
        ) = row;

        let id = Uuid::parse_str(&id).map_err(|e| ExecutionLogError::Serialization(e.to_string()))?;
        let status = ExecutionStatus::parse(&status).ok_or_else(|| {
            ExecutionLogError::Serialization(format!("unknown execution status '{}'", status))
        })?;
        let attempts = u32::try_from(attempts)
            .map_err(|e| ExecutionLogError::Serialization(e.to_string()))?;
        let executed_at = OffsetDateTime::parse(&executed_at, &Rfc3339)
            .map_err(|e| ExecutionLogError::Serialization(e.to_string()))?;

        Ok(ExecutionRecord {
            id,
            event_fingerprint,
            rule_id,
            account_id,
            platform,
            message,
            status,
            external_id,
            error,
            attempts,
            executed_at,
        })
    }
}

#[async_trait]
impl RuleStore for SqliteStore {
    async fn list_active_rules(&self, account_id: &str) -> Result<Vec<Rule>, RuleStoreError> {
        let rows: Vec<RuleRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, account_id, name, trigger_json, action_json, priority, active, created_at
            FROM rules
            WHERE account_id = ? AND active = 1
            ORDER BY priority DESC, id ASC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RuleStoreError::Database(e.to_string()))?;

        let mut rules = rows
            .into_iter()
            .map(Self::rule_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        // RFC 3339 text doesn't sort chronologically in SQL
        sort_by_precedence(&mut rules);
        Ok(rules)
    }

    async fn get_rule(&self, rule_id: &str) -> Result<Option<Rule>, RuleStoreError> {
        let row: Option<RuleRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, account_id, name, trigger_json, action_json, priority, active, created_at
            FROM rules
            WHERE id = ?
            "#,
        )
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RuleStoreError::Database(e.to_string()))?;

        row.map(Self::rule_from_row).transpose()
    }

    async fn save_rule(&self, rule: &Rule) -> Result<(), RuleStoreError> {
        let trigger_json = serde_json::to_string(&rule.trigger)
            .map_err(|e| RuleStoreError::Serialization(e.to_string()))?;
        let action_json = serde_json::to_string(&rule.action)
            .map_err(|e| RuleStoreError::Serialization(e.to_string()))?;
        let created_at = rule
            .created_at
            .format(&Rfc3339)
            .map_err(|e| RuleStoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO rules
            (id, owner_id, account_id, name, trigger_json, action_json, priority, active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                account_id = excluded.account_id,
                name = excluded.name,
                trigger_json = excluded.trigger_json,
                action_json = excluded.action_json,
                priority = excluded.priority,
                active = excluded.active
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.owner_id)
        .bind(&rule.account_id)
        .bind(&rule.name)
        .bind(&trigger_json)
        .bind(&action_json)
        .bind(i64::from(rule.priority))
        .bind(rule.active)
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RuleStoreError::Database(e.to_string()))?;

        Ok(())
    }

    async fn set_active(&self, rule_id: &str, active: bool) -> Result<(), RuleStoreError> {
        let result = sqlx::query("UPDATE rules SET active = ? WHERE id = ?")
            .bind(active)
            .bind(rule_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RuleStoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RuleStoreError::NotFound(rule_id.to_string()));
        }
        Ok(())
    }

    async fn delete_rule(&self, rule_id: &str) -> Result<(), RuleStoreError> {
        let result = sqlx::query("DELETE FROM rules WHERE id = ?")
            .bind(rule_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RuleStoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RuleStoreError::NotFound(rule_id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionLog for SqliteStore {
    async fn record(&self, record: &ExecutionRecord) -> Result<(), ExecutionLogError> {
        let executed_at = record
            .executed_at
            .format(&Rfc3339)
            .map_err(|e| ExecutionLogError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO executions
            (id, event_fingerprint, rule_id, account_id, platform, message, status,
             external_id, error, attempts, executed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.event_fingerprint)
        .bind(&record.rule_id)
        .bind(&record.account_id)
        .bind(&record.platform)
        .bind(&record.message)
        .bind(record.status.as_str())
        .bind(&record.external_id)
        .bind(&record.error)
        .bind(i64::from(record.attempts))
        .bind(&executed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ExecutionLogError::Database(e.to_string()))?;

        Ok(())
    }

    async fn has_executed(&self, event_fingerprint: &str) -> Result<bool, ExecutionLogError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM executions WHERE event_fingerprint = ? AND status != 'failed'",
        )
        .bind(event_fingerprint)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ExecutionLogError::Database(e.to_string()))?;

        Ok(count.0 > 0)
    }

    async fn list_recent(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, ExecutionLogError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT id, event_fingerprint, rule_id, account_id, platform, message, status,
                   external_id, error, attempts, executed_at
            FROM executions
            WHERE account_id = ?
            ORDER BY rowid DESC
            LIMIT ?
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ExecutionLogError::Database(e.to_string()))?;

        rows.into_iter().map(Self::record_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn rule(id: &str, priority: i32, created_at: OffsetDateTime) -> Rule {
        Rule {
            id: id.to_string(),
            owner_id: "user_1".to_string(),
            account_id: "acct_1".to_string(),
            name: Some(format!("Rule {}", id)),
            trigger: TriggerSpec::KeywordDm {
                keywords: vec!["hours".to_string()],
            },
            action: ActionSpec::SendReply {
                template: "We're open 9-5, {userName}".to_string(),
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
            platform: "facebook".to_string(),
            message: "We're open 9-5, Sam".to_string(),
            status,
            external_id: Some("mid.1".to_string()),
            error: None,
            attempts: 2,
            executed_at: datetime!(2024-05-01 12:00:00 UTC),
        }
    }

    #[tokio::test]
    async fn test_save_and_get_rule() {
        let store = SqliteStore::in_memory().await.unwrap();
        let saved = rule("r1", 3, datetime!(2024-01-01 00:00:00 UTC));

        store.save_rule(&saved).await.unwrap();
        let loaded = store.get_rule("r1").await.unwrap().unwrap();

        assert_eq!(loaded, saved);
    }

    #[tokio::test]
    async fn test_save_rule_upserts() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut r = rule("r1", 3, datetime!(2024-01-01 00:00:00 UTC));
        store.save_rule(&r).await.unwrap();

        r.priority = 7;
        r.trigger = TriggerSpec::OutOfHours { hour: Some(22) };
        store.save_rule(&r).await.unwrap();

        let loaded = store.get_rule("r1").await.unwrap().unwrap();
        assert_eq!(loaded.priority, 7);
        assert_eq!(loaded.trigger, TriggerSpec::OutOfHours { hour: Some(22) });
    }

    #[tokio::test]
    async fn test_list_active_rules_order() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .save_rule(&rule("low", 1, datetime!(2024-01-01 00:00:00 UTC)))
            .await
            .unwrap();
        store
            .save_rule(&rule("b_newer", 5, datetime!(2024-03-01 00:00:00 UTC)))
            .await
            .unwrap();
        store
            .save_rule(&rule("z_older", 5, datetime!(2024-02-01 00:00:00.5 UTC)))
            .await
            .unwrap();
        let mut paused = rule("paused", 9, datetime!(2024-01-01 00:00:00 UTC));
        paused.active = false;
        store.save_rule(&paused).await.unwrap();

        let rules = store.list_active_rules("acct_1").await.unwrap();
        let ids: Vec<_> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["z_older", "b_newer", "low"]);

        let all = store.list_rules().await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].id, "paused");
    }

    #[tokio::test]
    async fn test_toggle_and_delete() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .save_rule(&rule("r1", 0, datetime!(2024-01-01 00:00:00 UTC)))
            .await
            .unwrap();

        store.set_active("r1", false).await.unwrap();
        assert!(store.list_active_rules("acct_1").await.unwrap().is_empty());

        store.delete_rule("r1").await.unwrap();
        assert!(store.get_rule("r1").await.unwrap().is_none());
        assert!(matches!(
            store.set_active("r1", true).await,
            Err(RuleStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_execution_log() {
        let store = SqliteStore::in_memory().await.unwrap();

        store
            .record(&record("fb:1", ExecutionStatus::Failed))
            .await
            .unwrap();
        assert!(!store.has_executed("fb:1").await.unwrap());

        store
            .record(&record("fb:1", ExecutionStatus::Sent))
            .await
            .unwrap();
        assert!(store.has_executed("fb:1").await.unwrap());

        let recent = store.list_recent("acct_1", 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].status, ExecutionStatus::Sent);
        assert_eq!(recent[1].status, ExecutionStatus::Failed);
        assert_eq!(recent[0].attempts, 2);
        assert_eq!(recent[0].external_id.as_deref(), Some("mid.1"));
    }
}
