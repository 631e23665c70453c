use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use frontdesk_core::domain::rule::{AutomationRule, OwnerId, Predicate, RuleId, TriggerKind};
use frontdesk_core::errors::StoreError;
use frontdesk_core::rules::engine::{LedgerOutcome, LedgerUpdate, RuleRepository};

use super::RepositoryError;
use crate::DbPool;

pub struct SqlRuleRepository {
    pool: DbPool,
}

impl SqlRuleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Upsert used by rule CRUD and test fixtures.
    pub async fn save_rule(&self, rule: &AutomationRule) -> Result<(), StoreError> {
        let predicate = serde_json::to_string(&rule.predicate)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let action_params = serde_json::to_string(&rule.action_params)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO automation_rule (
                id,
                owner_id,
                name,
                trigger_kind,
                predicate,
                action_kind,
                action_params,
                status,
                execution_count,
                success_count,
                error_count,
                last_executed_at,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                name = excluded.name,
                trigger_kind = excluded.trigger_kind,
                predicate = excluded.predicate,
                action_kind = excluded.action_kind,
                action_params = excluded.action_params,
                status = excluded.status,
                execution_count = excluded.execution_count,
                success_count = excluded.success_count,
                error_count = excluded.error_count,
                last_executed_at = excluded.last_executed_at,
                updated_at = excluded.updated_at",
        )
        .bind(&rule.id.0)
        .bind(&rule.owner_id.0)
        .bind(&rule.name)
        .bind(rule.trigger_kind.as_str())
        .bind(predicate)
        .bind(rule.action_kind.as_str())
        .bind(action_params)
        .bind(rule.status.as_str())
        .bind(rule.execution_count as i64)
        .bind(rule.success_count as i64)
        .bind(rule.error_count as i64)
        .bind(rule.last_executed_at.map(|value| value.to_rfc3339()))
        .bind(rule.created_at.to_rfc3339())
        .bind(rule.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }
}

const RULE_COLUMNS: &str = "id,
    owner_id,
    name,
    trigger_kind,
    predicate,
    action_kind,
    action_params,
    status,
    execution_count,
    success_count,
    error_count,
    last_executed_at,
    created_at,
    updated_at";

#[async_trait]
impl RuleRepository for SqlRuleRepository {
    async fn active_rules(
        &self,
        owner_id: &OwnerId,
        trigger_kind: TriggerKind,
    ) -> Result<Vec<AutomationRule>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS}
             FROM automation_rule
             WHERE owner_id = ? AND trigger_kind = ? AND status = 'active'
             ORDER BY created_at ASC",
        ))
        .bind(&owner_id.0)
        .bind(trigger_kind.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter()
            .map(|row| rule_from_row(row).map_err(StoreError::from))
            .collect()
    }

    async fn find_rule(&self, id: &RuleId) -> Result<Option<AutomationRule>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM automation_rule WHERE id = ?",
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.map(|row| rule_from_row(row).map_err(StoreError::from)).transpose()
    }

    async fn apply_ledger_update(&self, update: &LedgerUpdate) -> Result<(), StoreError> {
        let (success_bump, error_bump) = match update.outcome {
            LedgerOutcome::Success => (1_i64, 0_i64),
            LedgerOutcome::Failure => (0_i64, 1_i64),
        };

        let result = sqlx::query(
            "UPDATE automation_rule SET
                execution_count = execution_count + 1,
                success_count = success_count + ?,
                error_count = error_count + ?,
                last_executed_at = ?,
                updated_at = ?
             WHERE id = ?",
        )
        .bind(success_bump)
        .bind(error_bump)
        .bind(update.executed_at.to_rfc3339())
        .bind(update.executed_at.to_rfc3339())
        .bind(&update.rule_id.0)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::backend(format!(
                "ledger update targeted unknown rule `{}`",
                update.rule_id.0
            )));
        }
        Ok(())
    }
}

fn rule_from_row(row: SqliteRow) -> Result<AutomationRule, RepositoryError> {
    let trigger_raw = row.try_get::<String, _>("trigger_kind")?;
    let trigger_kind = trigger_raw
        .parse::<TriggerKind>()
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;
    let action_raw = row.try_get::<String, _>("action_kind")?;
    let action_kind = action_raw
        .parse()
        .map_err(|error: frontdesk_core::errors::DomainError| {
            RepositoryError::Decode(error.to_string())
        })?;
    let status_raw = row.try_get::<String, _>("status")?;
    let status = status_raw
        .parse()
        .map_err(|error: frontdesk_core::errors::DomainError| {
            RepositoryError::Decode(error.to_string())
        })?;

    let predicate: Predicate = serde_json::from_str(row.try_get("predicate")?)
        .map_err(|error| RepositoryError::Decode(format!("predicate: {error}")))?;
    let action_params = serde_json::from_str(row.try_get("action_params")?)
        .map_err(|error| RepositoryError::Decode(format!("action_params: {error}")))?;

    Ok(AutomationRule {
        id: RuleId(row.try_get("id")?),
        owner_id: OwnerId(row.try_get("owner_id")?),
        name: row.try_get("name")?,
        trigger_kind,
        predicate,
        action_kind,
        action_params,
        status,
        execution_count: parse_count("execution_count", row.try_get("execution_count")?)?,
        success_count: parse_count("success_count", row.try_get("success_count")?)?,
        error_count: parse_count("error_count", row.try_get("error_count")?)?,
        last_executed_at: parse_optional_timestamp(
            "last_executed_at",
            row.try_get("last_executed_at")?,
        )?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

pub(crate) fn parse_count(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("negative count in `{column}`: {value}")))
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("timestamp in `{column}`: {error}")))
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|value| parse_timestamp(column, value)).transpose()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::{json, Map};

    use frontdesk_core::domain::rule::{
        ActionKind, AutomationRule, Condition, ConditionOperator, OwnerId, Predicate, RuleId,
        RuleStatus, TriggerKind,
    };
    use frontdesk_core::rules::engine::{LedgerOutcome, LedgerUpdate, RuleRepository};

    use super::SqlRuleRepository;
    use crate::{connect, migrations};

    async fn repository() -> SqlRuleRepository {
        let pool = connect("sqlite::memory:").await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlRuleRepository::new(pool)
    }

    fn rule(id: &str, status: RuleStatus) -> AutomationRule {
        let now = Utc::now();
        AutomationRule {
            id: RuleId(id.to_string()),
            owner_id: OwnerId("owner-1".to_string()),
            name: format!("rule {id}"),
            trigger_kind: TriggerKind::EmailReceived,
            predicate: Predicate::new(vec![Condition {
                field: "subject".to_string(),
                operator: ConditionOperator::Contains,
                value: json!("pricing"),
            }]),
            action_kind: ActionKind::GenerateAiReply,
            action_params: Map::new(),
            status,
            execution_count: 0,
            success_count: 0,
            error_count: 0,
            last_executed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn save_and_find_round_trips_the_predicate() {
        let repository = repository().await;
        let original = rule("rule-1", RuleStatus::Active);
        repository.save_rule(&original).await.expect("save");

        let loaded = repository
            .find_rule(&RuleId("rule-1".to_string()))
            .await
            .expect("find")
            .expect("rule exists");

        assert_eq!(loaded.predicate, original.predicate);
        assert_eq!(loaded.trigger_kind, TriggerKind::EmailReceived);
        assert_eq!(loaded.action_kind, ActionKind::GenerateAiReply);
    }

    #[tokio::test]
    async fn active_rules_excludes_paused_and_foreign_rules() {
        let repository = repository().await;
        repository.save_rule(&rule("active", RuleStatus::Active)).await.expect("save");
        repository.save_rule(&rule("paused", RuleStatus::Paused)).await.expect("save");
        let mut foreign = rule("foreign", RuleStatus::Active);
        foreign.owner_id = OwnerId("owner-2".to_string());
        repository.save_rule(&foreign).await.expect("save");

        let active = repository
            .active_rules(&OwnerId("owner-1".to_string()), TriggerKind::EmailReceived)
            .await
            .expect("query");

        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id.0, "active");
    }

    #[tokio::test]
    async fn ledger_updates_bump_exactly_one_outcome_counter() {
        let repository = repository().await;
        repository.save_rule(&rule("rule-1", RuleStatus::Active)).await.expect("save");

        for outcome in [LedgerOutcome::Success, LedgerOutcome::Failure, LedgerOutcome::Success] {
            repository
                .apply_ledger_update(&LedgerUpdate {
                    rule_id: RuleId("rule-1".to_string()),
                    outcome,
                    executed_at: Utc::now(),
                })
                .await
                .expect("ledger update");
        }

        let loaded = repository
            .find_rule(&RuleId("rule-1".to_string()))
            .await
            .expect("find")
            .expect("rule exists");
        assert_eq!(loaded.execution_count, 3);
        assert_eq!(loaded.success_count, 2);
        assert_eq!(loaded.error_count, 1);
        assert!(loaded.last_executed_at.is_some());
        assert!(loaded.ledger_consistent());
    }

    #[tokio::test]
    async fn ledger_update_for_missing_rule_is_an_error() {
        let repository = repository().await;

        let result = repository
            .apply_ledger_update(&LedgerUpdate {
                rule_id: RuleId("ghost".to_string()),
                outcome: LedgerOutcome::Success,
                executed_at: Utc::now(),
            })
            .await;

        assert!(result.is_err());
    }
}
