use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use frontdesk_core::domain::execution::{
    ActionExecution, DailyExecutionCounts, ExecutionId, ExecutionStatus,
};
use frontdesk_core::domain::rule::{OwnerId, RuleId};
use frontdesk_core::errors::StoreError;
use frontdesk_core::rules::engine::ExecutionLog;

use super::rule::{parse_count, parse_timestamp};
use super::RepositoryError;
use crate::DbPool;

/// Append-only ledger of action executions plus the action log read API.
pub struct SqlActionLogRepository {
    pool: DbPool,
}

impl SqlActionLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionLog for SqlActionLogRepository {
    async fn append(&self, execution: ActionExecution) -> Result<(), StoreError> {
        let details = serde_json::to_string(&execution.details)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO action_execution (
                id,
                rule_id,
                owner_id,
                target_contact,
                action_kind,
                status,
                reason,
                executed_at,
                details
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&execution.id.0)
        .bind(&execution.rule_id.0)
        .bind(&execution.owner_id.0)
        .bind(execution.target_contact.as_deref())
        .bind(execution.action_kind.as_str())
        .bind(execution.status.as_str())
        .bind(execution.reason.as_deref())
        .bind(execution.executed_at.to_rfc3339())
        .bind(details)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }

    async fn recent(
        &self,
        rule_id: &RuleId,
        limit: usize,
    ) -> Result<Vec<ActionExecution>, StoreError> {
        let rows = sqlx::query(
            "SELECT
                id,
                rule_id,
                owner_id,
                target_contact,
                action_kind,
                status,
                reason,
                executed_at,
                details
             FROM action_execution
             WHERE rule_id = ?
             ORDER BY executed_at DESC, id DESC
             LIMIT ?",
        )
        .bind(&rule_id.0)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter()
            .map(|row| execution_from_row(row).map_err(StoreError::from))
            .collect()
    }

    async fn daily_counts(
        &self,
        rule_id: &RuleId,
        since: DateTime<Utc>,
    ) -> Result<Vec<DailyExecutionCounts>, StoreError> {
        let rows = sqlx::query(
            "SELECT
                strftime('%Y-%m-%d', executed_at) AS day,
                SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END) AS success,
                SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed,
                SUM(CASE WHEN status = 'skipped' THEN 1 ELSE 0 END) AS skipped
             FROM action_execution
             WHERE rule_id = ? AND executed_at >= ?
             GROUP BY day
             ORDER BY day ASC",
        )
        .bind(&rule_id.0)
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter()
            .map(|row| daily_counts_from_row(row).map_err(StoreError::from))
            .collect()
    }
}

fn execution_from_row(row: SqliteRow) -> Result<ActionExecution, RepositoryError> {
    let action_raw = row.try_get::<String, _>("action_kind")?;
    let action_kind = action_raw
        .parse()
        .map_err(|error: frontdesk_core::errors::DomainError| {
            RepositoryError::Decode(error.to_string())
        })?;
    let status_raw = row.try_get::<String, _>("status")?;
    let status: ExecutionStatus = status_raw
        .parse()
        .map_err(|error: frontdesk_core::errors::DomainError| {
            RepositoryError::Decode(error.to_string())
        })?;
    let details = serde_json::from_str(row.try_get("details")?)
        .map_err(|error| RepositoryError::Decode(format!("details: {error}")))?;

    Ok(ActionExecution {
        id: ExecutionId(row.try_get("id")?),
        rule_id: RuleId(row.try_get("rule_id")?),
        owner_id: OwnerId(row.try_get("owner_id")?),
        target_contact: row.try_get("target_contact")?,
        action_kind,
        status,
        reason: row.try_get("reason")?,
        executed_at: parse_timestamp("executed_at", row.try_get("executed_at")?)?,
        details,
    })
}

fn daily_counts_from_row(row: SqliteRow) -> Result<DailyExecutionCounts, RepositoryError> {
    let day_raw = row.try_get::<String, _>("day")?;
    let day = NaiveDate::parse_from_str(&day_raw, "%Y-%m-%d")
        .map_err(|error| RepositoryError::Decode(format!("day bucket `{day_raw}`: {error}")))?;

    Ok(DailyExecutionCounts {
        day,
        success: parse_count("success", row.try_get("success")?)?,
        failed: parse_count("failed", row.try_get("failed")?)?,
        skipped: parse_count("skipped", row.try_get("skipped")?)?,
    })
}
