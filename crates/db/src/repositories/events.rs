use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use frontdesk_core::domain::event::{DedupKey, TriggerEvent};
use frontdesk_core::domain::rule::{OwnerId, TriggerKind};
use frontdesk_core::errors::StoreError;
use frontdesk_core::rules::simulate::EventHistory;

use super::rule::parse_timestamp;
use super::RepositoryError;
use crate::DbPool;

/// Archive of ingested trigger events, read back for dry-run simulation.
pub struct SqlEventHistory {
    pool: DbPool,
}

impl SqlEventHistory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventHistory for SqlEventHistory {
    async fn record(&self, event: &TriggerEvent) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&event.payload)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO trigger_event_archive (
                owner_id,
                trigger_kind,
                payload,
                dedup_key,
                occurred_at
             ) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&event.owner_id.0)
        .bind(event.kind.as_str())
        .bind(payload)
        .bind(&event.dedup_key.0)
        .bind(event.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }

    async fn events_since(
        &self,
        owner_id: &OwnerId,
        trigger_kind: TriggerKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<TriggerEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT owner_id, trigger_kind, payload, dedup_key, occurred_at
             FROM trigger_event_archive
             WHERE owner_id = ? AND trigger_kind = ? AND occurred_at >= ?
             ORDER BY occurred_at ASC",
        )
        .bind(&owner_id.0)
        .bind(trigger_kind.as_str())
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter()
            .map(|row| event_from_row(row).map_err(StoreError::from))
            .collect()
    }
}

fn event_from_row(row: SqliteRow) -> Result<TriggerEvent, RepositoryError> {
    let kind_raw = row.try_get::<String, _>("trigger_kind")?;
    let kind = kind_raw
        .parse()
        .map_err(|error: frontdesk_core::errors::DomainError| {
            RepositoryError::Decode(error.to_string())
        })?;
    let payload = serde_json::from_str(row.try_get("payload")?)
        .map_err(|error| RepositoryError::Decode(format!("payload: {error}")))?;

    Ok(TriggerEvent {
        kind,
        owner_id: OwnerId(row.try_get("owner_id")?),
        payload,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
        dedup_key: DedupKey(row.try_get("dedup_key")?),
    })
}
