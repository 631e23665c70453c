use async_trait::async_trait;
use chrono::Duration;

use frontdesk_core::safety::{
    day_bucket, owner_bucket, Admission, AdmissionCheck, AdmissionLimits, AdmissionStore,
    AdmissionStoreError, SkipReason,
};

use super::RepositoryError;
use crate::DbPool;

/// SQL-backed safety-rail counters. Every admission runs in one transaction:
/// the dedup claim and both counter increments either all commit or all roll
/// back, so a rejected admission never consumes budget.
pub struct SqlAdmissionStore {
    pool: DbPool,
    limits: AdmissionLimits,
}

impl SqlAdmissionStore {
    pub fn new(pool: DbPool, limits: AdmissionLimits) -> Self {
        Self { pool, limits }
    }

    /// Drops expired dedup claims. Called opportunistically; admission
    /// correctness does not depend on it because expired rows are reclaimed
    /// inline.
    pub async fn purge_expired(
        &self,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<u64, AdmissionStoreError> {
        let result = sqlx::query("DELETE FROM admission_dedup WHERE expires_at <= ?")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AdmissionStore for SqlAdmissionStore {
    async fn try_admit(&self, check: &AdmissionCheck) -> Result<Admission, AdmissionStoreError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        let now = check.now;
        let expires_at = now + Duration::seconds(self.limits.dedup_ttl_secs as i64);

        // Reclaim an expired claim inline so the insert below can take it.
        sqlx::query(
            "DELETE FROM admission_dedup
             WHERE rule_id = ? AND dedup_key = ? AND expires_at <= ?",
        )
        .bind(&check.rule_id.0)
        .bind(&check.dedup_key.0)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;

        let claimed = sqlx::query(
            "INSERT INTO admission_dedup (rule_id, dedup_key, claimed_at, expires_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(rule_id, dedup_key) DO NOTHING",
        )
        .bind(&check.rule_id.0)
        .bind(&check.dedup_key.0)
        .bind(now.to_rfc3339())
        .bind(expires_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await.map_err(RepositoryError::from)?;
            return Ok(Admission::Skipped(SkipReason::Duplicate));
        }

        // Owner window counter: both arms of the upsert respect the cap, so
        // a cap of zero admits nothing and a full bucket shows up as zero
        // affected rows.
        let owner_scope = format!("owner:{}", check.owner_id.0);
        let owner_bucket = owner_bucket(now, self.limits.owner_window_secs).to_string();
        let owner_admitted = sqlx::query(
            "INSERT INTO admission_counter (scope_key, bucket_key, count)
             SELECT ?, ?, 1 WHERE ? > 0
             ON CONFLICT(scope_key, bucket_key) DO UPDATE SET count = count + 1
             WHERE count < ?",
        )
        .bind(&owner_scope)
        .bind(&owner_bucket)
        .bind(i64::from(self.limits.owner_action_cap))
        .bind(i64::from(self.limits.owner_action_cap))
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;

        if owner_admitted.rows_affected() == 0 {
            tx.rollback().await.map_err(RepositoryError::from)?;
            return Ok(Admission::Skipped(SkipReason::RateLimitedOwner));
        }

        if let Some(contact) = &check.contact {
            let contact_scope = format!("contact:{}:{}", check.owner_id.0, contact);
            let contact_bucket = day_bucket(now);
            let contact_admitted = sqlx::query(
                "INSERT INTO admission_counter (scope_key, bucket_key, count)
                 SELECT ?, ?, 1 WHERE ? > 0
                 ON CONFLICT(scope_key, bucket_key) DO UPDATE SET count = count + 1
                 WHERE count < ?",
            )
            .bind(&contact_scope)
            .bind(&contact_bucket)
            .bind(i64::from(self.limits.contact_daily_cap))
            .bind(i64::from(self.limits.contact_daily_cap))
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;

            if contact_admitted.rows_affected() == 0 {
                tx.rollback().await.map_err(RepositoryError::from)?;
                return Ok(Admission::Skipped(SkipReason::RateLimitedContact));
            }
        }

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(Admission::Admitted)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::Map;

    use frontdesk_core::domain::event::DedupKey;
    use frontdesk_core::domain::rule::{OwnerId, RuleId, TriggerKind};
    use frontdesk_core::safety::{
        Admission, AdmissionCheck, AdmissionLimits, AdmissionStore, SkipReason,
    };

    use super::SqlAdmissionStore;
    use crate::{connect, migrations};

    async fn store(limits: AdmissionLimits) -> SqlAdmissionStore {
        let pool = connect("sqlite::memory:").await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlAdmissionStore::new(pool, limits)
    }

    fn check(rule: &str, owner: &str, contact: Option<&str>, tag: &str) -> AdmissionCheck {
        let mut payload = Map::new();
        payload.insert("tag".to_string(), serde_json::json!(tag));
        let owner_id = OwnerId(owner.to_string());
        AdmissionCheck {
            rule_id: RuleId(rule.to_string()),
            owner_id: owner_id.clone(),
            contact: contact.map(str::to_string),
            dedup_key: DedupKey::derive(TriggerKind::EmailReceived, &owner_id, &payload),
            now: Utc::now(),
        }
    }

    #[tokio::test]
    async fn repeated_dedup_key_is_admitted_once() {
        let store = store(AdmissionLimits::default()).await;
        let check = check("rule-1", "owner-1", None, "a");

        assert_eq!(store.try_admit(&check).await.unwrap(), Admission::Admitted);
        assert_eq!(
            store.try_admit(&check).await.unwrap(),
            Admission::Skipped(SkipReason::Duplicate)
        );
    }

    #[tokio::test]
    async fn same_dedup_key_under_different_rules_does_not_collide() {
        let store = store(AdmissionLimits::default()).await;
        let first = check("rule-1", "owner-1", None, "a");
        let mut second = first.clone();
        second.rule_id = RuleId("rule-2".to_string());

        assert_eq!(store.try_admit(&first).await.unwrap(), Admission::Admitted);
        assert_eq!(store.try_admit(&second).await.unwrap(), Admission::Admitted);
    }

    #[tokio::test]
    async fn owner_cap_rejects_after_the_limit() {
        let limits = AdmissionLimits { owner_action_cap: 3, ..AdmissionLimits::default() };
        let store = store(limits).await;
        let now = Utc::now();

        for index in 0..3 {
            let mut check = check("rule-1", "owner-1", None, &format!("event-{index}"));
            check.now = now;
            assert_eq!(store.try_admit(&check).await.unwrap(), Admission::Admitted);
        }

        let mut fourth = check("rule-1", "owner-1", None, "event-3");
        fourth.now = now;
        assert_eq!(
            store.try_admit(&fourth).await.unwrap(),
            Admission::Skipped(SkipReason::RateLimitedOwner)
        );
    }

    #[tokio::test]
    async fn zero_caps_admit_nothing_even_on_a_fresh_bucket() {
        let limits = AdmissionLimits { owner_action_cap: 0, ..AdmissionLimits::default() };
        let store = store(limits).await;
        assert_eq!(
            store.try_admit(&check("rule-1", "owner-1", None, "a")).await.unwrap(),
            Admission::Skipped(SkipReason::RateLimitedOwner)
        );

        let limits = AdmissionLimits { contact_daily_cap: 0, ..AdmissionLimits::default() };
        let store = self::store(limits).await;
        assert_eq!(
            store
                .try_admit(&check("rule-1", "owner-1", Some("a@example.com"), "b"))
                .await
                .unwrap(),
            Admission::Skipped(SkipReason::RateLimitedContact)
        );
    }

    #[tokio::test]
    async fn contact_cap_counts_per_owner_contact_pair() {
        let limits = AdmissionLimits { contact_daily_cap: 2, ..AdmissionLimits::default() };
        let store = store(limits).await;

        for index in 0..2 {
            let check =
                check("rule-1", "owner-1", Some("a@example.com"), &format!("event-{index}"));
            assert_eq!(store.try_admit(&check).await.unwrap(), Admission::Admitted);
        }

        let third = check("rule-1", "owner-1", Some("a@example.com"), "event-2");
        assert_eq!(
            store.try_admit(&third).await.unwrap(),
            Admission::Skipped(SkipReason::RateLimitedContact)
        );

        // A different contact has its own daily budget.
        let other = check("rule-1", "owner-1", Some("b@example.com"), "event-3");
        assert_eq!(store.try_admit(&other).await.unwrap(), Admission::Admitted);
    }

    #[tokio::test]
    async fn rejected_admission_consumes_no_budget() {
        let limits = AdmissionLimits {
            owner_action_cap: 10,
            contact_daily_cap: 1,
            ..AdmissionLimits::default()
        };
        let store = store(limits).await;

        let first = check("rule-1", "owner-1", Some("a@example.com"), "a");
        assert_eq!(store.try_admit(&first).await.unwrap(), Admission::Admitted);

        // Rejected by the contact cap; the dedup claim and owner increment
        // from this attempt must roll back.
        let rejected = check("rule-1", "owner-1", Some("a@example.com"), "b");
        assert_eq!(
            store.try_admit(&rejected).await.unwrap(),
            Admission::Skipped(SkipReason::RateLimitedContact)
        );

        // The same dedup key without the capped contact is admitted, proving
        // the earlier rejection left no claim behind.
        let mut retry = rejected.clone();
        retry.contact = None;
        assert_eq!(store.try_admit(&retry).await.unwrap(), Admission::Admitted);
    }

    #[tokio::test]
    async fn expired_dedup_claims_are_reclaimed() {
        let limits = AdmissionLimits { dedup_ttl_secs: 60, ..AdmissionLimits::default() };
        let store = store(limits).await;

        let first = check("rule-1", "owner-1", None, "a");
        assert_eq!(store.try_admit(&first).await.unwrap(), Admission::Admitted);

        let mut later = first.clone();
        later.now = first.now + Duration::seconds(120);
        assert_eq!(store.try_admit(&later).await.unwrap(), Admission::Admitted);
    }

    #[tokio::test]
    async fn purge_removes_only_expired_claims() {
        let limits = AdmissionLimits { dedup_ttl_secs: 60, ..AdmissionLimits::default() };
        let store = store(limits).await;

        let old = check("rule-1", "owner-1", None, "a");
        store.try_admit(&old).await.unwrap();
        let mut fresh = check("rule-1", "owner-1", None, "b");
        fresh.now = old.now + Duration::seconds(120);
        store.try_admit(&fresh).await.unwrap();

        let purged = store.purge_expired(old.now + Duration::seconds(120)).await.unwrap();

        assert_eq!(purged, 1);
    }
}
