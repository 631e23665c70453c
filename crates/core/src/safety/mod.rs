//! Admission control for rule actions: kill switch, idempotent replay
//! protection, and per-owner / per-contact rate limits.
//!
//! The check order is fixed: kill switch, duplicate, owner window cap,
//! contact daily cap. The first failing check wins. When all checks pass the
//! dedup claim and both counter increments commit as one atomic operation,
//! so two concurrent events for the same owner or contact can never both be
//! admitted past the cap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::event::DedupKey;
use crate::domain::rule::{OwnerId, RuleId};

/// Why an action was not executed. Skips are a normal admission-control
/// outcome, never an error, and never touch a rule's error count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    KillSwitchActive,
    Duplicate,
    RateLimitedOwner,
    RateLimitedContact,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KillSwitchActive => "kill_switch_active",
            Self::Duplicate => "duplicate",
            Self::RateLimitedOwner => "rate_limited_owner",
            Self::RateLimitedContact => "rate_limited_contact",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Skipped(SkipReason),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Caps and windows for admission. Configuration, not hardcoded policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionLimits {
    /// Max admitted actions per owner per window bucket.
    pub owner_action_cap: u32,
    /// Owner bucket width in seconds. Fixed buckets, not a sliding window.
    pub owner_window_secs: u64,
    /// Max admitted actions per (owner, contact) per UTC day.
    pub contact_daily_cap: u32,
    /// How long a dedup claim is retained before it may be reclaimed.
    pub dedup_ttl_secs: u64,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            owner_action_cap: 50,
            owner_window_secs: 300,
            contact_daily_cap: 2,
            dedup_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

/// Fixed-bucket key for the owner window.
pub fn owner_bucket(now: DateTime<Utc>, window_secs: u64) -> i64 {
    let width = window_secs.max(1) as i64;
    now.timestamp().div_euclid(width)
}

/// UTC calendar-day bucket key for the contact cap.
pub fn day_bucket(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

#[derive(Clone, Debug)]
pub struct AdmissionCheck {
    pub rule_id: RuleId,
    pub owner_id: OwnerId,
    pub contact: Option<String>,
    pub dedup_key: DedupKey,
    pub now: DateTime<Utc>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("admission store failure: {0}")]
pub struct AdmissionStoreError(pub String);

impl AdmissionStoreError {
    pub fn backend(message: impl std::fmt::Display) -> Self {
        Self(message.to_string())
    }
}

/// Storage contract for admission. Implementations must make the whole
/// check-and-increment a single atomic operation: either every check passes
/// and the dedup claim plus both counters commit together, or nothing is
/// recorded.
#[async_trait]
pub trait AdmissionStore: Send + Sync {
    async fn try_admit(&self, check: &AdmissionCheck) -> Result<Admission, AdmissionStoreError>;
}

/// Process-wide emergency stop. Toggling applies to new admission checks
/// immediately; dispatches already admitted are allowed to complete.
#[derive(Clone, Debug, Default)]
pub struct KillSwitch {
    engaged: Arc<AtomicBool>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engage(&self) {
        self.engaged.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.engaged.store(false, Ordering::SeqCst);
    }

    pub fn set(&self, engaged: bool) {
        self.engaged.store(engaged, Ordering::SeqCst);
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }
}

/// The admission gate the rule engine consults before dispatching.
#[derive(Clone)]
pub struct SafetyRails {
    kill_switch: KillSwitch,
    store: Arc<dyn AdmissionStore>,
}

impl SafetyRails {
    pub fn new(kill_switch: KillSwitch, store: Arc<dyn AdmissionStore>) -> Self {
        Self { kill_switch, store }
    }

    pub fn kill_switch(&self) -> &KillSwitch {
        &self.kill_switch
    }

    pub async fn admit(
        &self,
        rule_id: &RuleId,
        owner_id: &OwnerId,
        contact: Option<&str>,
        dedup_key: &DedupKey,
        now: DateTime<Utc>,
    ) -> Result<Admission, AdmissionStoreError> {
        if self.kill_switch.is_engaged() {
            return Ok(Admission::Skipped(SkipReason::KillSwitchActive));
        }

        let check = AdmissionCheck {
            rule_id: rule_id.clone(),
            owner_id: owner_id.clone(),
            contact: contact.map(str::to_string),
            dedup_key: dedup_key.clone(),
            now,
        };
        self.store.try_admit(&check).await
    }
}

#[derive(Debug, Default)]
struct InMemoryAdmissionState {
    /// (rule, dedup_key) -> claim expiry.
    dedup: HashMap<(String, String), DateTime<Utc>>,
    /// (owner, bucket) -> admitted count.
    owner_counts: HashMap<(String, i64), u32>,
    /// (owner, contact, day) -> admitted count.
    contact_counts: HashMap<(String, String, String), u32>,
}

/// Mutex-guarded admission store for tests and single-process deployments.
/// The SQL-backed store in the db crate is the production path.
#[derive(Debug, Default)]
pub struct InMemoryAdmissionStore {
    limits: AdmissionLimits,
    state: Mutex<InMemoryAdmissionState>,
}

impl InMemoryAdmissionStore {
    pub fn new(limits: AdmissionLimits) -> Self {
        Self { limits, state: Mutex::new(InMemoryAdmissionState::default()) }
    }
}

#[async_trait]
impl AdmissionStore for InMemoryAdmissionStore {
    async fn try_admit(&self, check: &AdmissionCheck) -> Result<Admission, AdmissionStoreError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| AdmissionStoreError::backend("admission state lock poisoned"))?;

        state.dedup.retain(|_, expires_at| *expires_at > check.now);

        // Counters for past buckets can never reject again; drop them so the
        // maps track only the live window and day.
        let current_bucket = owner_bucket(check.now, self.limits.owner_window_secs);
        let today = day_bucket(check.now);
        state.owner_counts.retain(|(_, bucket), _| *bucket >= current_bucket);
        state.contact_counts.retain(|(_, _, day), _| *day >= today);

        let dedup_slot = (check.rule_id.0.clone(), check.dedup_key.0.clone());
        if state.dedup.contains_key(&dedup_slot) {
            return Ok(Admission::Skipped(SkipReason::Duplicate));
        }

        let owner_slot = (check.owner_id.0.clone(), owner_bucket(check.now, self.limits.owner_window_secs));
        let owner_count = state.owner_counts.get(&owner_slot).copied().unwrap_or(0);
        if owner_count >= self.limits.owner_action_cap {
            return Ok(Admission::Skipped(SkipReason::RateLimitedOwner));
        }

        let contact_slot = check.contact.as_ref().map(|contact| {
            (check.owner_id.0.clone(), contact.clone(), day_bucket(check.now))
        });
        if let Some(slot) = &contact_slot {
            let contact_count = state.contact_counts.get(slot).copied().unwrap_or(0);
            if contact_count >= self.limits.contact_daily_cap {
                return Ok(Admission::Skipped(SkipReason::RateLimitedContact));
            }
        }

        // All checks passed; record everything under the same lock hold.
        let expires_at = check.now + chrono::Duration::seconds(self.limits.dedup_ttl_secs as i64);
        state.dedup.insert(dedup_slot, expires_at);
        *state.owner_counts.entry(owner_slot).or_insert(0) += 1;
        if let Some(slot) = contact_slot {
            *state.contact_counts.entry(slot).or_insert(0) += 1;
        }

        Ok(Admission::Admitted)
    }
}
