//! Dry-run simulation: replay archived events against a rule without
//! touching the safety rails or dispatching any action.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::event::TriggerEvent;
use crate::domain::rule::{AutomationRule, OwnerId, RuleDraft, RuleId, TriggerKind};
use crate::errors::StoreError;
use crate::rules::engine::RuleRepository;

/// Lookback window bounds, in days.
pub const MIN_LOOKBACK_DAYS: u32 = 1;
pub const MAX_LOOKBACK_DAYS: u32 = 90;

/// Read access to archived trigger events, for replay.
#[async_trait]
pub trait EventHistory: Send + Sync {
    async fn record(&self, event: &TriggerEvent) -> Result<(), StoreError>;

    async fn events_since(
        &self,
        owner_id: &OwnerId,
        trigger_kind: TriggerKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<TriggerEvent>, StoreError>;
}

/// What to simulate: a saved rule by id, or an unsaved draft.
#[derive(Clone, Debug)]
pub enum SimulationTarget {
    Saved(RuleId),
    Draft(RuleDraft),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SimulationError {
    #[error("lookback window must be between {MIN_LOOKBACK_DAYS} and {MAX_LOOKBACK_DAYS} days, got {0}")]
    InvalidWindow(u32),
    #[error("rule `{0}` not found")]
    RuleNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One replayed event and whether the rule would have fired on it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulatedMatch {
    pub occurred_at: DateTime<Utc>,
    pub contact: Option<String>,
    pub would_trigger: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub rule_name: String,
    pub days_back: u32,
    pub events_considered: usize,
    pub would_trigger_count: usize,
    pub matches: Vec<SimulatedMatch>,
}

pub struct Simulator {
    rules: Arc<dyn RuleRepository>,
    history: Arc<dyn EventHistory>,
}

impl Simulator {
    pub fn new(rules: Arc<dyn RuleRepository>, history: Arc<dyn EventHistory>) -> Self {
        Self { rules, history }
    }

    pub async fn simulate(
        &self,
        owner_id: &OwnerId,
        target: SimulationTarget,
        days_back: u32,
    ) -> Result<SimulationReport, SimulationError> {
        if !(MIN_LOOKBACK_DAYS..=MAX_LOOKBACK_DAYS).contains(&days_back) {
            return Err(SimulationError::InvalidWindow(days_back));
        }

        let (name, trigger_kind, predicate) = match target {
            SimulationTarget::Saved(rule_id) => {
                let rule: AutomationRule = self
                    .rules
                    .find_rule(&rule_id)
                    .await?
                    .ok_or_else(|| SimulationError::RuleNotFound(rule_id.0.clone()))?;
                (rule.name, rule.trigger_kind, rule.predicate)
            }
            SimulationTarget::Draft(draft) => (draft.name, draft.trigger_kind, draft.predicate),
        };

        let since = Utc::now() - Duration::days(i64::from(days_back));
        let events = self.history.events_since(owner_id, trigger_kind, since).await?;

        let matches: Vec<SimulatedMatch> = events
            .iter()
            .map(|event| SimulatedMatch {
                occurred_at: event.occurred_at,
                contact: event.contact().map(str::to_string),
                would_trigger: predicate.matches(&event.payload),
            })
            .collect();
        let would_trigger_count =
            matches.iter().filter(|simulated| simulated.would_trigger).count();

        Ok(SimulationReport {
            rule_name: name,
            days_back,
            events_considered: events.len(),
            would_trigger_count,
            matches,
        })
    }
}
