//! In-memory stores backing engine and simulator tests, and useful for
//! running the server without a database during development.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::event::TriggerEvent;
use crate::domain::execution::{ActionExecution, DailyExecutionCounts, ExecutionStatus};
use crate::domain::rule::{AutomationRule, OwnerId, RuleId, RuleStatus, TriggerKind};
use crate::errors::StoreError;
use crate::rules::engine::{ExecutionLog, LedgerOutcome, LedgerUpdate, RuleRepository};
use crate::rules::simulate::EventHistory;

#[derive(Default)]
pub struct InMemoryRuleRepository {
    rules: Mutex<Vec<AutomationRule>>,
}

impl InMemoryRuleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, rule: AutomationRule) {
        let mut rules = self.rules.lock().expect("rule store lock");
        rules.retain(|existing| existing.id != rule.id);
        rules.push(rule);
    }
}

#[async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn active_rules(
        &self,
        owner_id: &OwnerId,
        trigger_kind: TriggerKind,
    ) -> Result<Vec<AutomationRule>, StoreError> {
        let rules = self
            .rules
            .lock()
            .map_err(|_| StoreError::backend("rule store lock poisoned"))?;
        Ok(rules
            .iter()
            .filter(|rule| {
                rule.owner_id == *owner_id
                    && rule.trigger_kind == trigger_kind
                    && rule.status == RuleStatus::Active
            })
            .cloned()
            .collect())
    }

    async fn find_rule(&self, id: &RuleId) -> Result<Option<AutomationRule>, StoreError> {
        let rules = self
            .rules
            .lock()
            .map_err(|_| StoreError::backend("rule store lock poisoned"))?;
        Ok(rules.iter().find(|rule| rule.id == *id).cloned())
    }

    async fn apply_ledger_update(&self, update: &LedgerUpdate) -> Result<(), StoreError> {
        let mut rules = self
            .rules
            .lock()
            .map_err(|_| StoreError::backend("rule store lock poisoned"))?;
        let rule = rules
            .iter_mut()
            .find(|rule| rule.id == update.rule_id)
            .ok_or_else(|| StoreError::backend(format!("unknown rule {}", update.rule_id.0)))?;

        rule.execution_count += 1;
        match update.outcome {
            LedgerOutcome::Success => rule.success_count += 1,
            LedgerOutcome::Failure => rule.error_count += 1,
        }
        rule.last_executed_at = Some(update.executed_at);
        rule.updated_at = update.executed_at;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryExecutionLog {
    executions: Mutex<Vec<ActionExecution>>,
}

impl InMemoryExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ActionExecution> {
        self.executions.lock().expect("execution log lock").clone()
    }
}

#[async_trait]
impl ExecutionLog for InMemoryExecutionLog {
    async fn append(&self, execution: ActionExecution) -> Result<(), StoreError> {
        self.executions
            .lock()
            .map_err(|_| StoreError::backend("execution log lock poisoned"))?
            .push(execution);
        Ok(())
    }

    async fn recent(
        &self,
        rule_id: &RuleId,
        limit: usize,
    ) -> Result<Vec<ActionExecution>, StoreError> {
        let executions = self
            .executions
            .lock()
            .map_err(|_| StoreError::backend("execution log lock poisoned"))?;
        let mut matching: Vec<ActionExecution> = executions
            .iter()
            .filter(|execution| execution.rule_id == *rule_id)
            .cloned()
            .collect();
        matching.sort_by(|left, right| right.executed_at.cmp(&left.executed_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn daily_counts(
        &self,
        rule_id: &RuleId,
        since: DateTime<Utc>,
    ) -> Result<Vec<DailyExecutionCounts>, StoreError> {
        let executions = self
            .executions
            .lock()
            .map_err(|_| StoreError::backend("execution log lock poisoned"))?;

        let mut days: BTreeMap<chrono::NaiveDate, DailyExecutionCounts> = BTreeMap::new();
        for execution in executions
            .iter()
            .filter(|execution| execution.rule_id == *rule_id && execution.executed_at >= since)
        {
            let day = execution.executed_at.date_naive();
            let counts = days.entry(day).or_insert_with(|| DailyExecutionCounts {
                day,
                success: 0,
                failed: 0,
                skipped: 0,
            });
            match execution.status {
                ExecutionStatus::Success => counts.success += 1,
                ExecutionStatus::Failed => counts.failed += 1,
                ExecutionStatus::Skipped => counts.skipped += 1,
            }
        }
        Ok(days.into_values().collect())
    }
}

#[derive(Default)]
pub struct InMemoryEventHistory {
    events: Mutex<Vec<TriggerEvent>>,
}

impl InMemoryEventHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventHistory for InMemoryEventHistory {
    async fn record(&self, event: &TriggerEvent) -> Result<(), StoreError> {
        self.events
            .lock()
            .map_err(|_| StoreError::backend("event history lock poisoned"))?
            .push(event.clone());
        Ok(())
    }

    async fn events_since(
        &self,
        owner_id: &OwnerId,
        trigger_kind: TriggerKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<TriggerEvent>, StoreError> {
        let events = self
            .events
            .lock()
            .map_err(|_| StoreError::backend("event history lock poisoned"))?;
        let mut matching: Vec<TriggerEvent> = events
            .iter()
            .filter(|event| {
                event.owner_id == *owner_id
                    && event.kind == trigger_kind
                    && event.occurred_at >= since
            })
            .cloned()
            .collect();
        matching.sort_by(|left, right| left.occurred_at.cmp(&right.occurred_at));
        Ok(matching)
    }
}
