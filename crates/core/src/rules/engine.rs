//! Trigger evaluation: match rules, gate through the safety rails, dispatch,
//! and record the outcome in the execution ledger.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info};

use crate::actions::dispatcher::{ActionDispatcher, DispatchOutcome};
use crate::domain::event::TriggerEvent;
use crate::domain::execution::{ActionExecution, DailyExecutionCounts};
use crate::domain::rule::{AutomationRule, OwnerId, RuleId, TriggerKind};
use crate::errors::StoreError;
use crate::safety::{Admission, AdmissionStoreError, SafetyRails};

/// Ledger counter update applied after a dispatched (non-skipped) action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerUpdate {
    pub rule_id: RuleId,
    pub outcome: LedgerOutcome,
    pub executed_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerOutcome {
    Success,
    Failure,
}

#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn active_rules(
        &self,
        owner_id: &OwnerId,
        trigger_kind: TriggerKind,
    ) -> Result<Vec<AutomationRule>, StoreError>;

    async fn find_rule(&self, id: &RuleId) -> Result<Option<AutomationRule>, StoreError>;

    /// Bumps execution_count plus exactly one of success_count/error_count,
    /// and sets last_executed_at. Skips never reach this method.
    async fn apply_ledger_update(&self, update: &LedgerUpdate) -> Result<(), StoreError>;
}

/// Append-only execution ledger plus its read API for the action log.
#[async_trait]
pub trait ExecutionLog: Send + Sync {
    async fn append(&self, execution: ActionExecution) -> Result<(), StoreError>;

    async fn recent(
        &self,
        rule_id: &RuleId,
        limit: usize,
    ) -> Result<Vec<ActionExecution>, StoreError>;

    async fn daily_counts(
        &self,
        rule_id: &RuleId,
        since: DateTime<Utc>,
    ) -> Result<Vec<DailyExecutionCounts>, StoreError>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Admission(#[from] AdmissionStoreError),
}

/// What one event produced, mostly for logging and tests.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventReport {
    pub candidate_rules: usize,
    pub matched_rules: usize,
    pub executions: Vec<ActionExecution>,
}

pub struct RuleEngine {
    rules: Arc<dyn RuleRepository>,
    safety: SafetyRails,
    dispatcher: Arc<ActionDispatcher>,
    log: Arc<dyn ExecutionLog>,
}

impl RuleEngine {
    pub fn new(
        rules: Arc<dyn RuleRepository>,
        safety: SafetyRails,
        dispatcher: Arc<ActionDispatcher>,
        log: Arc<dyn ExecutionLog>,
    ) -> Self {
        Self { rules, safety, dispatcher, log }
    }

    pub fn safety(&self) -> &SafetyRails {
        &self.safety
    }

    /// Evaluates every active rule of the owner against the event.
    ///
    /// Rules are independent: a failing or skipped rule never blocks its
    /// siblings, and per-rule infrastructure errors are logged and swallowed
    /// so the remaining rules still run.
    pub async fn process_event(&self, event: &TriggerEvent) -> Result<EventReport, EngineError> {
        let candidates = self.rules.active_rules(&event.owner_id, event.kind).await?;

        let mut report =
            EventReport { candidate_rules: candidates.len(), ..EventReport::default() };

        for rule in candidates {
            if !rule.predicate.matches(&event.payload) {
                continue;
            }
            report.matched_rules += 1;

            match self.evaluate_matched_rule(&rule, event).await {
                Ok(execution) => report.executions.push(execution),
                Err(error) => {
                    error!(
                        event_name = "rule_engine.rule_evaluation_failed",
                        rule_id = %rule.id.0,
                        owner_id = %event.owner_id.0,
                        error = %error,
                        "rule evaluation failed; continuing with remaining rules"
                    );
                }
            }
        }

        Ok(report)
    }

    async fn evaluate_matched_rule(
        &self,
        rule: &AutomationRule,
        event: &TriggerEvent,
    ) -> Result<ActionExecution, EngineError> {
        let admission = self
            .safety
            .admit(&rule.id, &event.owner_id, event.contact(), &event.dedup_key, Utc::now())
            .await?;

        let execution = match admission {
            Admission::Skipped(reason) => {
                info!(
                    event_name = "rule_engine.action_skipped",
                    rule_id = %rule.id.0,
                    owner_id = %event.owner_id.0,
                    reason = reason.as_str(),
                    "action skipped by safety rails"
                );
                ActionExecution::skipped(rule, event, Utc::now(), reason)
            }
            Admission::Admitted => {
                let outcome =
                    self.dispatcher.dispatch(rule.action_kind, &rule.action_params, event).await;
                let executed_at = Utc::now();

                let (execution, ledger_outcome) = match outcome {
                    DispatchOutcome::Success { details } => (
                        ActionExecution::success(rule, event, executed_at, details),
                        LedgerOutcome::Success,
                    ),
                    DispatchOutcome::Failed { reason } => (
                        ActionExecution::failed(rule, event, executed_at, reason),
                        LedgerOutcome::Failure,
                    ),
                };

                info!(
                    event_name = "rule_engine.action_dispatched",
                    rule_id = %rule.id.0,
                    owner_id = %event.owner_id.0,
                    action_kind = rule.action_kind.as_str(),
                    status = execution.status.as_str(),
                    "action dispatched"
                );

                self.rules
                    .apply_ledger_update(&LedgerUpdate {
                        rule_id: rule.id.clone(),
                        outcome: ledger_outcome,
                        executed_at,
                    })
                    .await?;
                execution
            }
        };

        self.log.append(execution.clone()).await?;
        Ok(execution)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::{json, Map, Value};

    use super::{RuleEngine, RuleRepository};
    use crate::actions::dispatcher::ActionDispatcher;
    use crate::actions::testing::{RecordingCollaborators, StaticReplyGenerator};
    use crate::domain::event::TriggerEvent;
    use crate::domain::execution::ExecutionStatus;
    use crate::domain::routing::RoutingErrorKind;
    use crate::domain::rule::{
        ActionKind, AutomationRule, Condition, ConditionOperator, OwnerId, Predicate, RuleId,
        RuleStatus, TriggerKind,
    };
    use crate::rules::memory::{InMemoryExecutionLog, InMemoryRuleRepository};
    use crate::safety::{AdmissionLimits, InMemoryAdmissionStore, KillSwitch, SafetyRails};

    struct Harness {
        engine: RuleEngine,
        rules: Arc<InMemoryRuleRepository>,
        log: Arc<InMemoryExecutionLog>,
        recording: RecordingCollaborators,
        kill_switch: KillSwitch,
    }

    fn harness(limits: AdmissionLimits) -> Harness {
        let recording = RecordingCollaborators::new();
        let dispatcher = Arc::new(ActionDispatcher::with_default_handlers(
            recording.collaborators(),
        ));
        let rules = Arc::new(InMemoryRuleRepository::new());
        let log = Arc::new(InMemoryExecutionLog::new());
        let kill_switch = KillSwitch::new();
        let safety = SafetyRails::new(
            kill_switch.clone(),
            Arc::new(InMemoryAdmissionStore::new(limits)),
        );
        let engine = RuleEngine::new(rules.clone(), safety, dispatcher, log.clone());
        Harness { engine, rules, log, recording, kill_switch }
    }

    fn pricing_rule(id: &str, action_kind: ActionKind) -> AutomationRule {
        let now = Utc::now();
        AutomationRule {
            id: RuleId(id.to_string()),
            owner_id: OwnerId("owner-1".to_string()),
            name: "Reply to pricing emails".to_string(),
            trigger_kind: TriggerKind::EmailReceived,
            predicate: Predicate::new(vec![Condition {
                field: "subject".to_string(),
                operator: ConditionOperator::Contains,
                value: json!("pricing"),
            }]),
            action_kind,
            action_params: Map::new(),
            status: RuleStatus::Active,
            execution_count: 0,
            success_count: 0,
            error_count: 0,
            last_executed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn pricing_email(tag: &str) -> TriggerEvent {
        let payload: Map<String, Value> = [
            ("sender_email".to_string(), json!("customer@example.com")),
            ("subject".to_string(), json!("Pricing question")),
            ("body".to_string(), json!("How much is the pro plan?")),
            ("message_tag".to_string(), json!(tag)),
        ]
        .into_iter()
        .collect();
        TriggerEvent::new(
            TriggerKind::EmailReceived,
            OwnerId("owner-1".to_string()),
            payload,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn matching_rule_dispatches_and_records_success() {
        let harness = harness(AdmissionLimits::default());
        harness.rules.insert(pricing_rule("rule-1", ActionKind::GenerateAiReply)).await;

        let report = harness.engine.process_event(&pricing_email("a")).await.unwrap();

        assert_eq!(report.matched_rules, 1);
        assert_eq!(report.executions.len(), 1);
        assert_eq!(report.executions[0].status, ExecutionStatus::Success);
        assert_eq!(harness.recording.sent_emails().len(), 1);

        let rule = harness
            .rules
            .find_rule(&RuleId("rule-1".to_string()))
            .await
            .unwrap()
            .expect("rule exists");
        assert_eq!(rule.execution_count, 1);
        assert_eq!(rule.success_count, 1);
        assert_eq!(rule.error_count, 0);
        assert!(rule.last_executed_at.is_some());
        assert!(rule.ledger_consistent());
    }

    #[tokio::test]
    async fn non_matching_event_leaves_everything_untouched() {
        let harness = harness(AdmissionLimits::default());
        harness.rules.insert(pricing_rule("rule-1", ActionKind::SendNotification)).await;

        let mut payload = Map::new();
        payload.insert("subject".to_string(), json!("Unrelated"));
        let event = TriggerEvent::new(
            TriggerKind::EmailReceived,
            OwnerId("owner-1".to_string()),
            payload,
            Utc::now(),
        );

        let report = harness.engine.process_event(&event).await.unwrap();

        assert_eq!(report.candidate_rules, 1);
        assert_eq!(report.matched_rules, 0);
        assert!(report.executions.is_empty());
        assert!(harness.log.records().is_empty());
    }

    #[tokio::test]
    async fn duplicate_event_is_skipped_with_reason() {
        let harness = harness(AdmissionLimits::default());
        harness.rules.insert(pricing_rule("rule-1", ActionKind::GenerateAiReply)).await;

        let event = pricing_email("a");
        let first = harness.engine.process_event(&event).await.unwrap();
        let second = harness.engine.process_event(&event).await.unwrap();

        assert_eq!(first.executions[0].status, ExecutionStatus::Success);
        assert_eq!(second.executions[0].status, ExecutionStatus::Skipped);
        assert_eq!(second.executions[0].reason.as_deref(), Some("duplicate"));

        // Only the first dispatch reached the mailer, and skips never touch
        // the rule counters.
        assert_eq!(harness.recording.sent_emails().len(), 1);
        let rule = harness
            .rules
            .find_rule(&RuleId("rule-1".to_string()))
            .await
            .unwrap()
            .expect("rule exists");
        assert_eq!(rule.execution_count, 1);
    }

    #[tokio::test]
    async fn contact_cap_produces_skips_after_the_limit() {
        let limits = AdmissionLimits { contact_daily_cap: 2, ..AdmissionLimits::default() };
        let harness = harness(limits);
        harness.rules.insert(pricing_rule("rule-1", ActionKind::GenerateAiReply)).await;

        let mut statuses = Vec::new();
        for tag in ["a", "b", "c"] {
            let report = harness.engine.process_event(&pricing_email(tag)).await.unwrap();
            statuses.push((
                report.executions[0].status,
                report.executions[0].reason.clone(),
            ));
        }

        assert_eq!(statuses[0].0, ExecutionStatus::Success);
        assert_eq!(statuses[1].0, ExecutionStatus::Success);
        assert_eq!(statuses[2].0, ExecutionStatus::Skipped);
        assert_eq!(statuses[2].1.as_deref(), Some("rate_limited_contact"));
        assert_eq!(harness.recording.sent_emails().len(), 2);
    }

    #[tokio::test]
    async fn kill_switch_records_skips_and_freezes_counters() {
        let harness = harness(AdmissionLimits::default());
        harness.rules.insert(pricing_rule("rule-1", ActionKind::GenerateAiReply)).await;

        harness.engine.process_event(&pricing_email("before")).await.unwrap();
        let counts_before = harness
            .rules
            .find_rule(&RuleId("rule-1".to_string()))
            .await
            .unwrap()
            .expect("rule exists")
            .execution_count;

        harness.kill_switch.engage();
        let report = harness.engine.process_event(&pricing_email("during")).await.unwrap();

        assert_eq!(report.executions[0].status, ExecutionStatus::Skipped);
        assert_eq!(report.executions[0].reason.as_deref(), Some("kill_switch_active"));

        let rule = harness
            .rules
            .find_rule(&RuleId("rule-1".to_string()))
            .await
            .unwrap()
            .expect("rule exists");
        assert_eq!(rule.execution_count, counts_before);
        assert_eq!(harness.recording.sent_emails().len(), 1);
    }

    #[tokio::test]
    async fn failed_action_increments_error_count_and_siblings_still_run() {
        let harness = harness(AdmissionLimits::default());

        // First rule fails: the AI reply pipeline reports a provider error.
        let mut failing = pricing_rule("rule-fail", ActionKind::GenerateAiReply);
        failing.action_params = Map::new();
        harness.rules.insert(failing).await;
        let mut notify = pricing_rule("rule-notify", ActionKind::SendNotification);
        notify
            .action_params
            .insert("message".to_string(), json!("pricing email arrived"));
        harness.rules.insert(notify).await;

        // Swap the reply generator for a failing one by rebuilding the
        // dispatcher.
        let recording = RecordingCollaborators::new();
        let mut collaborators = recording.collaborators();
        collaborators.replies =
            Arc::new(StaticReplyGenerator::failing(RoutingErrorKind::ProviderError));
        let dispatcher = Arc::new(ActionDispatcher::with_default_handlers(collaborators));
        let engine = RuleEngine::new(
            harness.rules.clone(),
            harness.engine.safety().clone(),
            dispatcher,
            harness.log.clone(),
        );

        let report = engine.process_event(&pricing_email("a")).await.unwrap();

        assert_eq!(report.executions.len(), 2);
        let statuses: Vec<ExecutionStatus> =
            report.executions.iter().map(|execution| execution.status).collect();
        assert!(statuses.contains(&ExecutionStatus::Failed));
        assert!(statuses.contains(&ExecutionStatus::Success));

        let failed_rule = harness
            .rules
            .find_rule(&RuleId("rule-fail".to_string()))
            .await
            .unwrap()
            .expect("rule exists");
        assert_eq!(failed_rule.error_count, 1);
        assert_eq!(failed_rule.execution_count, 1);
        assert!(failed_rule.ledger_consistent());

        // The notification rule ran despite its sibling's failure.
        assert_eq!(recording.notifications().len(), 1);
    }

    #[tokio::test]
    async fn paused_rules_are_never_candidates() {
        let harness = harness(AdmissionLimits::default());
        let mut paused = pricing_rule("rule-1", ActionKind::SendNotification);
        paused.status = RuleStatus::Paused;
        harness.rules.insert(paused).await;

        let report = harness.engine.process_event(&pricing_email("a")).await.unwrap();

        assert_eq!(report.candidate_rules, 0);
        assert!(harness.log.records().is_empty());
    }
}
