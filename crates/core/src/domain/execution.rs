use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::event::TriggerEvent;
use crate::domain::rule::{ActionKind, AutomationRule, OwnerId, RuleId};
use crate::errors::DomainError;
use crate::safety::SkipReason;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Skipped,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(DomainError::UnknownExecutionStatus(other.to_string())),
        }
    }
}

/// One row of the execution ledger. Immutable once written; every non-Success
/// record carries a human-readable reason for the action log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionExecution {
    pub id: ExecutionId,
    pub rule_id: RuleId,
    pub owner_id: OwnerId,
    pub target_contact: Option<String>,
    pub action_kind: ActionKind,
    pub status: ExecutionStatus,
    pub reason: Option<String>,
    pub executed_at: DateTime<Utc>,
    pub details: Value,
}

impl ActionExecution {
    pub fn success(
        rule: &AutomationRule,
        event: &TriggerEvent,
        executed_at: DateTime<Utc>,
        details: Value,
    ) -> Self {
        Self {
            id: ExecutionId::generate(),
            rule_id: rule.id.clone(),
            owner_id: rule.owner_id.clone(),
            target_contact: event.contact().map(str::to_string),
            action_kind: rule.action_kind,
            status: ExecutionStatus::Success,
            reason: None,
            executed_at,
            details,
        }
    }

    pub fn failed(
        rule: &AutomationRule,
        event: &TriggerEvent,
        executed_at: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: ExecutionId::generate(),
            rule_id: rule.id.clone(),
            owner_id: rule.owner_id.clone(),
            target_contact: event.contact().map(str::to_string),
            action_kind: rule.action_kind,
            status: ExecutionStatus::Failed,
            reason: Some(reason.into()),
            executed_at,
            details: Value::Null,
        }
    }

    pub fn skipped(
        rule: &AutomationRule,
        event: &TriggerEvent,
        executed_at: DateTime<Utc>,
        reason: SkipReason,
    ) -> Self {
        Self {
            id: ExecutionId::generate(),
            rule_id: rule.id.clone(),
            owner_id: rule.owner_id.clone(),
            target_contact: event.contact().map(str::to_string),
            action_kind: rule.action_kind,
            status: ExecutionStatus::Skipped,
            reason: Some(reason.as_str().to_string()),
            executed_at,
            details: Value::Null,
        }
    }
}

/// Per-day status counts for the action log read API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyExecutionCounts {
    pub day: NaiveDate,
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
}
