use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub String);

/// Business occurrences a rule can react to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    EmailReceived,
    EmailSent,
    LeadCreated,
    LeadStageChanged,
    TimeBased,
    KeywordDetected,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmailReceived => "email_received",
            Self::EmailSent => "email_sent",
            Self::LeadCreated => "lead_created",
            Self::LeadStageChanged => "lead_stage_changed",
            Self::TimeBased => "time_based",
            Self::KeywordDetected => "keyword_detected",
        }
    }
}

impl std::str::FromStr for TriggerKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "email_received" => Ok(Self::EmailReceived),
            "email_sent" => Ok(Self::EmailSent),
            "lead_created" => Ok(Self::LeadCreated),
            "lead_stage_changed" => Ok(Self::LeadStageChanged),
            "time_based" => Ok(Self::TimeBased),
            "keyword_detected" => Ok(Self::KeywordDetected),
            other => Err(DomainError::UnknownTriggerKind(other.to_string())),
        }
    }
}

/// Side effects a rule can request. Closed set so an unhandled kind is a
/// compile-time error in the dispatcher, not a silent no-op.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SendEmail,
    UpdateLeadStage,
    AddLeadActivity,
    ApplyLabel,
    ArchiveEmail,
    CreateTask,
    SendNotification,
    ScheduleFollowUp,
    TriggerWebhook,
    GenerateAiReply,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendEmail => "send_email",
            Self::UpdateLeadStage => "update_lead_stage",
            Self::AddLeadActivity => "add_lead_activity",
            Self::ApplyLabel => "apply_label",
            Self::ArchiveEmail => "archive_email",
            Self::CreateTask => "create_task",
            Self::SendNotification => "send_notification",
            Self::ScheduleFollowUp => "schedule_follow_up",
            Self::TriggerWebhook => "trigger_webhook",
            Self::GenerateAiReply => "generate_ai_reply",
        }
    }

    pub const ALL: [ActionKind; 10] = [
        Self::SendEmail,
        Self::UpdateLeadStage,
        Self::AddLeadActivity,
        Self::ApplyLabel,
        Self::ArchiveEmail,
        Self::CreateTask,
        Self::SendNotification,
        Self::ScheduleFollowUp,
        Self::TriggerWebhook,
        Self::GenerateAiReply,
    ];
}

impl std::str::FromStr for ActionKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "send_email" => Ok(Self::SendEmail),
            "update_lead_stage" => Ok(Self::UpdateLeadStage),
            "add_lead_activity" => Ok(Self::AddLeadActivity),
            "apply_label" => Ok(Self::ApplyLabel),
            "archive_email" => Ok(Self::ArchiveEmail),
            "create_task" => Ok(Self::CreateTask),
            "send_notification" => Ok(Self::SendNotification),
            "schedule_follow_up" => Ok(Self::ScheduleFollowUp),
            "trigger_webhook" => Ok(Self::TriggerWebhook),
            "generate_ai_reply" => Ok(Self::GenerateAiReply),
            other => Err(DomainError::UnknownActionKind(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Active,
    Paused,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
        }
    }
}

impl std::str::FromStr for RuleStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            other => Err(DomainError::UnknownRuleStatus(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
}

/// One field check against the event payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: Value,
}

/// AND-combined condition set. There is deliberately no OR support.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub conditions: Vec<Condition>,
}

impl Predicate {
    pub fn new(conditions: Vec<Condition>) -> Self {
        Self { conditions }
    }
}

/// A user-defined trigger/action rule.
///
/// Rules are owned exclusively by their owner. The engine mutates only the
/// ledger fields (`execution_count`, `success_count`, `error_count`,
/// `last_executed_at`); everything else changes through rule CRUD.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: RuleId,
    pub owner_id: OwnerId,
    pub name: String,
    pub trigger_kind: TriggerKind,
    pub predicate: Predicate,
    pub action_kind: ActionKind,
    pub action_params: Map<String, Value>,
    pub status: RuleStatus,
    pub execution_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AutomationRule {
    /// execution_count must always equal success_count + error_count.
    /// Skips are not counted.
    pub fn ledger_consistent(&self) -> bool {
        self.execution_count == self.success_count + self.error_count
    }
}

/// An unsaved rule definition, accepted by the dry-run API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleDraft {
    pub owner_id: OwnerId,
    pub name: String,
    pub trigger_kind: TriggerKind,
    pub predicate: Predicate,
    pub action_kind: ActionKind,
    #[serde(default)]
    pub action_params: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::{ActionKind, RuleStatus, TriggerKind};

    #[test]
    fn trigger_kind_round_trips_through_strings() {
        for kind in [
            TriggerKind::EmailReceived,
            TriggerKind::EmailSent,
            TriggerKind::LeadCreated,
            TriggerKind::LeadStageChanged,
            TriggerKind::TimeBased,
            TriggerKind::KeywordDetected,
        ] {
            assert_eq!(kind.as_str().parse::<TriggerKind>().unwrap(), kind);
        }
    }

    #[test]
    fn action_kind_round_trips_through_strings() {
        for kind in ActionKind::ALL {
            assert_eq!(kind.as_str().parse::<ActionKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kinds_are_rejected() {
        assert!("email_recieved".parse::<TriggerKind>().is_err());
        assert!("send_mail".parse::<ActionKind>().is_err());
        assert!("deleted".parse::<RuleStatus>().is_err());
    }
}
