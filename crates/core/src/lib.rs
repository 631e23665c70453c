pub mod actions;
pub mod config;
pub mod domain;
pub mod errors;
pub mod rules;
pub mod safety;

pub use actions::{ActionDispatcher, Collaborators, DispatchOutcome};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::event::{DedupKey, TriggerEvent};
pub use domain::execution::{
    ActionExecution, DailyExecutionCounts, ExecutionId, ExecutionStatus,
};
pub use domain::routing::{
    Intent, ModelTier, OutputSchema, RoutingErrorKind, RoutingRequest, RoutingResult,
};
pub use domain::rule::{
    ActionKind, AutomationRule, Condition, ConditionOperator, OwnerId, Predicate, RuleDraft,
    RuleId, RuleStatus, TriggerKind,
};
pub use errors::{DomainError, StoreError};
pub use rules::{
    EventHistory, EventReport, ExecutionLog, RuleEngine, RuleRepository, SimulationReport,
    SimulationTarget, Simulator,
};
pub use safety::{
    Admission, AdmissionCheck, AdmissionLimits, AdmissionStore, AdmissionStoreError, KillSwitch,
    SafetyRails, SkipReason,
};
