//! HTTP surface: event ingest, the action log read API, dry-run simulation,
//! and the kill-switch admin toggle.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use frontdesk_core::domain::event::TriggerEvent;
use frontdesk_core::domain::execution::{ActionExecution, DailyExecutionCounts};
use frontdesk_core::domain::rule::{OwnerId, RuleDraft, RuleId, TriggerKind};
use frontdesk_core::rules::engine::{ExecutionLog, RuleEngine, RuleRepository};
use frontdesk_core::rules::simulate::{
    EventHistory, SimulationError, SimulationReport, SimulationTarget, Simulator,
};
use frontdesk_core::safety::KillSwitch;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RuleEngine>,
    pub simulator: Arc<Simulator>,
    pub rules: Arc<dyn RuleRepository>,
    pub log: Arc<dyn ExecutionLog>,
    pub history: Arc<dyn EventHistory>,
    pub kill_switch: KillSwitch,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/events", post(ingest_event))
        .route("/api/rules/{id}/executions", get(rule_executions))
        .route("/api/simulate", post(simulate))
        .route("/api/admin/kill-switch", get(kill_switch_status))
        .route("/api/admin/kill-switch", put(set_kill_switch))
        .with_state(state)
}

#[derive(Clone, Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

fn api_error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (status, Json(ApiError { error: message.into() }))
}

fn internal_error(error: impl std::fmt::Display) -> (StatusCode, Json<ApiError>) {
    warn!(event_name = "api.internal_error", error = %error, "request failed");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

#[derive(Debug, Deserialize)]
pub struct IngestEventBody {
    pub owner_id: String,
    pub trigger_kind: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub occurred_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ExecutionSummary {
    pub rule_id: String,
    pub status: String,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IngestEventResponse {
    pub dedup_key: String,
    pub candidate_rules: usize,
    pub matched_rules: usize,
    pub executions: Vec<ExecutionSummary>,
}

pub async fn ingest_event(
    State(state): State<AppState>,
    Json(body): Json<IngestEventBody>,
) -> Result<Json<IngestEventResponse>, (StatusCode, Json<ApiError>)> {
    let kind: TriggerKind = body.trigger_kind.parse().map_err(|_| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("unknown trigger kind `{}`", body.trigger_kind),
        )
    })?;

    let event = TriggerEvent::new(
        kind,
        OwnerId(body.owner_id),
        body.payload,
        body.occurred_at.unwrap_or_else(Utc::now),
    );

    // Archive first so simulation replay sees every ingested event, even
    // those no rule matched.
    state.history.record(&event).await.map_err(internal_error)?;

    let report = state.engine.process_event(&event).await.map_err(internal_error)?;
    info!(
        event_name = "api.event_processed",
        owner_id = %event.owner_id.0,
        trigger_kind = event.kind.as_str(),
        matched_rules = report.matched_rules,
        "trigger event processed"
    );

    Ok(Json(IngestEventResponse {
        dedup_key: event.dedup_key.0.clone(),
        candidate_rules: report.candidate_rules,
        matched_rules: report.matched_rules,
        executions: report
            .executions
            .iter()
            .map(|execution| ExecutionSummary {
                rule_id: execution.rule_id.0.clone(),
                status: execution.status.as_str().to_string(),
                reason: execution.reason.clone(),
            })
            .collect(),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ExecutionsQuery {
    pub limit: Option<usize>,
    pub days: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ExecutionsResponse {
    pub rule_id: String,
    pub recent: Vec<ActionExecution>,
    pub daily: Vec<DailyExecutionCounts>,
}

pub async fn rule_executions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ExecutionsQuery>,
) -> Result<Json<ExecutionsResponse>, (StatusCode, Json<ApiError>)> {
    let rule_id = RuleId(id);
    let rule = state.rules.find_rule(&rule_id).await.map_err(internal_error)?;
    if rule.is_none() {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("rule `{}` not found", rule_id.0),
        ));
    }

    let limit = query.limit.unwrap_or(10).min(100);
    let since = Utc::now() - Duration::days(i64::from(query.days.unwrap_or(7).min(90)));

    let recent = state.log.recent(&rule_id, limit).await.map_err(internal_error)?;
    let daily = state.log.daily_counts(&rule_id, since).await.map_err(internal_error)?;

    Ok(Json(ExecutionsResponse { rule_id: rule_id.0, recent, daily }))
}

#[derive(Debug, Deserialize)]
pub struct SimulateBody {
    pub owner_id: String,
    pub days_back: u32,
    pub rule_id: Option<String>,
    pub draft: Option<RuleDraft>,
}

pub async fn simulate(
    State(state): State<AppState>,
    Json(body): Json<SimulateBody>,
) -> Result<Json<SimulationReport>, (StatusCode, Json<ApiError>)> {
    let target = match (body.rule_id, body.draft) {
        (Some(rule_id), _) => SimulationTarget::Saved(RuleId(rule_id)),
        (None, Some(draft)) => SimulationTarget::Draft(draft),
        (None, None) => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "either rule_id or draft is required",
            ));
        }
    };

    let owner_id = OwnerId(body.owner_id);
    let report = state
        .simulator
        .simulate(&owner_id, target, body.days_back)
        .await
        .map_err(|error| match error {
            SimulationError::InvalidWindow(_) => {
                api_error(StatusCode::BAD_REQUEST, error.to_string())
            }
            SimulationError::RuleNotFound(_) => {
                api_error(StatusCode::NOT_FOUND, error.to_string())
            }
            SimulationError::Store(store) => internal_error(store),
        })?;

    Ok(Json(report))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KillSwitchState {
    pub engaged: bool,
}

pub async fn kill_switch_status(State(state): State<AppState>) -> Json<KillSwitchState> {
    Json(KillSwitchState { engaged: state.kill_switch.is_engaged() })
}

pub async fn set_kill_switch(
    State(state): State<AppState>,
    Json(body): Json<KillSwitchState>,
) -> Json<KillSwitchState> {
    state.kill_switch.set(body.engaged);
    info!(
        event_name = "api.kill_switch_toggled",
        engaged = body.engaged,
        "kill switch state changed"
    );
    Json(KillSwitchState { engaged: state.kill_switch.is_engaged() })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode;
    use axum::Json;
    use chrono::Utc;
    use serde_json::{json, Map};

    use frontdesk_core::actions::dispatcher::ActionDispatcher;
    use frontdesk_core::actions::testing::RecordingCollaborators;
    use frontdesk_core::domain::rule::{
        ActionKind, AutomationRule, Condition, ConditionOperator, OwnerId, Predicate, RuleId,
        RuleStatus, TriggerKind,
    };
    use frontdesk_core::rules::engine::RuleEngine;
    use frontdesk_core::rules::memory::{
        InMemoryEventHistory, InMemoryExecutionLog, InMemoryRuleRepository,
    };
    use frontdesk_core::rules::simulate::Simulator;
    use frontdesk_core::safety::{
        AdmissionLimits, InMemoryAdmissionStore, KillSwitch, SafetyRails,
    };

    use super::{
        ingest_event, kill_switch_status, rule_executions, set_kill_switch, simulate, AppState,
        ExecutionsQuery, IngestEventBody, KillSwitchState, SimulateBody,
    };

    fn state() -> (AppState, Arc<InMemoryRuleRepository>, RecordingCollaborators) {
        let recording = RecordingCollaborators::new();
        let dispatcher = Arc::new(ActionDispatcher::with_default_handlers(
            recording.collaborators(),
        ));
        let rules = Arc::new(InMemoryRuleRepository::new());
        let log = Arc::new(InMemoryExecutionLog::new());
        let history = Arc::new(InMemoryEventHistory::new());
        let kill_switch = KillSwitch::new();
        let safety = SafetyRails::new(
            kill_switch.clone(),
            Arc::new(InMemoryAdmissionStore::new(AdmissionLimits::default())),
        );
        let engine = Arc::new(RuleEngine::new(rules.clone(), safety, dispatcher, log.clone()));
        let simulator = Arc::new(Simulator::new(rules.clone(), history.clone()));
        let state = AppState {
            engine,
            simulator,
            rules: rules.clone(),
            log,
            history,
            kill_switch,
        };
        (state, rules, recording)
    }

    fn pricing_rule(id: &str) -> AutomationRule {
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
            action_kind: ActionKind::GenerateAiReply,
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

    fn ingest_body(subject: &str) -> IngestEventBody {
        let mut payload = Map::new();
        payload.insert("sender_email".to_string(), json!("customer@example.com"));
        payload.insert("subject".to_string(), json!(subject));
        IngestEventBody {
            owner_id: "owner-1".to_string(),
            trigger_kind: "email_received".to_string(),
            payload,
            occurred_at: None,
        }
    }

    #[tokio::test]
    async fn ingest_processes_matching_rules_and_reports_executions() {
        let (state, rules, recording) = state();
        rules.insert(pricing_rule("rule-1")).await;

        let response = ingest_event(State(state), Json(ingest_body("Pricing question")))
            .await
            .expect("ingest");

        assert_eq!(response.0.matched_rules, 1);
        assert_eq!(response.0.executions.len(), 1);
        assert_eq!(response.0.executions[0].status, "success");
        assert_eq!(recording.sent_emails().len(), 1);
    }

    #[tokio::test]
    async fn ingest_rejects_unknown_trigger_kinds() {
        let (state, _rules, _recording) = state();
        let mut body = ingest_body("Pricing question");
        body.trigger_kind = "carrier_pigeon".to_string();

        let error = ingest_event(State(state), Json(body)).await.expect_err("must fail");

        assert_eq!(error.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ingest_archives_events_even_without_matching_rules() {
        let (state, _rules, _recording) = state();

        let response = ingest_event(State(state.clone()), Json(ingest_body("Pricing question")))
            .await
            .expect("ingest");
        assert_eq!(response.0.matched_rules, 0);

        // The archived event is visible to simulation replay.
        let report = simulate(
            State(state),
            Json(SimulateBody {
                owner_id: "owner-1".to_string(),
                days_back: 7,
                rule_id: None,
                draft: Some(frontdesk_core::domain::rule::RuleDraft {
                    owner_id: OwnerId("owner-1".to_string()),
                    name: "draft".to_string(),
                    trigger_kind: TriggerKind::EmailReceived,
                    predicate: Predicate::default(),
                    action_kind: ActionKind::SendNotification,
                    action_params: Map::new(),
                }),
            }),
        )
        .await
        .expect("simulate");

        assert_eq!(report.0.events_considered, 1);
        assert_eq!(report.0.would_trigger_count, 1);
    }

    #[tokio::test]
    async fn executions_endpoint_returns_recent_and_daily_counts() {
        let (state, rules, _recording) = state();
        rules.insert(pricing_rule("rule-1")).await;

        ingest_event(State(state.clone()), Json(ingest_body("Pricing question")))
            .await
            .expect("ingest");

        let response = rule_executions(
            State(state),
            Path("rule-1".to_string()),
            Query(ExecutionsQuery::default()),
        )
        .await
        .expect("executions");

        assert_eq!(response.0.recent.len(), 1);
        assert_eq!(response.0.daily.len(), 1);
        assert_eq!(response.0.daily[0].success, 1);
    }

    #[tokio::test]
    async fn executions_endpoint_404s_for_unknown_rules() {
        let (state, _rules, _recording) = state();

        let error = rule_executions(
            State(state),
            Path("ghost".to_string()),
            Query(ExecutionsQuery::default()),
        )
        .await
        .expect_err("must fail");

        assert_eq!(error.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn simulate_validates_the_window() {
        let (state, rules, _recording) = state();
        rules.insert(pricing_rule("rule-1")).await;

        let error = simulate(
            State(state),
            Json(SimulateBody {
                owner_id: "owner-1".to_string(),
                days_back: 0,
                rule_id: Some("rule-1".to_string()),
                draft: None,
            }),
        )
        .await
        .expect_err("must fail");

        assert_eq!(error.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn simulate_404s_for_unknown_saved_rules() {
        let (state, _rules, _recording) = state();

        let error = simulate(
            State(state),
            Json(SimulateBody {
                owner_id: "owner-1".to_string(),
                days_back: 7,
                rule_id: Some("ghost".to_string()),
                draft: None,
            }),
        )
        .await
        .expect_err("must fail");

        assert_eq!(error.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn kill_switch_toggle_skips_subsequent_actions() {
        let (state, rules, recording) = state();
        rules.insert(pricing_rule("rule-1")).await;

        set_kill_switch(State(state.clone()), Json(KillSwitchState { engaged: true })).await;
        let status = kill_switch_status(State(state.clone())).await;
        assert!(status.0.engaged);

        let response = ingest_event(State(state.clone()), Json(ingest_body("Pricing question")))
            .await
            .expect("ingest");
        assert_eq!(response.0.executions[0].status, "skipped");
        assert_eq!(response.0.executions[0].reason.as_deref(), Some("kill_switch_active"));
        assert!(recording.sent_emails().is_empty());

        // Releasing the switch restores normal processing.
        set_kill_switch(State(state.clone()), Json(KillSwitchState { engaged: false })).await;
        let response = ingest_event(State(state), Json(ingest_body("Pricing follow-up")))
            .await
            .expect("ingest");
        assert_eq!(response.0.executions[0].status, "success");
    }
}
