use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use frontdesk_core::safety::KillSwitch;
use frontdesk_db::DbPool;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    kill_switch: KillSwitch,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub automation: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, kill_switch: KillSwitch) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(HealthState { db_pool, kill_switch })
}

/// Readiness is driven by the database alone. An engaged kill switch is an
/// operator decision, not an outage, so it is reported but stays 200.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let automation = automation_check(&state.kill_switch);
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        automation,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

fn automation_check(kill_switch: &KillSwitch) -> HealthCheck {
    if kill_switch.is_engaged() {
        HealthCheck {
            status: "paused",
            detail: "kill switch engaged; rule actions are skipped".to_string(),
        }
    } else {
        HealthCheck { status: "active", detail: "kill switch released".to_string() }
    }
}
