use std::sync::Arc;
use std::time::Duration;

use frontdesk_core::actions::dispatcher::{ActionDispatcher, Collaborators};
use frontdesk_core::config::{AppConfig, ConfigError, LoadOptions};
use frontdesk_core::rules::engine::{ExecutionLog, RuleEngine, RuleRepository};
use frontdesk_core::rules::simulate::{EventHistory, Simulator};
use frontdesk_core::safety::{KillSwitch, SafetyRails};
use frontdesk_db::{
    connect_with_settings, migrations, ConnectionSettings, DbPool, SqlActionLogRepository,
    SqlAdmissionStore, SqlEventHistory, SqlRuleRepository,
};
use frontdesk_router::{HttpModelClient, InMemoryMetricsSink, RouterConfig, RoutingPipeline};
use thiserror::Error;
use tracing::info;

use crate::api::AppState;
use crate::collaborators::{HttpWebhookCaller, LoggingCollaborator};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("http client construction failed: {0}")]
    HttpClient(String),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_settings(&config.database.url, ConnectionSettings::from(&config.database))
            .await
            .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let model_client = HttpModelClient::new(
        config.model.base_url.clone(),
        config.model.api_key.clone(),
        Duration::from_secs(config.model.timeout_secs),
    )
    .map_err(|error| BootstrapError::HttpClient(error.to_string()))?;
    let pipeline = Arc::new(RoutingPipeline::new(
        Arc::new(model_client),
        Arc::new(InMemoryMetricsSink::new()),
        RouterConfig {
            max_attempts: config.routing.max_attempts,
            backoff_base_ms: config.routing.backoff_base_ms,
            backoff_factor: config.routing.backoff_factor,
            jitter_ms: config.routing.jitter_ms,
            token_budget: config.routing.token_budget,
        },
    ));

    let webhooks = HttpWebhookCaller::new(Duration::from_secs(10))
        .map_err(|error| BootstrapError::HttpClient(error.to_string()))?;
    let dispatcher = Arc::new(ActionDispatcher::with_default_handlers(Collaborators {
        mailer: Arc::new(LoggingCollaborator),
        crm: Arc::new(LoggingCollaborator),
        labeler: Arc::new(LoggingCollaborator),
        notifier: Arc::new(LoggingCollaborator),
        webhooks: Arc::new(webhooks),
        replies: pipeline,
    }));

    let kill_switch = KillSwitch::new();
    let safety = SafetyRails::new(
        kill_switch.clone(),
        Arc::new(SqlAdmissionStore::new(db_pool.clone(), config.limits.admission_limits())),
    );

    let rules: Arc<dyn RuleRepository> = Arc::new(SqlRuleRepository::new(db_pool.clone()));
    let log: Arc<dyn ExecutionLog> = Arc::new(SqlActionLogRepository::new(db_pool.clone()));
    let history: Arc<dyn EventHistory> = Arc::new(SqlEventHistory::new(db_pool.clone()));

    let engine = Arc::new(RuleEngine::new(rules.clone(), safety, dispatcher, log.clone()));
    let simulator = Arc::new(Simulator::new(rules.clone(), history.clone()));

    let state = AppState { engine, simulator, rules, log, history, kill_switch };

    info!(
        event_name = "system.bootstrap.complete",
        correlation_id = "bootstrap",
        "application bootstrap complete"
    );

    Ok(Application { config, db_pool, state })
}
