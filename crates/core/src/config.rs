use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::safety::AdmissionLimits;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub model: ModelConfig,
    pub routing: RoutingConfig,
    pub limits: LimitsConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Upstream model gateway the routing pipeline talks to.
#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RoutingConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: u32,
    pub jitter_ms: u64,
    pub token_budget: u32,
}

/// Safety-rail caps. Deserializes straight into `AdmissionLimits`.
#[derive(Clone, Debug)]
pub struct LimitsConfig {
    pub owner_action_cap: u32,
    pub owner_window_secs: u64,
    pub contact_daily_cap: u32,
    pub dedup_ttl_secs: u64,
}

impl LimitsConfig {
    pub fn admission_limits(&self) -> AdmissionLimits {
        AdmissionLimits {
            owner_action_cap: self.owner_action_cap,
            owner_window_secs: self.owner_window_secs,
            contact_daily_cap: self.contact_daily_cap,
            dedup_ttl_secs: self.dedup_ttl_secs,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub model_base_url: Option<String>,
    pub model_api_key: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://frontdesk.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            model: ModelConfig {
                base_url: "http://localhost:8901".to_string(),
                api_key: None,
                timeout_secs: 30,
            },
            routing: RoutingConfig {
                max_attempts: 3,
                backoff_base_ms: 1_000,
                backoff_factor: 2,
                jitter_ms: 1_000,
                token_budget: 4_000,
            },
            limits: LimitsConfig {
                owner_action_cap: 50,
                owner_window_secs: 300,
                contact_daily_cap: 2,
                dedup_ttl_secs: 7 * 24 * 60 * 60,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("frontdesk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(model) = patch.model {
            if let Some(base_url) = model.base_url {
                self.model.base_url = base_url;
            }
            if let Some(api_key_value) = model.api_key {
                self.model.api_key = Some(secret_value(api_key_value));
            }
            if let Some(timeout_secs) = model.timeout_secs {
                self.model.timeout_secs = timeout_secs;
            }
        }

        if let Some(routing) = patch.routing {
            if let Some(max_attempts) = routing.max_attempts {
                self.routing.max_attempts = max_attempts;
            }
            if let Some(backoff_base_ms) = routing.backoff_base_ms {
                self.routing.backoff_base_ms = backoff_base_ms;
            }
            if let Some(backoff_factor) = routing.backoff_factor {
                self.routing.backoff_factor = backoff_factor;
            }
            if let Some(jitter_ms) = routing.jitter_ms {
                self.routing.jitter_ms = jitter_ms;
            }
            if let Some(token_budget) = routing.token_budget {
                self.routing.token_budget = token_budget;
            }
        }

        if let Some(limits) = patch.limits {
            if let Some(owner_action_cap) = limits.owner_action_cap {
                self.limits.owner_action_cap = owner_action_cap;
            }
            if let Some(owner_window_secs) = limits.owner_window_secs {
                self.limits.owner_window_secs = owner_window_secs;
            }
            if let Some(contact_daily_cap) = limits.contact_daily_cap {
                self.limits.contact_daily_cap = contact_daily_cap;
            }
            if let Some(dedup_ttl_secs) = limits.dedup_ttl_secs {
                self.limits.dedup_ttl_secs = dedup_ttl_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("FRONTDESK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("FRONTDESK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("FRONTDESK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("FRONTDESK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FRONTDESK_MODEL_BASE_URL") {
            self.model.base_url = value;
        }
        if let Some(value) = read_env("FRONTDESK_MODEL_API_KEY") {
            self.model.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("FRONTDESK_MODEL_TIMEOUT_SECS") {
            self.model.timeout_secs = parse_u64("FRONTDESK_MODEL_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FRONTDESK_ROUTING_MAX_ATTEMPTS") {
            self.routing.max_attempts = parse_u32("FRONTDESK_ROUTING_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_ROUTING_TOKEN_BUDGET") {
            self.routing.token_budget = parse_u32("FRONTDESK_ROUTING_TOKEN_BUDGET", &value)?;
        }

        if let Some(value) = read_env("FRONTDESK_LIMITS_OWNER_ACTION_CAP") {
            self.limits.owner_action_cap = parse_u32("FRONTDESK_LIMITS_OWNER_ACTION_CAP", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_LIMITS_CONTACT_DAILY_CAP") {
            self.limits.contact_daily_cap =
                parse_u32("FRONTDESK_LIMITS_CONTACT_DAILY_CAP", &value)?;
        }

        if let Some(value) = read_env("FRONTDESK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("FRONTDESK_SERVER_PORT") {
            self.server.port = parse_u16("FRONTDESK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("FRONTDESK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("FRONTDESK_LOGGING_LEVEL").or_else(|| read_env("FRONTDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("FRONTDESK_LOGGING_FORMAT").or_else(|| read_env("FRONTDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(model_base_url) = overrides.model_base_url {
            self.model.base_url = model_base_url;
        }
        if let Some(model_api_key) = overrides.model_api_key {
            self.model.api_key = Some(secret_value(model_api_key));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_model(&self.model)?;
        validate_routing(&self.routing)?;
        validate_limits(&self.limits)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("frontdesk.toml"), PathBuf::from("config/frontdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_model(model: &ModelConfig) -> Result<(), ConfigError> {
    let base_url = model.base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "model.base_url must start with http:// or https://".to_string(),
        ));
    }

    if model.timeout_secs == 0 || model.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "model.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if let Some(api_key) = &model.api_key {
        if api_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "model.api_key must not be blank when set".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_routing(routing: &RoutingConfig) -> Result<(), ConfigError> {
    if routing.max_attempts == 0 || routing.max_attempts > 10 {
        return Err(ConfigError::Validation(
            "routing.max_attempts must be in range 1..=10".to_string(),
        ));
    }

    if routing.backoff_base_ms == 0 {
        return Err(ConfigError::Validation(
            "routing.backoff_base_ms must be greater than zero".to_string(),
        ));
    }

    if routing.backoff_factor == 0 {
        return Err(ConfigError::Validation(
            "routing.backoff_factor must be greater than zero".to_string(),
        ));
    }

    if routing.token_budget == 0 {
        return Err(ConfigError::Validation(
            "routing.token_budget must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_limits(limits: &LimitsConfig) -> Result<(), ConfigError> {
    if limits.owner_action_cap == 0 {
        return Err(ConfigError::Validation(
            "limits.owner_action_cap must be greater than zero".to_string(),
        ));
    }

    if limits.owner_window_secs == 0 {
        return Err(ConfigError::Validation(
            "limits.owner_window_secs must be greater than zero".to_string(),
        ));
    }

    if limits.contact_daily_cap == 0 {
        return Err(ConfigError::Validation(
            "limits.contact_daily_cap must be greater than zero".to_string(),
        ));
    }

    if limits.dedup_ttl_secs < 60 {
        return Err(ConfigError::Validation(
            "limits.dedup_ttl_secs must be at least 60".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation(
            "server.port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    model: Option<ModelPatch>,
    routing: Option<RoutingPatch>,
    limits: Option<LimitsPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RoutingPatch {
    max_attempts: Option<u32>,
    backoff_base_ms: Option<u64>,
    backoff_factor: Option<u32>,
    jitter_ms: Option<u64>,
    token_budget: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LimitsPatch {
    owner_action_cap: Option<u32>,
    owner_window_secs: Option<u64>,
    contact_daily_cap: Option<u32>,
    dedup_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
