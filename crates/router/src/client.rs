//! Model invocation client: one HTTP call per attempt, with provider
//! failures classified into transient (retryable) and permanent.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw outcome of one model invocation. Cost is attributed later from the
/// static price table, so the gateway never has to report it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelResponse {
    pub content: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub latency_ms: u64,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ModelClientError {
    /// Timeouts, provider rate limiting, 5xx. Worth retrying.
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// Auth failures and malformed requests. Retrying cannot help.
    #[error("permanent provider failure: {0}")]
    Permanent(String),
}

impl ModelClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn invoke(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<ModelResponse, ModelClientError>;
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    content: String,
    tokens_in: u64,
    tokens_out: u64,
}

/// Client for an HTTP model gateway speaking a flat completion protocol.
pub struct HttpModelClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpModelClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ModelClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ModelClientError::Permanent(error.to_string()))?;
        Ok(Self { http, base_url: base_url.into(), api_key })
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn invoke(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<ModelResponse, ModelClientError> {
        let url = format!("{}/v1/completions", self.base_url.trim_end_matches('/'));
        let started = Instant::now();

        let mut request = self
            .http
            .post(&url)
            .json(&CompletionRequest { model, prompt, max_tokens, temperature });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() || error.is_connect() {
                ModelClientError::Transient(error.to_string())
            } else {
                ModelClientError::Permanent(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("gateway returned {status}: {body}");
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(ModelClientError::Transient(message))
            } else {
                Err(ModelClientError::Permanent(message))
            };
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|error| ModelClientError::Permanent(error.to_string()))?;

        Ok(ModelResponse {
            content: completion.content,
            tokens_in: completion.tokens_in,
            tokens_out: completion.tokens_out,
            latency_ms,
        })
    }
}

/// Test client that replays a scripted sequence of outcomes and records
/// every invocation it sees.
#[derive(Default)]
pub struct ScriptedModelClient {
    script: Mutex<Vec<Result<ModelResponse, ModelClientError>>>,
    invocations: Mutex<Vec<String>>,
}

impl ScriptedModelClient {
    pub fn new(outcomes: Vec<Result<ModelResponse, ModelClientError>>) -> Self {
        Self { script: Mutex::new(outcomes), invocations: Mutex::new(Vec::new()) }
    }

    pub fn succeeding_with(content: &str) -> Self {
        Self::new(vec![Ok(ModelResponse {
            content: content.to_string(),
            tokens_in: 100,
            tokens_out: 50,
            latency_ms: 20,
        })])
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().expect("invocation lock").len()
    }

    pub fn invoked_models(&self) -> Vec<String> {
        self.invocations.lock().expect("invocation lock").clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn invoke(
        &self,
        model: &str,
        _prompt: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<ModelResponse, ModelClientError> {
        self.invocations.lock().expect("invocation lock").push(model.to_string());
        let mut script = self.script.lock().expect("script lock");
        if script.is_empty() {
            return Err(ModelClientError::Transient("script exhausted".to_string()));
        }
        script.remove(0)
    }
}
