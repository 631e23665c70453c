//! Deterministic routing pipeline. Eight stages: preprocess, detect intent,
//! choose model, call model (the only impure stage), postprocess, validate,
//! log metrics, return.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use frontdesk_core::actions::ReplyGenerator;
use frontdesk_core::domain::routing::{
    Intent, OutputSchema, RoutingErrorKind, RoutingRequest, RoutingResult,
};
use rand::Rng;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::{ModelClient, ModelClientError, ModelResponse};
use crate::models::{estimated_cost, spec_for_request, ModelSpec};

/// Rough chars-per-token ratio used for truncation and cost estimation.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Clone, Debug)]
pub struct RouterConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: u32,
    pub jitter_ms: u64,
    /// Prompt budget in tokens; longer inputs are truncated, not rejected.
    pub token_budget: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_factor: 2,
            jitter_ms: 1_000,
            token_budget: 4_000,
        }
    }
}

/// Deterministic part of the retry delay: base * factor^attempt, where
/// attempt counts completed failures (0 for the first retry).
pub fn backoff_delay(config: &RouterConfig, attempt: u32) -> Duration {
    let exponent = attempt.min(16);
    let multiplier = u64::from(config.backoff_factor).saturating_pow(exponent);
    Duration::from_millis(config.backoff_base_ms.saturating_mul(multiplier))
}

/// One routed call, as reported to the metrics sink.
#[derive(Clone, Debug, PartialEq)]
pub struct RoutingSample {
    pub trace_id: String,
    pub intent: Intent,
    pub model: String,
    pub cost_usd: Decimal,
    pub latency_ms: u64,
    pub success: bool,
}

pub trait MetricsSink: Send + Sync {
    fn record(&self, sample: RoutingSample);
}

#[derive(Default)]
pub struct InMemoryMetricsSink {
    samples: Mutex<Vec<RoutingSample>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<RoutingSample> {
        self.samples.lock().expect("metrics lock").clone()
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn record(&self, sample: RoutingSample) {
        self.samples.lock().expect("metrics lock").push(sample);
    }
}

pub struct RoutingPipeline {
    client: Arc<dyn ModelClient>,
    metrics: Arc<dyn MetricsSink>,
    config: RouterConfig,
}

impl RoutingPipeline {
    pub fn new(
        client: Arc<dyn ModelClient>,
        metrics: Arc<dyn MetricsSink>,
        config: RouterConfig,
    ) -> Self {
        Self { client, metrics, config }
    }

    pub async fn route(&self, request: RoutingRequest) -> RoutingResult {
        let trace_id = Uuid::new_v4().to_string();

        // Stage 1: preprocess.
        let prompt = build_prompt(&request, self.config.token_budget);
        let prompt_tokens = (prompt.len() / CHARS_PER_TOKEN) as u64;

        // Stage 2: detect intent. The detector is a closed-set heuristic, so
        // an unset intent can never leave the routing table.
        let intent = request.intent.unwrap_or_else(|| detect_intent(&request));

        // Stage 3: choose model, honoring the latency requirement, and
        // enforce the cost budget before any provider call.
        let spec = spec_for_request(intent, request.latency_requirement_ms);
        if let Some(budget) = request.cost_budget {
            let estimate = estimated_cost(&spec, prompt_tokens);
            if estimate > budget {
                warn!(
                    event_name = "router.budget_exceeded",
                    trace_id = %trace_id,
                    intent = intent.as_str(),
                    model = spec.model,
                    "estimated cost exceeds the request budget"
                );
                return self.finish(failure(
                    RoutingErrorKind::BudgetExceeded,
                    intent,
                    &spec,
                    trace_id,
                ));
            }
        }

        // Stage 4: call the model with bounded retries.
        let response = match self.invoke_with_retries(&spec, &prompt, &trace_id).await {
            Ok(response) => response,
            Err(_) => {
                return self.finish(failure(
                    RoutingErrorKind::ProviderError,
                    intent,
                    &spec,
                    trace_id,
                ));
            }
        };

        // Stage 5: postprocess.
        let content = postprocess(intent, &response.content);

        // Stage 6: validate against the output schema, when one was given.
        let (validated, schema_error) = match &request.output_schema {
            Some(schema) => match validate_schema(schema, &content) {
                Ok(()) => (true, None),
                Err(missing) => {
                    warn!(
                        event_name = "router.validation_failed",
                        trace_id = %trace_id,
                        intent = intent.as_str(),
                        missing_key = %missing,
                        "model output failed schema validation"
                    );
                    (false, Some(RoutingErrorKind::ValidationFailed))
                }
            },
            None => (false, None),
        };

        let cost = crate::models::cost_usd(spec.model, response.tokens_in, response.tokens_out);
        self.finish(RoutingResult {
            success: schema_error.is_none(),
            content,
            intent,
            model_used: spec.model.to_string(),
            tokens_used: response.tokens_in + response.tokens_out,
            cost_usd: cost,
            latency_ms: response.latency_ms,
            trace_id,
            validated,
            error_kind: schema_error,
        })
    }

    async fn invoke_with_retries(
        &self,
        spec: &ModelSpec,
        prompt: &str,
        trace_id: &str,
    ) -> Result<ModelResponse, ModelClientError> {
        let mut attempt = 0;
        loop {
            match self.client.invoke(spec.model, prompt, spec.max_tokens, spec.temperature).await
            {
                Ok(response) => return Ok(response),
                Err(error) => {
                    attempt += 1;
                    if !error.is_transient() || attempt >= self.config.max_attempts {
                        warn!(
                            event_name = "router.provider_failed",
                            trace_id = %trace_id,
                            model = spec.model,
                            attempts = attempt,
                            error = %error,
                            "model invocation failed terminally"
                        );
                        return Err(error);
                    }

                    let mut delay = backoff_delay(&self.config, attempt - 1);
                    if self.config.jitter_ms > 0 {
                        let jitter = rand::thread_rng().gen_range(0..=self.config.jitter_ms);
                        delay += Duration::from_millis(jitter);
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Stages 7 and 8: emit metrics, then hand the result back.
    fn finish(&self, result: RoutingResult) -> RoutingResult {
        info!(
            event_name = "router.routed",
            trace_id = %result.trace_id,
            intent = result.intent.as_str(),
            model = %result.model_used,
            cost_usd = %result.cost_usd,
            latency_ms = result.latency_ms,
            success = result.success,
            "routing pipeline finished"
        );
        self.metrics.record(RoutingSample {
            trace_id: result.trace_id.clone(),
            intent: result.intent,
            model: result.model_used.clone(),
            cost_usd: result.cost_usd,
            latency_ms: result.latency_ms,
            success: result.success,
        });
        result
    }
}

#[async_trait]
impl ReplyGenerator for RoutingPipeline {
    async fn generate(&self, request: RoutingRequest) -> RoutingResult {
        self.route(request).await
    }
}

fn failure(
    kind: RoutingErrorKind,
    intent: Intent,
    spec: &ModelSpec,
    trace_id: String,
) -> RoutingResult {
    RoutingResult {
        success: false,
        content: String::new(),
        intent,
        model_used: spec.model.to_string(),
        tokens_used: 0,
        cost_usd: Decimal::ZERO,
        latency_ms: 0,
        trace_id,
        validated: false,
        error_kind: Some(kind),
    }
}

/// Truncates the input to the token budget and appends context fields in key
/// order. `BTreeMap` keeps the iteration sorted, so the same request always
/// produces the same prompt.
fn build_prompt(request: &RoutingRequest, token_budget: u32) -> String {
    let char_budget = token_budget as usize * CHARS_PER_TOKEN;
    let mut input = request.input_text.trim().to_string();
    if input.len() > char_budget {
        let mut cut = char_budget;
        while !input.is_char_boundary(cut) {
            cut -= 1;
        }
        input.truncate(cut);
    }

    let mut prompt = input;
    for (key, value) in &request.context {
        prompt.push('\n');
        prompt.push_str(key);
        prompt.push_str(": ");
        prompt.push_str(value);
    }
    prompt
}

/// Closed-set keyword heuristic for requests that arrive without an intent.
fn detect_intent(request: &RoutingRequest) -> Intent {
    let text = request.input_text.to_lowercase();
    if text.contains("summarize") || text.contains("summary") {
        Intent::Summarization
    } else if text.contains("extract") || text.contains("pull out") {
        Intent::Extraction
    } else if text.contains("classify") || text.contains("categorize") {
        Intent::Classification
    } else if request.context.contains_key("subject") || text.contains("reply to") {
        Intent::EmailReply
    } else {
        Intent::General
    }
}

fn postprocess(intent: Intent, content: &str) -> String {
    match intent {
        Intent::EmailReply => strip_markdown_fences(content),
        Intent::Extraction => extract_json(content).unwrap_or_else(|| content.trim().to_string()),
        _ => content.trim().to_string(),
    }
}

/// Drops a single wrapping ``` fence if the model returned one.
fn strip_markdown_fences(content: &str) -> String {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let Some(inner) = inner.strip_suffix("```") else {
        return trimmed.to_string();
    };
    // Skip a language tag on the opening fence.
    let inner = match inner.split_once('\n') {
        Some((first_line, rest)) if !first_line.trim().contains(' ') => rest,
        _ => inner,
    };
    inner.trim().to_string()
}

/// Re-serializes the first JSON object found in the content, if any.
fn extract_json(content: &str) -> Option<String> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }
    let candidate = &content[start..=end];
    let parsed: Value = serde_json::from_str(candidate).ok()?;
    serde_json::to_string(&parsed).ok()
}

/// Structural check: content must parse as a JSON object carrying every
/// required top-level key.
fn validate_schema(schema: &OutputSchema, content: &str) -> Result<(), String> {
    let parsed: Value =
        serde_json::from_str(content).map_err(|_| "content is not a JSON object".to_string())?;
    let Value::Object(object) = parsed else {
        return Err("content is not a JSON object".to_string());
    };
    for key in &schema.required_keys {
        if !object.contains_key(key) {
            return Err(key.clone());
        }
    }
    Ok(())
}
