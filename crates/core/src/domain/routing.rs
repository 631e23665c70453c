use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Classified purpose of an AI call. Closed set; intent detection can never
/// produce a value outside it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Classification,
    EmailReply,
    Extraction,
    Summarization,
    General,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::EmailReply => "email_reply",
            Self::Extraction => "extraction",
            Self::Summarization => "summarization",
            Self::General => "general",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Cheap,
    Premium,
}

/// Terminal routing failures. Transient provider errors are retried inside
/// the pipeline and surface only as `ProviderError` after exhaustion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingErrorKind {
    BudgetExceeded,
    ValidationFailed,
    ProviderError,
}

impl RoutingErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BudgetExceeded => "budget_exceeded",
            Self::ValidationFailed => "validation_failed",
            Self::ProviderError => "provider_error",
        }
    }
}

/// Structural expectation for the model output: a JSON object carrying at
/// least the listed top-level keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSchema {
    pub required_keys: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingRequest {
    pub input_text: String,
    pub intent: Option<Intent>,
    pub cost_budget: Option<Decimal>,
    pub latency_requirement_ms: Option<u64>,
    pub output_schema: Option<OutputSchema>,
    /// Merged into the prompt in key order, so routing stays reproducible.
    pub context: BTreeMap<String, String>,
}

impl RoutingRequest {
    pub fn new(input_text: impl Into<String>) -> Self {
        Self {
            input_text: input_text.into(),
            intent: None,
            cost_budget: None,
            latency_requirement_ms: None,
            output_schema: None,
            context: BTreeMap::new(),
        }
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = Some(intent);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingResult {
    pub success: bool,
    pub content: String,
    pub intent: Intent,
    pub model_used: String,
    pub tokens_used: u64,
    pub cost_usd: Decimal,
    pub latency_ms: u64,
    pub trace_id: String,
    /// True only when an output schema was supplied and the content passed it.
    pub validated: bool,
    pub error_kind: Option<RoutingErrorKind>,
}
