pub mod client;
pub mod models;
pub mod pipeline;

pub use client::{HttpModelClient, ModelClient, ModelClientError, ModelResponse, ScriptedModelClient};
pub use models::{
    allowed_models, cost_usd, spec_for_intent, spec_for_request, ModelSpec, CHEAP_MODEL,
    PREMIUM_LATENCY_FLOOR_MS, PREMIUM_MODEL,
};
pub use pipeline::{
    backoff_delay, InMemoryMetricsSink, MetricsSink, RouterConfig, RoutingPipeline, RoutingSample,
};
