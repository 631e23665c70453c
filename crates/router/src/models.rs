//! Static model table: which model serves each intent, what it may cost,
//! and how it is invoked.

use frontdesk_core::domain::routing::{Intent, ModelTier};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

pub const CHEAP_MODEL: &str = "starling-lite";
pub const PREMIUM_MODEL: &str = "starling-pro";

/// Premium completions rarely come back faster than this; requests that
/// need to be quicker are served from the cheap tier instead.
pub const PREMIUM_LATENCY_FLOOR_MS: u64 = 1_000;

/// Invocation parameters for one intent.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSpec {
    pub model: &'static str,
    pub tier: ModelTier,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Fixed intent -> model lookup. Email replies get the premium tier;
/// everything else runs on the cheap tier.
pub fn spec_for_intent(intent: Intent) -> ModelSpec {
    match intent {
        Intent::EmailReply => ModelSpec {
            model: PREMIUM_MODEL,
            tier: ModelTier::Premium,
            max_tokens: 1_024,
            temperature: 0.7,
        },
        Intent::Classification => ModelSpec {
            model: CHEAP_MODEL,
            tier: ModelTier::Cheap,
            max_tokens: 64,
            temperature: 0.0,
        },
        Intent::Extraction => ModelSpec {
            model: CHEAP_MODEL,
            tier: ModelTier::Cheap,
            max_tokens: 512,
            temperature: 0.0,
        },
        Intent::Summarization => ModelSpec {
            model: CHEAP_MODEL,
            tier: ModelTier::Cheap,
            max_tokens: 512,
            temperature: 0.3,
        },
        Intent::General => ModelSpec {
            model: CHEAP_MODEL,
            tier: ModelTier::Cheap,
            max_tokens: 512,
            temperature: 0.5,
        },
    }
}

/// Intent lookup with the latency requirement applied: a requirement the
/// premium tier cannot meet downgrades the call to the cheap model.
pub fn spec_for_request(intent: Intent, latency_requirement_ms: Option<u64>) -> ModelSpec {
    let spec = spec_for_intent(intent);
    match latency_requirement_ms {
        Some(required)
            if spec.tier == ModelTier::Premium && required < PREMIUM_LATENCY_FLOOR_MS =>
        {
            ModelSpec { model: CHEAP_MODEL, tier: ModelTier::Cheap, ..spec }
        }
        _ => spec,
    }
}

/// Models an intent's result may legitimately report in `model_used`.
pub fn allowed_models(intent: Intent) -> &'static [&'static str] {
    match spec_for_intent(intent).tier {
        ModelTier::Cheap => &[CHEAP_MODEL],
        // Premium intents may be downgraded by a latency requirement.
        ModelTier::Premium => &[CHEAP_MODEL, PREMIUM_MODEL],
    }
}

/// Per-1k-token prices in USD: (input, output).
fn prices_per_1k(model: &str) -> (Decimal, Decimal) {
    match model {
        PREMIUM_MODEL => (dec(0.003), dec(0.015)),
        // Unknown models are priced like the cheap tier so cost accounting
        // never silently reports zero.
        _ => (dec(0.000_25), dec(0.001_25)),
    }
}

fn dec(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

pub fn cost_usd(model: &str, tokens_in: u64, tokens_out: u64) -> Decimal {
    let (price_in, price_out) = prices_per_1k(model);
    let thousand = Decimal::from(1_000);
    (Decimal::from(tokens_in) * price_in + Decimal::from(tokens_out) * price_out) / thousand
}

/// Worst-case cost for a spec, used for the pre-invocation budget check:
/// a full prompt at the token budget plus a maximal completion.
pub fn estimated_cost(spec: &ModelSpec, prompt_tokens: u64) -> Decimal {
    cost_usd(spec.model, prompt_tokens, u64::from(spec.max_tokens))
}

#[cfg(test)]
mod tests {
    use frontdesk_core::domain::routing::Intent;
    use rust_decimal::Decimal;

    use super::{
        allowed_models, cost_usd, spec_for_intent, spec_for_request, CHEAP_MODEL,
        PREMIUM_LATENCY_FLOOR_MS, PREMIUM_MODEL,
    };

    #[test]
    fn email_reply_is_the_only_premium_intent() {
        for intent in [
            Intent::Classification,
            Intent::Extraction,
            Intent::Summarization,
            Intent::General,
        ] {
            assert_eq!(spec_for_intent(intent).model, CHEAP_MODEL, "{intent:?}");
        }
        assert_eq!(spec_for_intent(Intent::EmailReply).model, PREMIUM_MODEL);
    }

    #[test]
    fn every_spec_model_is_in_its_allowed_set() {
        for intent in [
            Intent::Classification,
            Intent::EmailReply,
            Intent::Extraction,
            Intent::Summarization,
            Intent::General,
        ] {
            let spec = spec_for_intent(intent);
            assert!(allowed_models(intent).contains(&spec.model));
        }
    }

    #[test]
    fn tight_latency_requirements_downgrade_premium_intents() {
        let tight = spec_for_request(Intent::EmailReply, Some(PREMIUM_LATENCY_FLOOR_MS - 1));
        assert_eq!(tight.model, CHEAP_MODEL);

        let relaxed = spec_for_request(Intent::EmailReply, Some(PREMIUM_LATENCY_FLOOR_MS));
        assert_eq!(relaxed.model, PREMIUM_MODEL);

        // Cheap intents have nowhere further down to go.
        assert_eq!(spec_for_request(Intent::General, Some(1)).model, CHEAP_MODEL);
        assert_eq!(spec_for_request(Intent::EmailReply, None).model, PREMIUM_MODEL);
    }

    #[test]
    fn cost_scales_with_both_token_directions() {
        let base = cost_usd(PREMIUM_MODEL, 1_000, 0);
        let with_output = cost_usd(PREMIUM_MODEL, 1_000, 1_000);
        assert!(with_output > base);
        assert!(base > Decimal::ZERO);
    }

    #[test]
    fn premium_tokens_cost_more_than_cheap_tokens() {
        assert!(cost_usd(PREMIUM_MODEL, 1_000, 1_000) > cost_usd(CHEAP_MODEL, 1_000, 1_000));
    }
}
