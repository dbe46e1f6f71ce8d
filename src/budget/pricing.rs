//! Model pricing table and cost estimation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Fixed prompt overhead assumed by the pre-call estimate.
pub const ESTIMATE_BASE_INPUT_TOKENS: u64 = 500;
/// Additional prompt tokens assumed per requested track.
pub const ESTIMATE_INPUT_TOKENS_PER_TRACK: u64 = 50;
/// Completion tokens assumed per requested track.
pub const ESTIMATE_OUTPUT_TOKENS_PER_TRACK: u64 = 100;

/// Per-model rates in USD per 1,000 tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingInfo {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl PricingInfo {
    pub fn per_1k(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// Cost in USD for the given token counts.
    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_per_1k
    }
}

/// Token and cost projection made before a call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostEstimate {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// Pricing table keyed by model name, with a fallback row for unknown models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPricing {
    models: HashMap<String, PricingInfo>,
    default: PricingInfo,
}

impl ModelPricing {
    /// Empty table that prices every model with `default`.
    pub fn with_default(default: PricingInfo) -> Self {
        Self {
            models: HashMap::new(),
            default,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>, pricing: PricingInfo) -> Self {
        self.models.insert(model.into(), pricing);
        self
    }

    /// Rates for `model`, falling back to the default row.
    pub fn get_pricing(&self, model: &str) -> PricingInfo {
        self.models.get(model).copied().unwrap_or(self.default)
    }

    pub fn is_known(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    pub fn models(&self) -> impl Iterator<Item = (&str, &PricingInfo)> {
        self.models.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Cost computed from actual reported token counts.
    pub fn actual_cost(&self, input_tokens: u64, output_tokens: u64, model: &str) -> f64 {
        self.get_pricing(model)
            .calculate_cost(input_tokens, output_tokens)
    }

    /// Linear pre-call projection for a request of `target_count` tracks.
    pub fn estimate(&self, target_count: usize, model: &str) -> CostEstimate {
        let count = target_count as u64;
        let input_tokens = ESTIMATE_BASE_INPUT_TOKENS + ESTIMATE_INPUT_TOKENS_PER_TRACK * count;
        let output_tokens = ESTIMATE_OUTPUT_TOKENS_PER_TRACK * count;
        CostEstimate {
            input_tokens,
            output_tokens,
            cost_usd: self.actual_cost(input_tokens, output_tokens, model),
        }
    }
}

impl Default for ModelPricing {
    fn default() -> Self {
        Self::with_default(PricingInfo::per_1k(0.003, 0.015))
            .with_model("anthropic/claude-sonnet-4.5", PricingInfo::per_1k(0.003, 0.015))
            .with_model("anthropic/claude-3.5-haiku", PricingInfo::per_1k(0.0008, 0.004))
            .with_model("anthropic/claude-opus-4", PricingInfo::per_1k(0.015, 0.075))
            .with_model("openai/gpt-4o", PricingInfo::per_1k(0.0025, 0.01))
            .with_model("openai/gpt-4o-mini", PricingInfo::per_1k(0.00015, 0.0006))
            .with_model("google/gemini-2.0-flash-001", PricingInfo::per_1k(0.0001, 0.0004))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actual_cost_matches_rates_for_every_model() {
        let pricing = ModelPricing::default();
        for (model, rates) in pricing.models() {
            for (input, output) in [(0u64, 0u64), (1000, 0), (1234, 5678), (100_000, 2_500)] {
                let expected = (input as f64 / 1000.0) * rates.input_per_1k
                    + (output as f64 / 1000.0) * rates.output_per_1k;
                let actual = pricing.actual_cost(input, output, model);
                assert!((actual - expected).abs() < 1e-12, "{model}: {actual} != {expected}");
            }
        }
    }

    #[test]
    fn test_unknown_model_uses_default_row() {
        let pricing = ModelPricing::with_default(PricingInfo::per_1k(1.0, 2.0));
        assert!(!pricing.is_known("mystery/model"));
        assert!((pricing.actual_cost(1000, 1000, "mystery/model") - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_estimate_uses_linear_token_model() {
        let pricing = ModelPricing::with_default(PricingInfo::per_1k(1.0, 1.0));
        let estimate = pricing.estimate(10, "any");
        assert_eq!(estimate.input_tokens, 1000);
        assert_eq!(estimate.output_tokens, 1000);
        assert!((estimate.cost_usd - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_estimate_strictly_increasing_in_track_count() {
        let pricing = ModelPricing::default();
        for model in ["anthropic/claude-sonnet-4.5", "openai/gpt-4o-mini", "unknown"] {
            let mut previous = pricing.estimate(1, model).cost_usd;
            for count in 2..=60 {
                let current = pricing.estimate(count, model).cost_usd;
                assert!(current > previous, "{model} not increasing at {count}");
                previous = current;
            }
        }
    }
}
