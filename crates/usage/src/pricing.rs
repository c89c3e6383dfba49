//! Static model → price table. Kept as one small, hand-editable table
//! rather than fetched or computed, per the billing-accuracy note: this
//! is configuration that happens to live in source, not logic.

/// Dollars per token, by category, for one model family.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_creation: f64,
}

/// Prefix-matched against the `model` field (e.g. `claude-3-5-sonnet-20241022`
/// matches `claude-3-5-sonnet`). Longest match wins. Unknown models price
/// at zero rather than erroring — a billing gap should never fail a request.
const TABLE: &[(&str, ModelPricing)] = &[
    (
        "claude-opus-4",
        ModelPricing {
            input: 15.0 / 1_000_000.0,
            output: 75.0 / 1_000_000.0,
            cache_read: 1.5 / 1_000_000.0,
            cache_creation: 18.75 / 1_000_000.0,
        },
    ),
    (
        "claude-3-7-sonnet",
        ModelPricing {
            input: 3.0 / 1_000_000.0,
            output: 15.0 / 1_000_000.0,
            cache_read: 0.3 / 1_000_000.0,
            cache_creation: 3.75 / 1_000_000.0,
        },
    ),
    (
        "claude-3-5-sonnet",
        ModelPricing {
            input: 3.0 / 1_000_000.0,
            output: 15.0 / 1_000_000.0,
            cache_read: 0.3 / 1_000_000.0,
            cache_creation: 3.75 / 1_000_000.0,
        },
    ),
    (
        "claude-3-5-haiku",
        ModelPricing {
            input: 0.8 / 1_000_000.0,
            output: 4.0 / 1_000_000.0,
            cache_read: 0.08 / 1_000_000.0,
            cache_creation: 1.0 / 1_000_000.0,
        },
    ),
    (
        "claude-3-haiku",
        ModelPricing {
            input: 0.25 / 1_000_000.0,
            output: 1.25 / 1_000_000.0,
            cache_read: 0.03 / 1_000_000.0,
            cache_creation: 0.3 / 1_000_000.0,
        },
    ),
    (
        "claude-3-opus",
        ModelPricing {
            input: 15.0 / 1_000_000.0,
            output: 75.0 / 1_000_000.0,
            cache_read: 1.5 / 1_000_000.0,
            cache_creation: 18.75 / 1_000_000.0,
        },
    ),
];

/// Looks up pricing by longest-prefix match; unknown models return `None`
/// (callers treat that as zero cost).
pub fn pricing_for(model: &str) -> Option<ModelPricing> {
    TABLE
        .iter()
        .filter(|(prefix, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, pricing)| *pricing)
}

/// Computes total USD cost for a usage snapshot; unknown models cost $0.
pub fn cost_usd(
    model: &str,
    input_tokens: u64,
    output_tokens: u64,
    cache_read_tokens: u64,
    cache_creation_tokens: u64,
) -> f64 {
    match pricing_for(model) {
        Some(p) => {
            input_tokens as f64 * p.input
                + output_tokens as f64 * p.output
                + cache_read_tokens as f64 * p.cache_read
                + cache_creation_tokens as f64 * p.cache_creation
        }
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_prices_nonzero() {
        let cost = cost_usd("claude-3-5-sonnet-20241022", 1_000_000, 1_000_000, 0, 0);
        assert!((cost - 18.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_costs_zero() {
        assert_eq!(cost_usd("some-future-model", 1000, 1000, 0, 0), 0.0);
    }

    #[test]
    fn longest_prefix_wins() {
        // "claude-3-5-haiku" must not be shadowed by a shorter "claude-3" prefix.
        let pricing = pricing_for("claude-3-5-haiku-20241022").unwrap();
        assert!((pricing.input - 0.8 / 1_000_000.0).abs() < 1e-12);
    }
}
