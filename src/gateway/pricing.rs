//! Token pricing.
//!
//! Rates come from the models configuration, in USD per one million tokens.
//! Costs are reported in USD rounded to six decimal places.

use serde::{Deserialize, Serialize};

use super::types::TokenUsage;

const TOKENS_PER_RATE_UNIT: f64 = 1_000_000.0;

/// Pricing information for a model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    /// USD per 1M input tokens.
    #[serde(default)]
    pub input_per_1m: Option<f64>,
    /// USD per 1M output tokens.
    #[serde(default)]
    pub output_per_1m: Option<f64>,
}

impl Pricing {
    pub const fn new(input_per_1m: f64, output_per_1m: f64) -> Self {
        Self {
            input_per_1m: Some(input_per_1m),
            output_per_1m: Some(output_per_1m),
        }
    }
}

/// Calculate the cost of one call.
///
/// Absent when there is no pricing or either rate is missing.
pub fn review_cost(tokens: TokenUsage, pricing: Option<&Pricing>) -> Option<f64> {
    let pricing = pricing?;
    let input_rate = pricing.input_per_1m?;
    let output_rate = pricing.output_per_1m?;

    let cost = tokens.input as f64 / TOKENS_PER_RATE_UNIT * input_rate
        + tokens.output as f64 / TOKENS_PER_RATE_UNIT * output_rate;
    Some(round_usd(cost))
}

/// Round a USD amount to six decimal places.
pub fn round_usd(usd: f64) -> f64 {
    (usd * 1e6).round() / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_review_cost() {
        // 100 input at $1/1M + 50 output at $2/1M = $0.0001 + $0.0001
        let cost = review_cost(TokenUsage::new(100, 50), Some(&Pricing::new(1.0, 2.0)));
        assert_eq!(cost, Some(0.0002));
    }

    #[test]
    fn test_review_cost_rounds_to_micro_dollars() {
        // 1 token at $0.15/1M = $0.00000015, below the rounding unit
        let cost = review_cost(TokenUsage::new(1, 0), Some(&Pricing::new(0.15, 0.6)));
        assert_eq!(cost, Some(0.0));

        let cost = review_cost(
            TokenUsage::new(1_000_000, 1_000_000),
            Some(&Pricing::new(0.15, 0.6)),
        );
        assert_eq!(cost, Some(0.75));
    }

    #[test]
    fn test_review_cost_absent_without_pricing() {
        assert_eq!(review_cost(TokenUsage::new(10, 10), None), None);

        let half = Pricing {
            input_per_1m: Some(1.0),
            output_per_1m: None,
        };
        assert_eq!(review_cost(TokenUsage::new(10, 10), Some(&half)), None);

        let other_half = Pricing {
            input_per_1m: None,
            output_per_1m: Some(1.0),
        };
        assert_eq!(review_cost(TokenUsage::new(10, 10), Some(&other_half)), None);
    }

    #[test]
    fn test_review_cost_monotonic_in_tokens() {
        let pricing = Pricing::new(3.0, 15.0);
        let steps = [0u64, 1_000, 10_000, 250_000, 1_000_000];
        for pair in steps.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            let input_lo = review_cost(TokenUsage::new(lo, 500), Some(&pricing)).unwrap();
            let input_hi = review_cost(TokenUsage::new(hi, 500), Some(&pricing)).unwrap();
            assert!(input_hi > input_lo, "{input_hi} <= {input_lo}");

            let output_lo = review_cost(TokenUsage::new(500, lo), Some(&pricing)).unwrap();
            let output_hi = review_cost(TokenUsage::new(500, hi), Some(&pricing)).unwrap();
            assert!(output_hi > output_lo, "{output_hi} <= {output_lo}");
        }
    }
}
