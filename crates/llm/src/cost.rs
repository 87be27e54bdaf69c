//! Per-model token rates
//!
//! Rough USD estimates per 1K tokens. Unknown models fall back to the
//! cheapest tier so the budget still moves.

/// (model prefix, input per 1K tokens, output per 1K tokens)
const RATES: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.000_15, 0.000_6),
    ("gpt-4o", 0.005, 0.015),
    ("gpt-4", 0.03, 0.06),
    ("gpt-3.5-turbo", 0.001_5, 0.002),
];

const DEFAULT_RATE: (f64, f64) = (0.000_15, 0.000_6);

/// Estimate the USD cost of one exchange
pub fn estimate(model: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
    let (input, output) = RATES
        .iter()
        .find(|(prefix, _, _)| model.starts_with(prefix))
        .map(|(_, i, o)| (*i, *o))
        .unwrap_or(DEFAULT_RATE);

    (f64::from(prompt_tokens) / 1000.0) * input + (f64::from(completion_tokens) / 1000.0) * output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_model() {
        let cost = estimate("gpt-4o-mini", 1000, 1000);
        assert!((cost - 0.000_75).abs() < 1e-9);
    }

    #[test]
    fn test_prefix_match_prefers_longest_listed_first() {
        // gpt-4o-mini must not be billed at gpt-4o rates
        assert!(estimate("gpt-4o-mini-2024", 1000, 0) < estimate("gpt-4o", 1000, 0));
    }

    #[test]
    fn test_unknown_model_uses_default() {
        let cost = estimate("llama3", 2000, 0);
        assert!((cost - 0.000_3).abs() < 1e-9);
    }
}
