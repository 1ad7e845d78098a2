//! Model price list, in USD per million tokens.
//!
//! Lookups return per-token `(input, output)` prices. They feed
//! `estimated_cost_usd` on each decision and the cheapness ranking used to
//! head Simple fallback chains.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// `(model prefix, input $/Mtok, output $/Mtok)`. Matched on the longest
/// prefix so dated snapshots ("claude-3-5-haiku-20241022") resolve to their
/// family entry.
const PRICES: &[(&str, Decimal, Decimal)] = &[
    // OpenAI
    ("gpt-4o", dec!(2.5), dec!(10)),
    ("gpt-4o-mini", dec!(0.15), dec!(0.6)),
    ("gpt-4.1", dec!(2), dec!(8)),
    ("gpt-4.1-mini", dec!(0.4), dec!(1.6)),
    ("gpt-4.1-nano", dec!(0.1), dec!(0.4)),
    // Anthropic
    ("claude-3-haiku", dec!(0.25), dec!(1.25)),
    ("claude-3-5-haiku", dec!(0.8), dec!(4)),
    ("claude-3-5-sonnet", dec!(3), dec!(15)),
    ("claude-3-7-sonnet", dec!(3), dec!(15)),
    ("claude-sonnet-4", dec!(3), dec!(15)),
    ("claude-3-opus", dec!(15), dec!(75)),
    ("claude-opus-4", dec!(15), dec!(75)),
    // Google
    ("gemini-1.5-flash", dec!(0.075), dec!(0.3)),
    ("gemini-1.5-pro", dec!(1.25), dec!(5)),
    ("gemini-2.0-flash", dec!(0.1), dec!(0.4)),
    ("gemini-2.5-flash", dec!(0.3), dec!(2.5)),
    ("gemini-2.5-pro", dec!(1.25), dec!(10)),
];

/// Unknown models are priced like a mid-range standard model so they never
/// look cheapest by accident.
const FALLBACK_PER_MTOK: (Decimal, Decimal) = (dec!(2.5), dec!(10));

const PER_MILLION: Decimal = dec!(1000000);

fn per_token((input, output): (Decimal, Decimal)) -> (Decimal, Decimal) {
    (input / PER_MILLION, output / PER_MILLION)
}

/// Per-token `(input, output)` price for a known model. Provider prefixes
/// ("openai/gpt-4o") are ignored.
pub fn model_cost(model_id: &str) -> Option<(Decimal, Decimal)> {
    let id = model_id
        .rsplit_once('/')
        .map(|(_, name)| name)
        .unwrap_or(model_id)
        .to_ascii_lowercase();

    PRICES
        .iter()
        .filter(|(prefix, _, _)| id.starts_with(prefix))
        .max_by_key(|(prefix, _, _)| prefix.len())
        .map(|(_, input, output)| per_token((*input, *output)))
}

pub fn default_cost() -> (Decimal, Decimal) {
    per_token(FALLBACK_PER_MTOK)
}

/// Known price, or the fallback.
pub fn model_cost_or_default(model_id: &str) -> (Decimal, Decimal) {
    model_cost(model_id).unwrap_or_else(default_cost)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prices_are_per_token() {
        assert_eq!(
            model_cost("gpt-4o-mini"),
            Some((dec!(0.00000015), dec!(0.0000006)))
        );
    }

    #[test]
    fn longest_prefix_wins() {
        // "gpt-4o-mini" must not resolve to the "gpt-4o" row.
        assert_ne!(model_cost("gpt-4o-mini"), model_cost("gpt-4o"));
        assert_eq!(
            model_cost("claude-3-5-haiku-20241022"),
            model_cost("claude-3-5-haiku-latest")
        );
    }

    #[test]
    fn economy_models_are_cheaper_than_premium() {
        let (flash, _) = model_cost("gemini-2.0-flash").unwrap();
        let (haiku, _) = model_cost("claude-3-5-haiku-latest").unwrap();
        let (sonnet, _) = model_cost("claude-3-5-sonnet-latest").unwrap();
        assert!(flash < haiku);
        assert!(haiku < sonnet);
    }

    #[test]
    fn unknown_model_uses_fallback() {
        assert!(model_cost("some-totally-unknown-model-xyz").is_none());
        assert_eq!(
            model_cost_or_default("some-totally-unknown-model-xyz"),
            default_cost()
        );
    }

    #[test]
    fn provider_prefix_and_case_are_ignored() {
        assert_eq!(model_cost("openai/GPT-4o-mini"), model_cost("gpt-4o-mini"));
    }
}
