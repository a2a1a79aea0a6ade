//! Property-based tests for lumen_reasoning.
//!
//! Grounding bounds, retry-hint parsing and step-input normalization must
//! hold for whatever a model sends back.

use lumen_core::{Metadata, Provenance, RetrievedPassage};
use lumen_reasoning::executor::{StepOutput, StepResult};
use lumen_reasoning::grounding::{grounding_score, score_against};
use lumen_reasoning::plan::StepInput;
use lumen_reasoning::token_budget::parse_retry_hint;
use proptest::prelude::*;
use serde_json::Value;

fn retrieved(text: String) -> StepResult {
    StepResult {
        step_id: 1,
        tool: "hybrid_retriever".into(),
        output: StepOutput::Passages(vec![RetrievedPassage {
            id: "p".into(),
            text,
            metadata: Metadata::new(),
            score: 0.9,
            provenance: Provenance::Dense,
        }]),
    }
}

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        ".{0,20}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::hash_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn grounding_is_a_fraction(response in ".{0,200}", context in ".{0,200}") {
        let g = grounding_score(&response, &[retrieved(context)]);
        prop_assert!((0.0..=1.0).contains(&g));
    }

    #[test]
    fn empty_context_grounds_nothing(response in ".{0,200}") {
        prop_assert_eq!(score_against(&response, ""), 0.0);
        prop_assert_eq!(grounding_score(&response, &[]), 0.0);
    }

    #[test]
    fn verbatim_copy_is_fully_grounded(words in prop::collection::vec("[a-z]{4,10}", 1..20)) {
        let text = words.join(" ");
        let g = score_against(&text, &text);
        // Stopword-only text has no content tokens and scores zero
        prop_assert!(g == 1.0 || g == 0.0);
    }

    #[test]
    fn retry_hint_never_panics(text in ".{0,80}", digits in "[0-9]{1,30}") {
        let _ = parse_retry_hint(&text);
        let _ = parse_retry_hint(&format!("Please try again in {}m{}s.", digits, digits));
    }

    #[test]
    fn retry_hint_reads_seconds(secs in 1u32..3600) {
        let hint = parse_retry_hint(&format!("Rate limit reached. Please try again in {}s.", secs));
        prop_assert_eq!(hint.map(|d| d.as_secs()), Some(secs as u64));
    }

    #[test]
    fn normalize_never_panics(value in arb_json()) {
        let null = value.is_null();
        let input: StepInput = serde_json::from_value(value).unwrap();
        let normalized = input.normalize();
        if null {
            prop_assert!(normalized.is_err());
        }
    }
}
