//! Property-based tests for lumen_core.
//!
//! Tokenizer and score-clamping invariants that must hold for arbitrary input.

use lumen_core::text::{content_tokens, is_stopword, keyword_terms, tokens};
use lumen_core::{Scores, SecurityAssessment};
use proptest::prelude::*;

fn arb_score() -> impl Strategy<Value = f32> {
    prop_oneof![
        -10.0f32..10.0,
        Just(f32::NAN),
        Just(f32::INFINITY),
        Just(f32::NEG_INFINITY),
    ]
}

proptest! {
    #[test]
    fn tokens_are_lowercase_and_nonempty(text in ".{0,200}") {
        for tok in tokens(&text) {
            prop_assert!(!tok.is_empty());
            prop_assert_eq!(tok.clone(), tok.to_lowercase());
        }
    }

    #[test]
    fn tokens_never_start_or_end_with_punctuation(text in "[a-zA-Z0-9 .,;:!?()'\"-]{0,120}") {
        for tok in tokens(&text) {
            let first = tok.chars().next().unwrap();
            let last = tok.chars().last().unwrap();
            prop_assert!(first.is_alphanumeric());
            prop_assert!(last.is_alphanumeric());
        }
    }

    #[test]
    fn content_tokens_contain_no_stopwords(text in "[a-zA-Z ]{0,200}") {
        for tok in content_tokens(&text) {
            prop_assert!(!is_stopword(&tok));
        }
    }

    #[test]
    fn keyword_terms_are_distinct_and_long_enough(text in "[a-zA-Z0-9 ]{0,200}", min_len in 1usize..6) {
        let terms = keyword_terms(&text, min_len);
        let mut seen = std::collections::HashSet::new();
        for t in &terms {
            prop_assert!(t.chars().count() >= min_len);
            prop_assert!(seen.insert(t.clone()), "duplicate term {}", t);
        }
    }

    #[test]
    fn clamped_scores_stay_in_unit_range(
        f in arb_score(), r in arb_score(), h in arb_score(), c in arb_score()
    ) {
        let s = Scores { faithfulness: f, relevance: r, helpfulness: h, context_adherence: c }.clamped();
        for v in [s.faithfulness, s.relevance, s.helpfulness, s.context_adherence] {
            prop_assert!((0.0..=1.0).contains(&v));
        }
        prop_assert!((0.0..=1.0).contains(&s.min()));
    }

    #[test]
    fn normalized_risk_stays_in_unit_range(risk in arb_score()) {
        let a = SecurityAssessment {
            is_safe: true,
            threat: "None".into(),
            risk_score: risk,
            reasoning: String::new(),
        }
        .normalized();
        prop_assert!((0.0..=1.0).contains(&a.risk_score));
    }
}
