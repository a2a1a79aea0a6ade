//! Lexical-overlap hallucination proxy.
//!
//! The score is the share of the response's content tokens that also occur
//! as tokens of the tool outputs. It needs no model call.

use crate::executor::StepResult;
use lumen_core::text::{content_tokens, tokens};
use std::collections::HashSet;

/// Score `response` against the concatenated non-error step outputs.
pub fn grounding_score(response: &str, results: &[StepResult]) -> f32 {
    let context = results
        .iter()
        .filter_map(|r| r.output.context_text())
        .collect::<Vec<_>>()
        .join("\n");
    score_against(response, &context)
}

/// 0.0 when either side is empty. Otherwise in [0, 1].
pub fn score_against(response: &str, context: &str) -> f32 {
    let response_tokens: Vec<String> = content_tokens(response).collect();
    if response_tokens.is_empty() {
        return 0.0;
    }
    let context_tokens: HashSet<String> = tokens(context).collect();
    if context_tokens.is_empty() {
        return 0.0;
    }
    let grounded = response_tokens
        .iter()
        .filter(|t| context_tokens.contains(*t))
        .count();
    grounded as f32 / response_tokens.len() as f32
}
