//! Error kinds at the model and engine seams.
//!
//! Rate limits, circuit-breaker locks and timeouts are distinct variants so
//! callers can branch on them instead of string-matching.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model '{model}' rate limited: {message}")]
    RateLimited { model: String, message: String },

    #[error("model '{model}' is locked for another {remaining_secs:.1}s")]
    Locked { model: String, remaining_secs: f64 },

    #[error("model '{model}' did not answer within {secs}s")]
    Timeout { model: String, secs: u64 },

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("malformed model output: {0}")]
    Malformed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LlmError {
    /// True for the kinds that should push a caller onto the next model tier
    /// without counting as a hard failure.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. } | LlmError::Locked { .. })
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("request cancelled by client")]
    Cancelled,

    #[error("all model tiers are rate limited: {0}")]
    RateLimited(String),

    #[error("Retrieval system unavailable: {0}")]
    Retrieval(String),

    #[error("generation failed: {0}")]
    Generation(LlmError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<LlmError> for EngineError {
    fn from(e: LlmError) -> Self {
        if e.is_rate_limit() {
            EngineError::RateLimited(e.to_string())
        } else {
            EngineError::Generation(e)
        }
    }
}
