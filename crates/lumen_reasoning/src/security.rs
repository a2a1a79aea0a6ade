use crate::llm::{CompletionParams, GuardedClient};
use crate::prompts;
use lumen_core::SecurityAssessment;

/// Single-shot adversarial-intent check on the raw query.
///
/// A screener failure permits the query. The evaluator fails the other way;
/// both postures are kept as-is and logged loudly.
pub struct SecurityScreener {
    llm: GuardedClient,
    model: String,
}

impl SecurityScreener {
    pub fn new(llm: GuardedClient, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    #[tracing::instrument(skip_all)]
    pub async fn inspect(&self, query: &str) -> SecurityAssessment {
        let result = self
            .llm
            .complete_json::<SecurityAssessment>(
                &self.model,
                &prompts::security(),
                query,
                CompletionParams::json(300, 0.0),
            )
            .await;

        match result {
            Ok(assessment) => {
                let assessment = assessment.normalized();
                if !assessment.is_safe {
                    tracing::warn!(
                        threat = %assessment.threat,
                        risk = assessment.risk_score,
                        "Query blocked by security screener"
                    );
                }
                assessment
            }
            Err(e) => {
                tracing::error!("Security screening failed, permitting query: {}", e);
                SecurityAssessment::permissive(format!("Security screening unavailable: {}", e))
            }
        }
    }
}
