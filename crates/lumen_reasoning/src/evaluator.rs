use crate::executor::StepResult;
use crate::generator::format_context;
use crate::llm::{CompletionParams, GuardedClient};
use crate::prompts;
use lumen_core::Evaluation;

/// Model-based judge. Returns the judge's own scores and verdict; the
/// grounding override is applied by the engine, not here.
pub struct ResponseEvaluator {
    llm: GuardedClient,
    model: String,
    attempts: u32,
}

impl ResponseEvaluator {
    pub fn new(llm: GuardedClient, model: impl Into<String>, attempts: u32) -> Self {
        Self {
            llm,
            model: model.into(),
            attempts: attempts.max(1),
        }
    }

    /// After `attempts` consecutive judge failures the verdict is a
    /// zero-score Fail.
    #[tracing::instrument(skip_all)]
    pub async fn evaluate(&self, query: &str, response: &str, results: &[StepResult]) -> Evaluation {
        let user = format!(
            "Query: {}\nContext: {}\nResponse: {}",
            query,
            format_context(results),
            response
        );
        let system = prompts::judge();

        let mut last_error = String::from("no attempts made");
        for attempt in 1..=self.attempts {
            match self
                .llm
                .complete_json::<Evaluation>(
                    &self.model,
                    &system,
                    &user,
                    CompletionParams::json(500, 0.0),
                )
                .await
            {
                Ok(mut evaluation) => {
                    evaluation.scores = evaluation.scores.clamped();
                    evaluation.metrics = None;
                    tracing::info!(
                        grade = %evaluation.overall_grade,
                        faithfulness = evaluation.scores.faithfulness,
                        "Judge verdict"
                    );
                    return evaluation;
                }
                Err(e) => {
                    tracing::warn!(
                        "Judge attempt {}/{} failed: {}",
                        attempt,
                        self.attempts,
                        e
                    );
                    last_error = e.to_string();
                }
            }
        }

        tracing::error!("Judge unavailable after {} attempts; failing closed", self.attempts);
        Evaluation::judge_outage(last_error)
    }
}
