//! Deep synthesis for plans whose tools came back empty.
//!
//! Three sequential calls: a researcher looks for gaps, an analyst structures
//! the notes, a writer produces the answer. Only the writer may stream.

use crate::api_types::{Message, StreamEvent};
use crate::error::LlmError;
use crate::executor::StepResult;
use crate::generator::format_context;
use crate::llm::{CompletionParams, GuardedClient};
use crate::prompts;
use tokio::sync::mpsc;

const EMPTY_CONTEXT: &str = "No supporting material was retrieved.";

pub struct MultiAgentSynthesizer {
    llm: GuardedClient,
    tiers: Vec<String>,
    max_tokens: u32,
}

impl MultiAgentSynthesizer {
    pub fn new(llm: GuardedClient, tiers: Vec<String>, max_tokens: u32) -> Self {
        Self {
            llm,
            tiers,
            max_tokens,
        }
    }

    async fn ask(&self, system: String, max_tokens: u32) -> Result<String, LlmError> {
        let (model, response) = self
            .llm
            .complete_tiered(
                &self.tiers,
                &system,
                vec![Message::user("Proceed.")],
                CompletionParams::text(max_tokens, 0.3),
            )
            .await?;
        tracing::debug!(model = %model, "Agent turn complete");
        Ok(response.text)
    }

    /// Researcher then analyst. Returns the analysis the writer works from.
    #[tracing::instrument(skip_all)]
    pub async fn analyze(&self, query: &str, results: &[StepResult]) -> Result<String, LlmError> {
        let context = format_context(results);
        let context = if context.is_empty() {
            EMPTY_CONTEXT.to_string()
        } else {
            context
        };
        let notes = self
            .ask(prompts::researcher(query, &context), self.max_tokens)
            .await?;
        self.ask(prompts::analyst(query, &notes), self.max_tokens)
            .await
    }

    pub async fn synthesize(&self, query: &str, results: &[StepResult]) -> Result<String, LlmError> {
        let analysis = self.analyze(query, results).await?;
        self.ask(prompts::writer(query, &analysis), self.max_tokens)
            .await
    }

    pub async fn synthesize_stream(
        &self,
        query: &str,
        results: &[StepResult],
    ) -> Result<mpsc::Receiver<StreamEvent>, LlmError> {
        let analysis = self.analyze(query, results).await?;
        let (_, rx) = self
            .llm
            .stream_tiered(
                &self.tiers,
                &prompts::writer(query, &analysis),
                vec![Message::user("Proceed.")],
                CompletionParams::text(self.max_tokens, 0.3),
            )
            .await?;
        Ok(rx)
    }
}
