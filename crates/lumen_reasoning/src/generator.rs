use crate::api_types::{Message, MessagesResponse, StreamEvent};
use crate::error::LlmError;
use crate::executor::{StepOutput, StepResult};
use crate::llm::{CompletionParams, GuardedClient};
use crate::prompts;
use anyhow::Result;
use async_trait::async_trait;
use lumen_retrieval::QueryExpander;
use tokio::sync::mpsc;

pub const NO_CONTEXT_ANSWER: &str = "The provided documents do not contain relevant information.";
const DEFAULT_TITLE: &str = "New Chat";

/// Render step outputs as numbered chunks. Errors are left out.
pub fn format_context(results: &[StepResult]) -> String {
    let mut chunks: Vec<String> = Vec::new();
    for r in results {
        match &r.output {
            StepOutput::Passages(passages) => {
                chunks.extend(passages.iter().map(|p| p.text.clone()));
            }
            StepOutput::Error(_) => {}
            other => {
                if let Some(text) = other.context_text() {
                    if !text.trim().is_empty() {
                        chunks.push(text);
                    }
                }
            }
        }
    }
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| format!("Chunk {}: {}", i + 1, c))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn answer_request(query: &str, results: &[StepResult]) -> Vec<Message> {
    vec![Message::user(format!(
        "Context:\n{}\n\nUser Question: {}",
        format_context(results),
        query
    ))]
}

/// Context-only answer writer over the generation tiers.
pub struct Generator {
    llm: GuardedClient,
    tiers: Vec<String>,
    params: CompletionParams,
}

impl Generator {
    pub fn new(llm: GuardedClient, tiers: Vec<String>, max_tokens: u32, temperature: f32) -> Self {
        Self {
            llm,
            tiers,
            params: CompletionParams::text(max_tokens, temperature),
        }
    }

    #[tracing::instrument(skip_all)]
    pub async fn generate(
        &self,
        query: &str,
        results: &[StepResult],
    ) -> Result<MessagesResponse, LlmError> {
        let (model, response) = self
            .llm
            .complete_tiered(
                &self.tiers,
                &prompts::generator(),
                answer_request(query, results),
                self.params.clone(),
            )
            .await?;
        tracing::debug!(model = %model, chars = response.text.len(), "Answer generated");
        Ok(response)
    }

    /// Same request as `generate`, delivered as deltas.
    pub async fn generate_stream(
        &self,
        query: &str,
        results: &[StepResult],
    ) -> Result<mpsc::Receiver<StreamEvent>, LlmError> {
        let (model, rx) = self
            .llm
            .stream_tiered(
                &self.tiers,
                &prompts::generator(),
                answer_request(query, results),
                self.params.clone(),
            )
            .await?;
        tracing::debug!(model = %model, "Answer stream opened");
        Ok(rx)
    }

    /// Short chat title. Falls back to "New Chat" on any failure.
    pub async fn generate_title(&self, query: &str) -> String {
        let result = self
            .llm
            .complete_tiered(
                &self.tiers,
                &prompts::title(),
                vec![Message::user(query)],
                CompletionParams::text(20, 0.3),
            )
            .await;
        match result {
            Ok((_, response)) => clean_title(&response.text),
            Err(e) => {
                tracing::warn!("Title generation failed: {}", e);
                DEFAULT_TITLE.to_string()
            }
        }
    }
}

/// Keep letters, digits and spaces; at most five words.
fn clean_title(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    let title = cleaned.split_whitespace().take(5).collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        title
    }
}

/// Paraphrases a query for dense multi-query retrieval.
pub struct LlmQueryExpander {
    llm: GuardedClient,
    tiers: Vec<String>,
}

impl LlmQueryExpander {
    pub fn new(llm: GuardedClient, tiers: Vec<String>) -> Self {
        Self { llm, tiers }
    }
}

/// One query per line, with list markers and quotes removed.
fn parse_expansions(text: &str, max: usize) -> Vec<String> {
    text.lines()
        .map(|l| {
            l.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*'))
                .trim()
                .trim_matches('"')
                .trim()
                .to_string()
        })
        .filter(|l| !l.is_empty())
        .take(max)
        .collect()
}

#[async_trait]
impl QueryExpander for LlmQueryExpander {
    async fn expand(&self, query: &str, max: usize) -> Result<Vec<String>> {
        let (_, response) = self
            .llm
            .complete_tiered(
                &self.tiers,
                &prompts::expansion(max),
                vec![Message::user(query)],
                CompletionParams::text(100, 0.5),
            )
            .await?;
        Ok(parse_expansions(&response.text, max))
    }
}
