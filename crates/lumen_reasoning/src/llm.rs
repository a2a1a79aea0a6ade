use crate::api_types::{Message, MessagesResponse, StreamEvent};
use crate::error::LlmError;
use crate::token_budget::TokenBudget;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Sampling parameters for one completion.
#[derive(Debug, Clone)]
pub struct CompletionParams {
    pub max_tokens: u32,
    pub temperature: f32,
    /// Ask the provider for a single JSON object as output.
    pub json_mode: bool,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.1,
            json_mode: false,
        }
    }
}

impl CompletionParams {
    pub fn text(max_tokens: u32, temperature: f32) -> Self {
        Self {
            max_tokens,
            temperature,
            json_mode: false,
        }
    }

    pub fn json(max_tokens: u32, temperature: f32) -> Self {
        Self {
            max_tokens,
            temperature,
            json_mode: true,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        system: &str,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Result<MessagesResponse, LlmError>;

    /// Stream a completion. Providers without native streaming deliver the
    /// whole buffered answer as a single delta.
    async fn stream_complete(
        &self,
        model: &str,
        system: &str,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Result<mpsc::Receiver<StreamEvent>, LlmError> {
        let response = self.complete(model, system, messages, params).await?;
        let (tx, rx) = mpsc::channel(2);
        let _ = tx.try_send(StreamEvent::TextDelta(response.text));
        let _ = tx.try_send(StreamEvent::Done {
            stop_reason: response.stop_reason,
        });
        Ok(rx)
    }
}

/// Pull the first JSON object out of model output. Tolerates code fences and
/// chatter around the object.
pub fn parse_json_object<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(LlmError::Malformed("empty response".to_string()));
    }
    let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    };
    serde_json::from_str(candidate).map_err(|e| LlmError::Malformed(e.to_string()))
}

/// An `LlmClient` behind the circuit breaker and a per-call timeout.
///
/// Locked models are refused without a network call. 429s lock the model.
#[derive(Clone)]
pub struct GuardedClient {
    inner: Arc<dyn LlmClient>,
    budget: Arc<TokenBudget>,
    call_timeout: Duration,
}

impl GuardedClient {
    pub fn new(inner: Arc<dyn LlmClient>, budget: Arc<TokenBudget>, call_timeout: Duration) -> Self {
        Self {
            inner,
            budget,
            call_timeout,
        }
    }

    pub fn budget(&self) -> &Arc<TokenBudget> {
        &self.budget
    }

    pub fn can_use(&self, model: &str) -> bool {
        self.budget.can_use(model)
    }

    /// The first tier that is not currently locked.
    pub fn first_available<'a>(&self, tiers: &'a [String]) -> Option<&'a str> {
        tiers
            .iter()
            .map(String::as_str)
            .find(|m| self.budget.can_use(m))
    }

    fn check_lock(&self, model: &str) -> Result<(), LlmError> {
        if self.budget.can_use(model) {
            Ok(())
        } else {
            Err(LlmError::Locked {
                model: model.to_string(),
                remaining_secs: self.budget.get_lock_duration(model),
            })
        }
    }

    fn observe(&self, err: LlmError) -> LlmError {
        if let LlmError::RateLimited { model, message } = &err {
            self.budget.report_429(model, message);
        }
        err
    }

    pub async fn complete(
        &self,
        model: &str,
        system: &str,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Result<MessagesResponse, LlmError> {
        self.check_lock(model)?;
        match tokio::time::timeout(
            self.call_timeout,
            self.inner.complete(model, system, messages, params),
        )
        .await
        {
            Ok(result) => result.map_err(|e| self.observe(e)),
            Err(_) => Err(LlmError::Timeout {
                model: model.to_string(),
                secs: self.call_timeout.as_secs(),
            }),
        }
    }

    /// The timeout covers opening the stream, not draining it.
    pub async fn stream_complete(
        &self,
        model: &str,
        system: &str,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Result<mpsc::Receiver<StreamEvent>, LlmError> {
        self.check_lock(model)?;
        match tokio::time::timeout(
            self.call_timeout,
            self.inner.stream_complete(model, system, messages, params),
        )
        .await
        {
            Ok(result) => result.map_err(|e| self.observe(e)),
            Err(_) => Err(LlmError::Timeout {
                model: model.to_string(),
                secs: self.call_timeout.as_secs(),
            }),
        }
    }

    /// Try `tiers` in order, skipping locked or rate-limited models. Other
    /// errors are returned immediately. Returns the model that answered.
    pub async fn complete_tiered(
        &self,
        tiers: &[String],
        system: &str,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Result<(String, MessagesResponse), LlmError> {
        let mut last = None;
        for model in tiers {
            match self
                .complete(model, system, messages.clone(), params.clone())
                .await
            {
                Ok(response) => return Ok((model.clone(), response)),
                Err(e) if e.is_rate_limit() => {
                    tracing::warn!("{}; falling back to next tier", e);
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| LlmError::Other(anyhow::anyhow!("no model tiers configured"))))
    }

    /// Streaming counterpart of `complete_tiered`.
    pub async fn stream_tiered(
        &self,
        tiers: &[String],
        system: &str,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Result<(String, mpsc::Receiver<StreamEvent>), LlmError> {
        let mut last = None;
        for model in tiers {
            match self
                .stream_complete(model, system, messages.clone(), params.clone())
                .await
            {
                Ok(rx) => return Ok((model.clone(), rx)),
                Err(e) if e.is_rate_limit() => {
                    tracing::warn!("{}; falling back to next tier", e);
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| LlmError::Other(anyhow::anyhow!("no model tiers configured"))))
    }

    /// Single-turn completion parsed as a JSON object.
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        model: &str,
        system: &str,
        user: &str,
        params: CompletionParams,
    ) -> Result<T, LlmError> {
        let response = self
            .complete(model, system, vec![Message::user(user)], params)
            .await?;
        parse_json_object(&response.text)
    }
}
