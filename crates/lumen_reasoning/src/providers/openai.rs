//! OpenAI-compatible chat completions (Groq, OpenAI, vLLM, Ollama's /v1).

use super::sse::SseBuffer;
use crate::api_types::{Message, MessagesResponse, Role, StreamEvent, Usage};
use crate::error::LlmError;
use crate::llm::{CompletionParams, LlmClient};
use crate::retry::{with_retry, RetryConfig};
use anyhow::{Context, Result};
use futures_util::StreamExt;
use lumen_core::config::LlmConfig;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    retry: RetryConfig,
}

impl OpenAiCompatibleClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config.api_key.clone().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!("No LLM API key configured; requests will be sent unauthenticated");
        }
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .context("Failed to build HTTP client")?,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn payload(
        &self,
        model: &str,
        system: &str,
        messages: Vec<Message>,
        params: &CompletionParams,
        stream: bool,
    ) -> Value {
        let mut payload = json!({
            "model": model,
            "messages": build_openai_messages(system, messages),
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        });
        if params.json_mode {
            payload["response_format"] = json!({"type": "json_object"});
        }
        if stream {
            payload["stream"] = json!(true);
        }
        payload
    }

    async fn post(&self, model: &str, payload: &Value) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        with_retry(&self.retry, model, || {
            let mut req = self.client.post(&url).json(payload);
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }
            req.send()
        })
        .await
    }
}

fn build_openai_messages(system: &str, messages: Vec<Message>) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    if !system.is_empty() {
        out.push(json!({"role": "system", "content": system}));
    }
    for msg in messages {
        let role = match msg.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        out.push(json!({"role": role, "content": msg.content}));
    }
    out
}

/// Parse a non-streaming chat completion body.
pub(crate) fn parse_openai_response(resp_json: &Value) -> Result<MessagesResponse, LlmError> {
    let choice = resp_json["choices"]
        .get(0)
        .ok_or_else(|| LlmError::Malformed("response has no choices".to_string()))?;
    let text = choice["message"]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    let stop_reason = choice["finish_reason"].as_str().map(str::to_string);
    let usage = resp_json.get("usage").map(|u| Usage {
        input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0),
        output_tokens: u["completion_tokens"].as_u64().unwrap_or(0),
    });
    Ok(MessagesResponse {
        text,
        stop_reason,
        usage,
    })
}

/// Parse an OpenAI SSE stream into `StreamEvent`s.
///
/// `data: {...}` lines carry `choices[0].delta.content`; `data: [DONE]` ends
/// the stream. A stream that closes without `[DONE]` still yields `Done`.
pub(crate) async fn parse_openai_sse<S>(
    byte_stream: S,
    tx: &tokio::sync::mpsc::Sender<StreamEvent>,
) -> Result<()>
where
    S: futures_util::Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>>
        + Unpin
        + Send,
{
    let mut stream = byte_stream;
    let mut buffer = SseBuffer::new();
    let mut stop_reason: Option<String> = None;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error reading SSE chunk")?;
        buffer.push_bytes(&chunk);

        for line in buffer.extract_lines() {
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                let _ = tx.send(StreamEvent::Done { stop_reason }).await;
                return Ok(());
            }
            let v: Value = match serde_json::from_str(data) {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!("Skipping unparsable SSE line: {}", e);
                    continue;
                }
            };
            if let Some(err) = v.get("error") {
                anyhow::bail!("Upstream stream error: {}", err);
            }
            let choice = &v["choices"][0];
            if let Some(delta) = choice["delta"]["content"].as_str() {
                if !delta.is_empty()
                    && tx.send(StreamEvent::TextDelta(delta.to_string())).await.is_err()
                {
                    // Receiver dropped
                    return Ok(());
                }
            }
            if let Some(reason) = choice["finish_reason"].as_str() {
                stop_reason = Some(reason.to_string());
            }
        }
    }

    let _ = tx.send(StreamEvent::Done { stop_reason }).await;
    Ok(())
}

#[async_trait::async_trait]
impl LlmClient for OpenAiCompatibleClient {
    #[tracing::instrument(skip(self, system, messages, params), fields(json = params.json_mode))]
    async fn complete(
        &self,
        model: &str,
        system: &str,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Result<MessagesResponse, LlmError> {
        let payload = self.payload(model, system, messages, &params, false);
        let response = self.post(model, &payload).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;
        parse_openai_response(&body)
    }

    async fn stream_complete(
        &self,
        model: &str,
        system: &str,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Result<tokio::sync::mpsc::Receiver<StreamEvent>, LlmError> {
        let payload = self.payload(model, system, messages, &params, true);
        let response = self.post(model, &payload).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let byte_stream = response.bytes_stream();
        tokio::spawn(async move {
            if let Err(e) = parse_openai_sse(byte_stream, &tx).await {
                let _ = tx.send(StreamEvent::Error(e.to_string())).await;
            }
        });
        Ok(rx)
    }
}
