//! The standard tool handlers.

use crate::executor::{StepOutput, ToolExecutor, ToolHandler};
use crate::llm::{CompletionParams, GuardedClient};
use crate::registry;
use crate::{api_types::Message, prompts};
use anyhow::{Context, Result};
use async_trait::async_trait;
use lumen_core::config::LumenConfig;
use lumen_retrieval::{PassageRetriever, WebSearcher};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// hybrid_retriever
// ============================================================================

pub struct HybridRetrieverTool {
    retriever: Arc<dyn PassageRetriever>,
    top_k: usize,
}

impl HybridRetrieverTool {
    pub fn new(retriever: Arc<dyn PassageRetriever>, top_k: usize) -> Self {
        Self { retriever, top_k }
    }
}

#[async_trait]
impl ToolHandler for HybridRetrieverTool {
    fn name(&self) -> &str {
        registry::HYBRID_RETRIEVER
    }

    fn description(&self) -> &str {
        registry::HYBRID_RETRIEVER_DESC
    }

    async fn execute(&self, input: &str) -> Result<StepOutput> {
        let passages = self
            .retriever
            .retrieve(input, self.top_k, None)
            .await
            .context("Hybrid retrieval failed")?;
        Ok(StepOutput::Passages(passages))
    }
}

// ============================================================================
// web_search
// ============================================================================

pub struct WebSearchTool {
    search: Arc<dyn WebSearcher>,
    count: usize,
}

impl WebSearchTool {
    pub fn new(search: Arc<dyn WebSearcher>, count: usize) -> Self {
        Self { search, count }
    }
}

#[async_trait]
impl ToolHandler for WebSearchTool {
    fn name(&self) -> &str {
        registry::WEB_SEARCH
    }

    fn description(&self) -> &str {
        registry::WEB_SEARCH_DESC
    }

    async fn execute(&self, input: &str) -> Result<StepOutput> {
        let results = self.search.search(input, self.count).await?;
        Ok(StepOutput::Passages(
            results.into_iter().map(|r| r.into_passage()).collect(),
        ))
    }
}

// ============================================================================
// summarizer
// ============================================================================

pub struct SummarizerTool {
    llm: GuardedClient,
    tiers: Vec<String>,
}

impl SummarizerTool {
    pub fn new(llm: GuardedClient, tiers: Vec<String>) -> Self {
        Self { llm, tiers }
    }
}

#[async_trait]
impl ToolHandler for SummarizerTool {
    fn name(&self) -> &str {
        registry::SUMMARIZER
    }

    fn description(&self) -> &str {
        registry::SUMMARIZER_DESC
    }

    async fn execute(&self, input: &str) -> Result<StepOutput> {
        let (_, response) = self
            .llm
            .complete_tiered(
                &self.tiers,
                &prompts::summarizer(),
                vec![Message::user(input)],
                CompletionParams::text(512, 0.2),
            )
            .await?;
        Ok(StepOutput::Text(response.text))
    }
}

// ============================================================================
// code_interpreter
// ============================================================================

/// Runs the step input as a Python program (`python3 -c`). Killed on timeout.
pub struct CodeInterpreterTool {
    python_bin: String,
    timeout: Duration,
}

impl CodeInterpreterTool {
    pub fn new(python_bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            python_bin: python_bin.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ToolHandler for CodeInterpreterTool {
    fn name(&self) -> &str {
        registry::CODE_INTERPRETER
    }

    fn description(&self) -> &str {
        registry::CODE_INTERPRETER_DESC
    }

    async fn execute(&self, input: &str) -> Result<StepOutput> {
        let child = tokio::process::Command::new(&self.python_bin)
            .arg("-c")
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", self.python_bin))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                anyhow::anyhow!("Code execution timed out after {}s", self.timeout.as_secs())
            })?
            .context("Failed to collect interpreter output")?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            anyhow::bail!(
                "Code exited with {}: {}",
                output.status.code().unwrap_or(-1),
                stderr
            );
        }
        if !stderr.is_empty() {
            tracing::debug!("Interpreter stderr: {}", stderr);
        }
        Ok(StepOutput::Text(stdout))
    }
}

/// Executor with all four handlers wired from configuration.
pub fn standard_executor(
    config: &LumenConfig,
    retriever: Arc<dyn PassageRetriever>,
    web: Arc<dyn WebSearcher>,
    llm: GuardedClient,
) -> ToolExecutor {
    let fast_first = vec![
        config.llm.fast_model.clone(),
        config.llm.primary_model.clone(),
    ];
    ToolExecutor::new(Duration::from_secs(config.timeouts.tool_secs))
        .with_handler(Arc::new(HybridRetrieverTool::new(
            retriever,
            config.retrieval.top_k,
        )))
        .with_handler(Arc::new(WebSearchTool::new(web, config.web_search.count)))
        .with_handler(Arc::new(SummarizerTool::new(llm, fast_first)))
        .with_handler(Arc::new(CodeInterpreterTool::new(
            config.tools.python_bin.clone(),
            Duration::from_secs(config.tools.code_timeout_secs),
        )))
}
