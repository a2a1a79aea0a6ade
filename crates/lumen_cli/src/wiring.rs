//! Assembles the engine and its collaborators from configuration.

use anyhow::{Context, Result};
use lumen_core::config::LumenConfig;
use lumen_reasoning::providers;
use lumen_reasoning::{GuardedClient, LlmQueryExpander, ReasoningEngine, TokenBudget};
use lumen_retrieval::BraveSearch;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub async fn build_engine(config: &LumenConfig) -> Result<ReasoningEngine> {
    // One lock table for every component that calls a model
    let budget = Arc::new(TokenBudget::new());
    let provider = providers::from_config(&config.llm).context("Failed to create LLM provider")?;
    let llm = GuardedClient::new(
        provider,
        budget,
        Duration::from_secs(config.timeouts.model_call_secs),
    );
    info!(
        provider = %config.llm.provider,
        planner_tiers = ?config.llm.planner_tiers(),
        "LLM client ready"
    );

    let (store, retriever) = lumen_retrieval::open(&config.retrieval).await?;
    match store.count_passages().await {
        Ok(0) => warn!("Passage store is empty; every query will stop at the retrieval gate"),
        Ok(n) => info!("Passage store holds {} passages", n),
        Err(e) => warn!("Could not count passages: {:#}", e),
    }

    let expander = LlmQueryExpander::new(llm.clone(), vec![config.llm.fast_model.clone()]);
    let retriever = retriever.with_expander(Arc::new(expander));

    let web = BraveSearch::new(&config.web_search).context("Failed to create web search client")?;
    if config.web_search.api_key.is_none() {
        warn!("No web search API key; web_search steps will return nothing");
    }

    Ok(ReasoningEngine::new(
        config,
        llm,
        Arc::new(retriever),
        Arc::new(web),
    ))
}
