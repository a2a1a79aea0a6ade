use anyhow::{Context, Result};
use async_trait::async_trait;
use lumen_core::config::WebSearchConfig;
use lumen_core::{Metadata, Provenance, RetrievedPassage};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Brave does not score results; anything it returns is treated as relevant.
const WEB_RESULT_SCORE: f32 = 0.85;

#[derive(Debug, Clone, PartialEq)]
pub struct WebResult {
    pub text: String,
    pub url: String,
    pub title: String,
}

impl WebResult {
    pub fn into_passage(self) -> RetrievedPassage {
        let mut metadata = Metadata::new();
        metadata.insert("source".into(), json!(self.url));
        metadata.insert("title".into(), json!(self.title));
        metadata.insert("is_web".into(), json!(true));
        RetrievedPassage {
            id: format!("web_{}", self.url),
            text: self.text,
            metadata,
            score: WEB_RESULT_SCORE,
            provenance: Provenance::Web,
        }
    }
}

#[async_trait]
pub trait WebSearcher: Send + Sync {
    async fn search(&self, query: &str, count: usize) -> Result<Vec<WebResult>>;
}

#[derive(Debug, Deserialize, Default)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize, Default)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveItem>,
}

#[derive(Debug, Deserialize)]
struct BraveItem {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
}

pub struct BraveSearch {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl BraveSearch {
    pub fn new(config: &WebSearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            base_url: config.base_url.clone(),
        })
    }
}

#[async_trait]
impl WebSearcher for BraveSearch {
    async fn search(&self, query: &str, count: usize) -> Result<Vec<WebResult>> {
        let Some(api_key) = &self.api_key else {
            tracing::warn!("BRAVE_API_KEY is not set. Skipping web search.");
            return Ok(Vec::new());
        };

        let count_param = count.to_string();
        let response = self
            .client
            .get(&self.base_url)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", api_key)
            .query(&[("q", query), ("count", count_param.as_str())])
            .send()
            .await
            .context("Failed to reach Brave search")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Brave search error {}: {}", status, body);
        }

        let parsed: BraveResponse = response
            .json()
            .await
            .context("Failed to parse Brave search response")?;

        Ok(parsed
            .web
            .unwrap_or_default()
            .results
            .into_iter()
            .take(count)
            .map(|item| WebResult {
                text: item.description,
                url: item.url,
                title: item.title,
            })
            .collect())
    }
}
