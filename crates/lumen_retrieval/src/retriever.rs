use crate::cache::QueryCache;
use crate::embedding::Embedder;
use crate::index::{KeywordStore, VectorIndex};
use crate::rerank::{sigmoid, Reranker};
use anyhow::{Context, Result};
use async_trait::async_trait;
use lumen_core::config::RetrievalConfig;
use lumen_core::text::keyword_terms;
use lumen_core::{Metadata, Provenance, RetrievedPassage};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Anything that can answer "which passages are relevant to this query".
#[async_trait]
pub trait PassageRetriever: Send + Sync {
    /// At most `top_k` passages, best first. Ties keep first-seen order.
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<&Metadata>,
    ) -> Result<Vec<RetrievedPassage>>;
}

/// Produces paraphrases of a query to widen dense recall.
#[async_trait]
pub trait QueryExpander: Send + Sync {
    async fn expand(&self, query: &str, max: usize) -> Result<Vec<String>>;
}

/// Expander that never paraphrases; the original query is searched alone.
pub struct NoExpansion;

#[async_trait]
impl QueryExpander for NoExpansion {
    async fn expand(&self, _query: &str, _max: usize) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone)]
pub struct RetrieverSettings {
    pub max_expansions: usize,
    pub max_queries: usize,
    pub keyword_min_len: usize,
    pub keyword_baseline_score: f32,
    pub cache_ttl: Duration,
}

impl Default for RetrieverSettings {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

impl From<&RetrievalConfig> for RetrieverSettings {
    fn from(cfg: &RetrievalConfig) -> Self {
        Self {
            max_expansions: cfg.max_expansions,
            max_queries: cfg.max_queries.max(1),
            keyword_min_len: cfg.keyword_min_len,
            keyword_baseline_score: cfg.keyword_baseline_score,
            cache_ttl: Duration::from_secs(cfg.query_cache_ttl_secs),
        }
    }
}

/// Dense + keyword + rerank retrieval with a query-level cache.
pub struct HybridRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    keywords: Arc<dyn KeywordStore>,
    reranker: Arc<dyn Reranker>,
    expander: Arc<dyn QueryExpander>,
    cache: QueryCache,
    settings: RetrieverSettings,
}

impl HybridRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        keywords: Arc<dyn KeywordStore>,
        reranker: Arc<dyn Reranker>,
        settings: RetrieverSettings,
    ) -> Self {
        let cache = QueryCache::new(settings.cache_ttl);
        Self {
            embedder,
            index,
            keywords,
            reranker,
            expander: Arc::new(NoExpansion),
            cache,
            settings,
        }
    }

    pub fn with_expander(mut self, expander: Arc<dyn QueryExpander>) -> Self {
        self.expander = expander;
        self
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// The original query first, then distinct paraphrases, capped.
    async fn expanded_queries(&self, query: &str) -> Vec<String> {
        let mut queries = vec![query.to_string()];
        if self.settings.max_queries <= 1 || self.settings.max_expansions == 0 {
            return queries;
        }

        let paraphrases = match self
            .expander
            .expand(query, self.settings.max_expansions)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Query expansion failed, searching original only: {}", e);
                Vec::new()
            }
        };

        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(query.trim().to_lowercase());
        for p in paraphrases.into_iter().take(self.settings.max_expansions) {
            let trimmed = p.trim();
            if trimmed.is_empty() || !seen.insert(trimmed.to_lowercase()) {
                continue;
            }
            queries.push(trimmed.to_string());
            if queries.len() >= self.settings.max_queries {
                break;
            }
        }
        queries
    }
}

#[async_trait]
impl PassageRetriever for HybridRetriever {
    #[tracing::instrument(skip(self, filters))]
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<&Metadata>,
    ) -> Result<Vec<RetrievedPassage>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        // 1. Cache
        if let Some(hit) = self.cache.get(query, top_k, filters).await {
            tracing::debug!("Query cache hit ({} passages)", hit.len());
            return Ok(hit);
        }

        // 2. Expansion
        let queries = self.expanded_queries(query).await;
        tracing::debug!("Expanding retrieval with {} queries", queries.len());

        // 3. Dense
        let embeddings = self
            .embedder
            .embed_batch(&queries)
            .await
            .context("Failed to embed retrieval queries")?;

        let mut candidates: Vec<RetrievedPassage> = Vec::new();
        let mut seen_ids: HashSet<String> = HashSet::new();
        for emb in &embeddings {
            let hits = self
                .index
                .query(emb, top_k * 2, filters)
                .await
                .context("Vector index query failed")?;
            for hit in hits {
                if seen_ids.insert(hit.id.clone()) {
                    candidates.push(RetrievedPassage {
                        id: hit.id,
                        text: hit.text,
                        metadata: hit.metadata,
                        score: (1.0 - hit.distance).clamp(0.0, 1.0),
                        provenance: Provenance::Dense,
                    });
                }
            }
        }

        // 4. Keyword
        let terms = keyword_terms(query, self.settings.keyword_min_len);
        if !terms.is_empty() {
            let records = self
                .keywords
                .keyword_search(&terms, top_k * 2, filters)
                .await
                .context("Keyword search failed")?;
            for rec in records {
                if seen_ids.contains(&rec.id) {
                    if let Some(existing) = candidates.iter_mut().find(|c| c.id == rec.id) {
                        existing.provenance = Provenance::Hybrid;
                    }
                } else {
                    seen_ids.insert(rec.id.clone());
                    candidates.push(RetrievedPassage {
                        id: rec.id,
                        text: rec.content,
                        metadata: rec.metadata,
                        score: self.settings.keyword_baseline_score,
                        provenance: Provenance::Keyword,
                    });
                }
            }
        }

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        // 5. Rerank
        let texts: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
        match self.reranker.score(query, &texts).await {
            Ok(raw) if raw.len() == candidates.len() => {
                for (c, s) in candidates.iter_mut().zip(raw) {
                    c.score = if s.is_finite() { sigmoid(s) } else { 0.0 };
                }
            }
            Ok(raw) => {
                tracing::warn!(
                    "Reranker returned {} scores for {} passages; keeping initial scores",
                    raw.len(),
                    candidates.len()
                );
            }
            Err(e) => {
                tracing::warn!("Rerank failed, keeping initial scores: {}", e);
            }
        }

        // sort_by is stable: ties keep first-seen order
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(top_k);

        // 6. Cache
        self.cache
            .put(query, top_k, filters, candidates.clone())
            .await;

        Ok(candidates)
    }
}
