use anyhow::{Context, Result};
use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use lumen_core::config::RerankerKind;
use lumen_core::text::{content_tokens, tokens};
use std::collections::HashSet;
use std::sync::Arc;

/// Scores (query, passage) pairs jointly. Returns raw, unbounded scores in
/// input order; callers map them into [0, 1] with [`sigmoid`].
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>>;
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub fn from_config(kind: &RerankerKind) -> Result<Arc<dyn Reranker>> {
    match kind {
        RerankerKind::CrossEncoder => Ok(Arc::new(CrossEncoderReranker::new()?)),
        RerankerKind::Lexical => Ok(Arc::new(LexicalReranker)),
    }
}

/// Cross-encoder backed by a local ONNX reranking model.
#[derive(Clone)]
pub struct CrossEncoderReranker {
    model: Arc<TextRerank>,
}

impl CrossEncoderReranker {
    pub fn new() -> Result<Self> {
        let options =
            RerankInitOptions::new(RerankerModel::BGERerankerBase).with_show_download_progress(true);
        let model = TextRerank::try_new(options).context("Failed to load reranker model")?;
        Ok(Self {
            model: Arc::new(model),
        })
    }
}

#[async_trait]
impl Reranker for CrossEncoderReranker {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.model.clone();
        let query = query.to_string();
        let docs = passages.to_vec();
        let n = docs.len();

        let results = tokio::task::spawn_blocking(move || model.rerank(query, docs, false, None))
            .await
            .context("Rerank task panicked")??;

        // rerank() returns results sorted by score; put them back in input order
        let mut scores = vec![f32::NEG_INFINITY; n];
        for r in results {
            if let Some(slot) = scores.get_mut(r.index) {
                *slot = r.score;
            }
        }
        Ok(scores)
    }
}

/// Query-term overlap mapped onto a logit: full overlap gives +4, none gives -4.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalReranker;

impl LexicalReranker {
    pub fn logit(query: &str, passage: &str) -> f32 {
        let mut q: HashSet<String> = content_tokens(query).collect();
        if q.is_empty() {
            q = tokens(query).collect();
        }
        if q.is_empty() {
            return -4.0;
        }
        let p: HashSet<String> = tokens(passage).collect();
        let overlap = q.iter().filter(|t| p.contains(*t)).count() as f32 / q.len() as f32;
        8.0 * overlap - 4.0
    }
}

#[async_trait]
impl Reranker for LexicalReranker {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        Ok(passages.iter().map(|p| Self::logit(query, p)).collect())
    }
}
