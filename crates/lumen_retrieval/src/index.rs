//! Collaborator seams the hybrid retriever searches through.

use crate::embedding::Embedding;
use anyhow::Result;
use async_trait::async_trait;
use lumen_core::Metadata;
use serde::{Deserialize, Serialize};

/// One nearest-neighbour candidate. `distance` is cosine distance in [0, 2].
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub distance: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Up to `n` hits ranked by ascending distance. Passages whose metadata
    /// does not contain every `filter` entry are excluded.
    async fn query(
        &self,
        embedding: &[f32],
        n: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<VectorHit>>;

    async fn add(
        &self,
        documents: &[String],
        embeddings: &[Embedding],
        metadatas: &[Metadata],
        ids: &[String],
    ) -> Result<()>;
}

/// A passage row as held by the relational store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageRecord {
    pub id: String,
    #[serde(default)]
    pub document_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl PassageRecord {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            document_id: None,
            content: content.into(),
            summary: None,
            keywords: Vec::new(),
            metadata: Metadata::new(),
        }
    }
}

#[async_trait]
pub trait KeywordStore: Send + Sync {
    /// Passages whose content, summary or keywords contain any of `terms`
    /// (case-insensitive substring match), in insertion order.
    async fn keyword_search(
        &self,
        terms: &[String],
        limit: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<PassageRecord>>;
}

/// True when every filter entry is present in `metadata` with an equal value.
pub fn matches_filter(metadata: &Metadata, filter: Option<&Metadata>) -> bool {
    match filter {
        None => true,
        Some(f) => f.iter().all(|(k, v)| metadata.get(k) == Some(v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_matches_filter() {
        let mut meta = Metadata::new();
        meta.insert("source".into(), json!("guide.pdf"));
        meta.insert("page".into(), json!(3));

        let mut f = Metadata::new();
        assert!(matches_filter(&meta, None));
        assert!(matches_filter(&meta, Some(&f)));

        f.insert("source".into(), json!("guide.pdf"));
        assert!(matches_filter(&meta, Some(&f)));

        f.insert("page".into(), json!(4));
        assert!(!matches_filter(&meta, Some(&f)));
    }
}
