pub mod cache;
pub mod embedding;
pub mod index;
pub mod rerank;
pub mod retriever;
pub mod store;
pub mod web;

pub use cache::{QueryCache, TtlCache};
pub use embedding::{CachedEmbedder, Embedder, Embedding, FastEmbedder, HashingEmbedder};
pub use index::{KeywordStore, PassageRecord, VectorHit, VectorIndex};
pub use rerank::{CrossEncoderReranker, LexicalReranker, Reranker};
pub use retriever::{HybridRetriever, NoExpansion, PassageRetriever, QueryExpander, RetrieverSettings};
pub use store::{DocumentRecord, SqlitePassageStore};
pub use web::{BraveSearch, WebResult, WebSearcher};

use anyhow::{Context, Result};
use lumen_core::config::RetrievalConfig;
use std::sync::Arc;
use std::time::Duration;

/// Open the passage store at `config.db_path` and wire a retriever over it
/// with the configured embedder and reranker. The embedder is cached.
pub async fn open(config: &RetrievalConfig) -> Result<(Arc<SqlitePassageStore>, HybridRetriever)> {
    tracing::info!("Opening passage store at {}", config.db_path);
    let store = Arc::new(
        SqlitePassageStore::new(&config.db_path)
            .await
            .context("Failed to open passage store")?,
    );

    let embedder: Arc<dyn Embedder> = Arc::new(CachedEmbedder::new(
        embedding::from_config(&config.embedder)?,
        Duration::from_secs(config.embedding_cache_ttl_secs),
    ));
    let reranker = rerank::from_config(&config.reranker)?;

    let retriever = HybridRetriever::new(
        embedder,
        store.clone(),
        store.clone(),
        reranker,
        RetrieverSettings::from(config),
    );
    Ok((store, retriever))
}

#[cfg(test)]
mod tests;
