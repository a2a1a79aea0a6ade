use lumen_core::{Metadata, RetrievedPassage};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// SHA-256 over the parts, separated so ("ab","c") and ("a","bc") differ.
pub fn content_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    format!("{:x}", hasher.finalize())
}

/// In-memory map with a fixed time-to-live. Expired entries are purged when read.
pub struct TtlCache<V> {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, V)>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return None,
                Some((expires, v)) if Instant::now() < *expires => return Some(v.clone()),
                Some(_) => {}
            }
        }
        let mut entries = self.entries.write().await;
        // Re-check: another writer may have refreshed it in between
        if let Some((expires, v)) = entries.get(key) {
            if Instant::now() < *expires {
                return Some(v.clone());
            }
        }
        entries.remove(key);
        None
    }

    /// Last write wins. Concurrent writers store equal values for equal keys.
    pub async fn insert(&self, key: String, value: V) {
        let expires = Instant::now() + self.ttl;
        self.entries.write().await.insert(key, (expires, value));
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Retrieval results keyed by query text, `top_k` and filters.
pub struct QueryCache {
    inner: TtlCache<Vec<RetrievedPassage>>,
}

impl QueryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: TtlCache::new(ttl),
        }
    }

    pub fn key(query: &str, top_k: usize, filters: Option<&Metadata>) -> String {
        let filters = filters
            .map(|f| serde_json::Value::Object(f.clone()).to_string())
            .unwrap_or_default();
        format!(
            "query_cache:{}",
            content_hash(&[query, &top_k.to_string(), &filters])
        )
    }

    pub async fn get(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<&Metadata>,
    ) -> Option<Vec<RetrievedPassage>> {
        self.inner.get(&Self::key(query, top_k, filters)).await
    }

    pub async fn put(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<&Metadata>,
        passages: Vec<RetrievedPassage>,
    ) {
        self.inner
            .insert(Self::key(query, top_k, filters), passages)
            .await;
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }
}
