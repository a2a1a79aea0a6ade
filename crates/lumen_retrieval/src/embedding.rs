use crate::cache::{content_hash, TtlCache};
use anyhow::{Context, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use lumen_core::config::EmbedderKind;
use lumen_core::text::content_tokens;
use std::sync::Arc;
use std::time::Duration;

pub type Embedding = Vec<f32>;

/// Embedding service collaborator.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

pub fn from_config(kind: &EmbedderKind) -> Result<Arc<dyn Embedder>> {
    match kind {
        EmbedderKind::Fastembed => Ok(Arc::new(FastEmbedder::new()?)),
        EmbedderKind::Hashing => Ok(Arc::new(HashingEmbedder::default())),
    }
}

// ============================================================================
// fastembed
// ============================================================================

#[derive(Clone)]
pub struct FastEmbedder {
    model: Arc<TextEmbedding>,
}

impl FastEmbedder {
    pub fn new() -> Result<Self> {
        let mut options = InitOptions::default();
        options.model_name = FastEmbedModel::BGESmallENV15;
        options.show_download_progress = true;

        let model = TextEmbedding::try_new(options).context("Failed to load embedding model")?;

        Ok(Self {
            model: Arc::new(model),
        })
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Failed to generate embedding"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        // ONNX inference is CPU-bound; keep it off the async workers
        let model = self.model.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || model.embed(texts, None))
            .await
            .context("Embedding task panicked")?
    }
}

// ============================================================================
// Feature hashing
// ============================================================================

/// Bag-of-words feature hashing into a fixed number of buckets, L2-normalised.
/// No model download; identical text always maps to the identical vector.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dims: 384 }
    }
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_sync(&self, text: &str) -> Embedding {
        let mut v = vec![0.0f32; self.dims];
        for tok in content_tokens(text) {
            let h = fnv1a(tok.as_bytes());
            let bucket = (h % self.dims as u64) as usize;
            // Sign bit keeps collisions from only ever adding up
            let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.embed_sync(text))
    }
}

// ============================================================================
// Embedding cache
// ============================================================================

/// Wraps any embedder with a content-hash keyed TTL cache.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: TtlCache<Embedding>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TtlCache::new(ttl),
        }
    }

    fn key(text: &str) -> String {
        format!("embedding:{}", content_hash(&[text]))
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let key = Self::key(text);
        if let Some(hit) = self.cache.get(&key).await {
            return Ok(hit);
        }
        let emb = self.inner.embed(text).await?;
        self.cache.insert(key, emb.clone()).await;
        Ok(emb)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut out: Vec<Option<Embedding>> = Vec::with_capacity(texts.len());
        let mut missing = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let hit = self.cache.get(&Self::key(text)).await;
            if hit.is_none() {
                missing.push(i);
            }
            out.push(hit);
        }

        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.embed_batch(&batch).await?;
            if fresh.len() != batch.len() {
                anyhow::bail!(
                    "Embedder returned {} vectors for {} texts",
                    fresh.len(),
                    batch.len()
                );
            }
            for (i, emb) in missing.into_iter().zip(fresh) {
                self.cache.insert(Self::key(&texts[i]), emb.clone()).await;
                out[i] = Some(emb);
            }
        }

        Ok(out.into_iter().flatten().collect())
    }
}

/// Calculate cosine similarity between two vectors
/// Returns a value between -1.0 and 1.0 (1.0 = identical direction)
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
