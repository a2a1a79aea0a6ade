use crate::embedding::{Embedder, Embedding, HashingEmbedder};
use crate::index::{KeywordStore, PassageRecord, VectorHit, VectorIndex};
use crate::rerank::{LexicalReranker, Reranker};
use crate::retriever::{HybridRetriever, PassageRetriever, QueryExpander, RetrieverSettings};
use anyhow::Result;
use async_trait::async_trait;
use lumen_core::{Metadata, Provenance};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Fixed hit list; counts queries and remembers the requested `n`.
struct FakeIndex {
    hits: Vec<VectorHit>,
    calls: AtomicUsize,
    last_n: Mutex<usize>,
}

impl FakeIndex {
    fn new(hits: Vec<(&str, &str, f32)>) -> Self {
        Self {
            hits: hits
                .into_iter()
                .map(|(id, text, distance)| VectorHit {
                    id: id.into(),
                    text: text.into(),
                    metadata: Metadata::new(),
                    distance,
                })
                .collect(),
            calls: AtomicUsize::new(0),
            last_n: Mutex::new(0),
        }
    }
}

#[async_trait]
impl VectorIndex for FakeIndex {
    async fn query(&self, _e: &[f32], n: usize, _f: Option<&Metadata>) -> Result<Vec<VectorHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_n.lock().unwrap() = n;
        Ok(self.hits.iter().take(n).cloned().collect())
    }

    async fn add(&self, _: &[String], _: &[Embedding], _: &[Metadata], _: &[String]) -> Result<()> {
        Ok(())
    }
}

struct FakeKeywords(Vec<PassageRecord>);

#[async_trait]
impl KeywordStore for FakeKeywords {
    async fn keyword_search(
        &self,
        _terms: &[String],
        limit: usize,
        _f: Option<&Metadata>,
    ) -> Result<Vec<PassageRecord>> {
        Ok(self.0.iter().take(limit).cloned().collect())
    }
}

struct FixedExpander(Vec<&'static str>);

#[async_trait]
impl QueryExpander for FixedExpander {
    async fn expand(&self, _q: &str, _max: usize) -> Result<Vec<String>> {
        Ok(self.0.iter().map(|s| s.to_string()).collect())
    }
}

struct FailingExpander;

#[async_trait]
impl QueryExpander for FailingExpander {
    async fn expand(&self, _q: &str, _max: usize) -> Result<Vec<String>> {
        anyhow::bail!("rate limited")
    }
}

/// Same raw score for everything: exercises tie ordering.
struct ConstantReranker;

#[async_trait]
impl Reranker for ConstantReranker {
    async fn score(&self, _q: &str, passages: &[String]) -> Result<Vec<f32>> {
        Ok(vec![0.0; passages.len()])
    }
}

struct BrokenReranker;

#[async_trait]
impl Reranker for BrokenReranker {
    async fn score(&self, _q: &str, _p: &[String]) -> Result<Vec<f32>> {
        anyhow::bail!("model not loaded")
    }
}

/// Counts embeds so cache hits are observable.
struct CountingEmbedder(AtomicUsize);

#[async_trait]
impl Embedder for CountingEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.0.fetch_add(1, Ordering::SeqCst);
        HashingEmbedder::default().embed(text).await
    }
}

fn retriever(
    index: Arc<FakeIndex>,
    keywords: Vec<PassageRecord>,
    reranker: Arc<dyn Reranker>,
) -> HybridRetriever {
    HybridRetriever::new(
        Arc::new(HashingEmbedder::default()),
        index,
        Arc::new(FakeKeywords(keywords)),
        reranker,
        RetrieverSettings::default(),
    )
}

#[tokio::test]
async fn test_dense_requests_twice_top_k() {
    let index = Arc::new(FakeIndex::new(vec![("a", "alpha", 0.1)]));
    let r = retriever(index.clone(), vec![], Arc::new(LexicalReranker));
    r.retrieve("alpha", 3, None).await.unwrap();
    assert_eq!(*index.last_n.lock().unwrap(), 6);
}

#[tokio::test]
async fn test_expansion_capped_to_four_queries_with_original() {
    let index = Arc::new(FakeIndex::new(vec![("a", "alpha", 0.1)]));
    let r = retriever(index.clone(), vec![], Arc::new(LexicalReranker)).with_expander(Arc::new(
        FixedExpander(vec!["one", "two", "two", "three", "four", "five"]),
    ));
    r.retrieve("alpha", 2, None).await.unwrap();
    // original + first three paraphrases handed over; the duplicate "two" is dropped
    assert_eq!(index.calls.load(Ordering::SeqCst), 3);

    let index = Arc::new(FakeIndex::new(vec![("a", "alpha", 0.1)]));
    let r = retriever(index.clone(), vec![], Arc::new(LexicalReranker))
        .with_expander(Arc::new(FixedExpander(vec!["one", "two", "three"])));
    r.retrieve("alpha", 2, None).await.unwrap();
    assert_eq!(index.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_expander_failure_falls_back_to_original() {
    let index = Arc::new(FakeIndex::new(vec![("a", "alpha", 0.1)]));
    let r = retriever(index.clone(), vec![], Arc::new(LexicalReranker))
        .with_expander(Arc::new(FailingExpander));
    let out = r.retrieve("alpha", 2, None).await.unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(index.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_keyword_only_and_hybrid_provenance() {
    let index = Arc::new(FakeIndex::new(vec![("shared", "pod shared text", 0.2)]));
    let keywords = vec![
        PassageRecord::new("shared", "pod shared text"),
        PassageRecord::new("kw", "pod keyword text"),
    ];
    let r = retriever(index, keywords, Arc::new(ConstantReranker));
    let out = r.retrieve("kubernetes pod", 5, None).await.unwrap();

    let shared = out.iter().find(|p| p.id == "shared").unwrap();
    let kw = out.iter().find(|p| p.id == "kw").unwrap();
    assert_eq!(shared.provenance, Provenance::Hybrid);
    assert_eq!(kw.provenance, Provenance::Keyword);
}

#[tokio::test]
async fn test_ties_keep_first_seen_order_and_truncate() {
    let index = Arc::new(FakeIndex::new(vec![
        ("first", "x", 0.5),
        ("second", "y", 0.1),
        ("third", "z", 0.3),
    ]));
    let r = retriever(index, vec![], Arc::new(ConstantReranker));
    let out = r.retrieve("anything", 2, None).await.unwrap();
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].id, "first");
    assert_eq!(out[1].id, "second");
    assert!((out[0].score - 0.5).abs() < 1e-6);
}

#[tokio::test]
async fn test_rerank_failure_keeps_initial_scores() {
    let index = Arc::new(FakeIndex::new(vec![("a", "x", 0.6), ("b", "y", 0.2)]));
    let r = retriever(index, vec![], Arc::new(BrokenReranker));
    let out = r.retrieve("q", 5, None).await.unwrap();
    assert_eq!(out[0].id, "b");
    assert!((out[0].score - 0.8).abs() < 1e-6);
}

#[tokio::test]
async fn test_cache_hit_skips_search() {
    let index = Arc::new(FakeIndex::new(vec![("a", "alpha", 0.1)]));
    let embedder = Arc::new(CountingEmbedder(AtomicUsize::new(0)));
    let r = HybridRetriever::new(
        embedder.clone(),
        index.clone(),
        Arc::new(FakeKeywords(vec![])),
        Arc::new(LexicalReranker),
        RetrieverSettings::default(),
    );

    let first = r.retrieve("alpha", 2, None).await.unwrap();
    let second = r.retrieve("alpha", 2, None).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(index.calls.load(Ordering::SeqCst), 1);
    assert_eq!(embedder.0.load(Ordering::SeqCst), 1);

    // A different top_k is a different cache entry
    r.retrieve("alpha", 1, None).await.unwrap();
    assert_eq!(index.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_empty_results_are_not_cached() {
    let index = Arc::new(FakeIndex::new(vec![]));
    let r = retriever(index, vec![], Arc::new(LexicalReranker));
    assert!(r.retrieve("nothing", 1, None).await.unwrap().is_empty());
    assert_eq!(r.cache().len().await, 0);
}

#[tokio::test]
async fn test_top_k_zero_returns_nothing() {
    let index = Arc::new(FakeIndex::new(vec![("a", "alpha", 0.1)]));
    let r = retriever(index.clone(), vec![], Arc::new(LexicalReranker));
    assert!(r.retrieve("alpha", 0, None).await.unwrap().is_empty());
    assert_eq!(index.calls.load(Ordering::SeqCst), 0);
}
