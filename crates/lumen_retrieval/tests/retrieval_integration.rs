//! End-to-end retrieval over a real SQLite store.
//!
//! Uses tempfile::TempDir for isolated databases and the offline embedder /
//! reranker so no model download is needed.

use lumen_core::config::{EmbedderKind, RerankerKind, RetrievalConfig};
use lumen_core::{Metadata, Provenance};
use lumen_retrieval::{Embedder, HashingEmbedder, PassageRecord, PassageRetriever, VectorIndex};
use serde_json::json;

const CORPUS: &[(&str, &str, &str)] = &[
    (
        "k8s-pod",
        "A Pod is the smallest deployable unit of computing that you can create and manage in Kubernetes.",
        "kubernetes.pdf",
    ),
    (
        "k8s-svc",
        "A Service in Kubernetes exposes a network application running as one or more Pods.",
        "kubernetes.pdf",
    ),
    (
        "cooking",
        "Simmer the tomatoes for twenty minutes before adding basil.",
        "recipes.pdf",
    ),
];

fn offline_config(dir: &tempfile::TempDir) -> RetrievalConfig {
    RetrievalConfig {
        db_path: dir.path().join("corpus.db").to_string_lossy().into_owned(),
        embedder: EmbedderKind::Hashing,
        reranker: RerankerKind::Lexical,
        ..RetrievalConfig::default()
    }
}

async fn seed(store: &lumen_retrieval::SqlitePassageStore) {
    let embedder = HashingEmbedder::default();
    let texts: Vec<String> = CORPUS.iter().map(|(_, t, _)| t.to_string()).collect();
    let ids: Vec<String> = CORPUS.iter().map(|(id, _, _)| id.to_string()).collect();
    let metas: Vec<Metadata> = CORPUS
        .iter()
        .map(|(_, _, src)| {
            let mut m = Metadata::new();
            m.insert("source".into(), json!(src));
            m
        })
        .collect();
    let embeddings = embedder.embed_batch(&texts).await.unwrap();
    store.add(&texts, &embeddings, &metas, &ids).await.unwrap();
}

#[tokio::test]
async fn test_relevant_query_clears_gate_threshold() {
    let dir = tempfile::TempDir::new().unwrap();
    let (store, retriever) = lumen_retrieval::open(&offline_config(&dir)).await.unwrap();
    seed(&store).await;

    let top = retriever
        .retrieve("What is a Kubernetes Pod?", 1, None)
        .await
        .unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].id, "k8s-pod");
    assert!(top[0].score >= 0.75, "score was {}", top[0].score);
    // Found by both the dense scan and the LIKE search
    assert_eq!(top[0].provenance, Provenance::Hybrid);
}

#[tokio::test]
async fn test_gibberish_query_scores_below_gate() {
    let dir = tempfile::TempDir::new().unwrap();
    let (store, retriever) = lumen_retrieval::open(&offline_config(&dir)).await.unwrap();
    seed(&store).await;

    let top = retriever
        .retrieve("sflkjsdflkjsdflkjsdf", 1, None)
        .await
        .unwrap();
    assert!(top.iter().all(|p| p.score < 0.75));
}

#[tokio::test]
async fn test_empty_corpus_returns_nothing() {
    let dir = tempfile::TempDir::new().unwrap();
    let (_store, retriever) = lumen_retrieval::open(&offline_config(&dir)).await.unwrap();
    let top = retriever
        .retrieve("What is a Kubernetes Pod?", 1, None)
        .await
        .unwrap();
    assert!(top.is_empty());
}

#[tokio::test]
async fn test_results_bounded_sorted_and_filtered() {
    let dir = tempfile::TempDir::new().unwrap();
    let (store, retriever) = lumen_retrieval::open(&offline_config(&dir)).await.unwrap();
    seed(&store).await;

    let out = retriever.retrieve("Kubernetes Pods", 2, None).await.unwrap();
    assert!(out.len() <= 2);
    assert!(out.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(out.iter().all(|p| (0.0..=1.0).contains(&p.score)));

    let mut filter = Metadata::new();
    filter.insert("source".into(), json!("recipes.pdf"));
    let out = retriever
        .retrieve("Kubernetes Pods", 5, Some(&filter))
        .await
        .unwrap();
    assert!(out.iter().all(|p| p.id == "cooking"));
}

#[tokio::test]
async fn test_keyword_only_passage_is_found() {
    let dir = tempfile::TempDir::new().unwrap();
    let (store, retriever) = lumen_retrieval::open(&offline_config(&dir)).await.unwrap();

    // No embedding stored: only the keyword pass can see it
    let mut rec = PassageRecord::new("glossary", "Glossary entry.");
    rec.keywords = vec!["etcd".into(), "consensus".into()];
    store.upsert_passage(&rec, None).await.unwrap();

    let out = retriever.retrieve("how does etcd work", 3, None).await.unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].provenance, Provenance::Keyword);
}
