use crate::embedding::{cosine_similarity, Embedding};
use crate::index::{matches_filter, KeywordStore, PassageRecord, VectorHit, VectorIndex};
use anyhow::{Context, Result};
use async_trait::async_trait;
use lumen_core::Metadata;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

/// An ingested source document. Passages reference it by `document_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub file_hash: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub chunk_count: i64,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub created_at: i64,
}

/// SQLite-backed passage store. Serves both as the vector index (brute-force
/// cosine scan over bincode-encoded embeddings) and as the keyword store.
#[derive(Clone)]
pub struct SqlitePassageStore {
    pool: Pool<Sqlite>,
}

impl SqlitePassageStore {
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref().display().to_string();
        let in_memory = path == ":memory:";
        let db_url = format!("sqlite://{}?mode=rwc", path);

        let pool = SqlitePoolOptions::new()
            // Each in-memory connection would otherwise see its own database
            .max_connections(if in_memory { 1 } else { 8 })
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA foreign_keys = ON").execute(conn).await?;
                    Ok(())
                })
            })
            .connect(&db_url)
            .await
            .context("Failed to connect to SQLite database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                file_hash TEXT UNIQUE,
                status TEXT NOT NULL DEFAULT 'completed',
                chunk_count INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create documents table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS passages (
                id TEXT PRIMARY KEY,
                document_id TEXT REFERENCES documents(id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                summary TEXT,
                keywords TEXT NOT NULL DEFAULT '[]',
                metadata TEXT NOT NULL DEFAULT '{}',
                embedding BLOB,
                created_at INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create passages table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_passages_document ON passages(document_id)")
            .execute(&self.pool)
            .await
            .context("Failed to create passages document index")?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------

    pub async fn insert_document(&self, doc: &DocumentRecord) -> Result<()> {
        let metadata = serde_json::to_string(&doc.metadata)?;
        let created_at = if doc.created_at == 0 {
            chrono::Utc::now().timestamp()
        } else {
            doc.created_at
        };
        sqlx::query(
            r#"
            INSERT INTO documents (id, filename, file_hash, status, chunk_count, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                filename = excluded.filename,
                file_hash = excluded.file_hash,
                status = excluded.status,
                chunk_count = excluded.chunk_count,
                metadata = excluded.metadata
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.filename)
        .bind(&doc.file_hash)
        .bind(&doc.status)
        .bind(doc.chunk_count)
        .bind(metadata)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert document")?;
        Ok(())
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(
            "SELECT id, filename, file_hash, status, chunk_count, metadata, created_at FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch document")?;
        row.map(|r| row_to_document(&r)).transpose()
    }

    pub async fn find_document_by_hash(&self, file_hash: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(
            "SELECT id, filename, file_hash, status, chunk_count, metadata, created_at FROM documents WHERE file_hash = ?",
        )
        .bind(file_hash)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch document by hash")?;
        row.map(|r| row_to_document(&r)).transpose()
    }

    pub async fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(
            "SELECT id, filename, file_hash, status, chunk_count, metadata, created_at FROM documents ORDER BY created_at DESC, rowid DESC",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list documents")?;
        rows.iter().map(row_to_document).collect()
    }

    /// Deletes the document and, through the foreign key, its passages.
    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete document")?;
        Ok(res.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // Passages
    // ------------------------------------------------------------------

    pub async fn upsert_passage(
        &self,
        passage: &PassageRecord,
        embedding: Option<&Embedding>,
    ) -> Result<()> {
        let embedding_blob = match embedding {
            Some(emb) => Some(bincode::serialize(emb).context("Failed to serialize embedding")?),
            None => None,
        };
        let keywords = serde_json::to_string(&passage.keywords)?;
        let metadata = serde_json::to_string(&passage.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO passages (id, document_id, content, summary, keywords, metadata, embedding, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                document_id = excluded.document_id,
                content = excluded.content,
                summary = excluded.summary,
                keywords = excluded.keywords,
                metadata = excluded.metadata,
                embedding = COALESCE(excluded.embedding, passages.embedding)
            "#,
        )
        .bind(&passage.id)
        .bind(&passage.document_id)
        .bind(&passage.content)
        .bind(&passage.summary)
        .bind(keywords)
        .bind(metadata)
        .bind(embedding_blob)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to upsert passage")?;
        Ok(())
    }

    pub async fn get_passage(&self, id: &str) -> Result<Option<PassageRecord>> {
        let row = sqlx::query(
            "SELECT id, document_id, content, summary, keywords, metadata FROM passages WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch passage")?;
        row.map(|r| row_to_passage(&r)).transpose()
    }

    pub async fn passages_for_document(&self, document_id: &str) -> Result<Vec<PassageRecord>> {
        let rows = sqlx::query(
            "SELECT id, document_id, content, summary, keywords, metadata FROM passages WHERE document_id = ? ORDER BY rowid",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch document passages")?;
        rows.iter().map(row_to_passage).collect()
    }

    pub async fn delete_passage(&self, id: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM passages WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete passage")?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn count_passages(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM passages")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count passages")?;
        Ok(row.get("n"))
    }
}

fn parse_metadata(raw: &str) -> Metadata {
    match serde_json::from_str(raw) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("Unreadable passage metadata, treating as empty: {}", e);
            Metadata::new()
        }
    }
}

fn row_to_document(row: &SqliteRow) -> Result<DocumentRecord> {
    let metadata: String = row.try_get("metadata")?;
    Ok(DocumentRecord {
        id: row.try_get("id")?,
        filename: row.try_get("filename")?,
        file_hash: row.try_get("file_hash")?,
        status: row.try_get("status")?,
        chunk_count: row.try_get("chunk_count")?,
        metadata: parse_metadata(&metadata),
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_passage(row: &SqliteRow) -> Result<PassageRecord> {
    let keywords: String = row.try_get("keywords")?;
    let metadata: String = row.try_get("metadata")?;
    Ok(PassageRecord {
        id: row.try_get("id")?,
        document_id: row.try_get("document_id")?,
        content: row.try_get("content")?,
        summary: row.try_get("summary")?,
        keywords: serde_json::from_str(&keywords).unwrap_or_default(),
        metadata: parse_metadata(&metadata),
    })
}

/// Escape LIKE wildcards so a term only ever matches literally.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[async_trait]
impl VectorIndex for SqlitePassageStore {
    async fn query(
        &self,
        embedding: &[f32],
        n: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<VectorHit>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT id, content, metadata, embedding FROM passages WHERE embedding IS NOT NULL ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch passages for vector search")?;

        let mut hits: Vec<VectorHit> = Vec::new();
        for row in rows {
            let metadata_raw: String = row.get("metadata");
            let metadata = parse_metadata(&metadata_raw);
            if !matches_filter(&metadata, filter) {
                continue;
            }
            let blob: Vec<u8> = row.get("embedding");
            let Ok(stored) = bincode::deserialize::<Vec<f32>>(&blob) else {
                tracing::debug!("Skipping passage with undecodable embedding");
                continue;
            };
            hits.push(VectorHit {
                id: row.get("id"),
                text: row.get("content"),
                metadata,
                distance: 1.0 - cosine_similarity(embedding, &stored),
            });
        }

        // Stable: equal distances keep insertion order
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(n);
        Ok(hits)
    }

    async fn add(
        &self,
        documents: &[String],
        embeddings: &[Embedding],
        metadatas: &[Metadata],
        ids: &[String],
    ) -> Result<()> {
        if documents.len() != ids.len()
            || embeddings.len() != ids.len()
            || metadatas.len() != ids.len()
        {
            anyhow::bail!(
                "add() length mismatch: {} documents, {} embeddings, {} metadatas, {} ids",
                documents.len(),
                embeddings.len(),
                metadatas.len(),
                ids.len()
            );
        }

        for (((text, emb), meta), id) in documents.iter().zip(embeddings).zip(metadatas).zip(ids) {
            let mut record = PassageRecord::new(id.clone(), text.clone());
            record.metadata = meta.clone();
            if let Some(doc) = meta.get("document_id").and_then(|v| v.as_str()) {
                record.document_id = Some(doc.to_string());
            }
            self.upsert_passage(&record, Some(emb)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl KeywordStore for SqlitePassageStore {
    async fn keyword_search(
        &self,
        terms: &[String],
        limit: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<PassageRecord>> {
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let clause = "(content LIKE ? ESCAPE '\\' OR IFNULL(summary, '') LIKE ? ESCAPE '\\' OR keywords LIKE ? ESCAPE '\\')";
        let where_sql = vec![clause; terms.len()].join(" OR ");
        let sql = format!(
            "SELECT id, document_id, content, summary, keywords, metadata FROM passages WHERE {} ORDER BY rowid",
            where_sql
        );

        let mut query = sqlx::query(&sql);
        for term in terms {
            let pattern = like_pattern(term);
            query = query.bind(pattern.clone()).bind(pattern.clone()).bind(pattern);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .context("Failed to run keyword search")?;

        let mut out = Vec::new();
        for row in &rows {
            let record = row_to_passage(row)?;
            if matches_filter(&record.metadata, filter) {
                out.push(record);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("pod"), "%pod%");
        assert_eq!(like_pattern("100%"), "%100\\%%");
        assert_eq!(like_pattern("a_b"), "%a\\_b%");
    }

    #[tokio::test]
    async fn test_document_crud_cascades_to_passages() {
        let store = SqlitePassageStore::new(":memory:").await.unwrap();
        let doc = DocumentRecord {
            id: "doc-1".into(),
            filename: "k8s.pdf".into(),
            file_hash: Some("abc".into()),
            status: "completed".into(),
            chunk_count: 1,
            metadata: Metadata::new(),
            created_at: 0,
        };
        store.insert_document(&doc).await.unwrap();

        let mut p = PassageRecord::new("p-1", "A Pod is the smallest deployable unit.");
        p.document_id = Some("doc-1".into());
        store.upsert_passage(&p, Some(&vec![1.0, 0.0])).await.unwrap();

        assert_eq!(store.count_passages().await.unwrap(), 1);
        assert!(store.find_document_by_hash("abc").await.unwrap().is_some());
        assert_eq!(store.passages_for_document("doc-1").await.unwrap().len(), 1);
        assert_eq!(store.list_documents().await.unwrap().len(), 1);

        let loaded = store.get_passage("p-1").await.unwrap().unwrap();
        assert_eq!(loaded.document_id.as_deref(), Some("doc-1"));
        assert!(store.upsert_passage(&PassageRecord::new("p-2", "loose"), None).await.is_ok());
        assert!(store.delete_passage("p-2").await.unwrap());
        assert!(!store.delete_passage("p-2").await.unwrap());

        assert!(store.delete_document("doc-1").await.unwrap());
        assert!(store.get_document("doc-1").await.unwrap().is_none());
        assert_eq!(store.count_passages().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_vector_query_orders_by_distance_and_filters() {
        let store = SqlitePassageStore::new(":memory:").await.unwrap();
        let mut m_a = Metadata::new();
        m_a.insert("lang".into(), json!("en"));
        let mut m_b = Metadata::new();
        m_b.insert("lang".into(), json!("de"));

        store
            .add(
                &["near".into(), "far".into(), "german".into()],
                &[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.1]],
                &[m_a.clone(), m_a.clone(), m_b],
                &["a".into(), "b".into(), "c".into()],
            )
            .await
            .unwrap();

        let hits = store.query(&[1.0, 0.0], 10, None).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].distance.abs() < 1e-5);
        assert_eq!(hits[2].id, "b");

        let hits = store.query(&[1.0, 0.0], 10, Some(&m_a)).await.unwrap();
        assert_eq!(hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);

        let hits = store.query(&[1.0, 0.0], 1, None).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_add_rejects_mismatched_lengths() {
        let store = SqlitePassageStore::new(":memory:").await.unwrap();
        let err = store
            .add(&["x".into()], &[], &[Metadata::new()], &["id".into()])
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_keyword_search_matches_content_summary_and_keywords() {
        let store = SqlitePassageStore::new(":memory:").await.unwrap();

        store
            .upsert_passage(&PassageRecord::new("1", "Kubernetes schedules Pods onto nodes."), None)
            .await
            .unwrap();

        let mut by_summary = PassageRecord::new("2", "Unrelated body text.");
        by_summary.summary = Some("Explains the POD lifecycle".into());
        store.upsert_passage(&by_summary, None).await.unwrap();

        let mut by_keyword = PassageRecord::new("3", "Also unrelated.");
        by_keyword.keywords = vec!["pod".into(), "container".into()];
        store.upsert_passage(&by_keyword, None).await.unwrap();

        store
            .upsert_passage(&PassageRecord::new("4", "Nothing to see here."), None)
            .await
            .unwrap();

        let found = store
            .keyword_search(&["pod".into()], 10, None)
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);

        let limited = store.keyword_search(&["pod".into()], 2, None).await.unwrap();
        assert_eq!(limited.len(), 2);

        assert!(store.keyword_search(&[], 10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_keeps_embedding_when_none_given() {
        let store = SqlitePassageStore::new(":memory:").await.unwrap();
        let p = PassageRecord::new("p", "text");
        store.upsert_passage(&p, Some(&vec![0.5, 0.5])).await.unwrap();
        store.upsert_passage(&p, None).await.unwrap();
        let hits = store.query(&[0.5, 0.5], 1, None).await.unwrap();
        assert_eq!(hits.len(), 1);
    }
}
