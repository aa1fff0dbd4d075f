//! Repository pattern for database operations

use crate::{DbConnection, DbError, Result};
use chrono::{DateTime, Utc};
use docfacts_core::{Document, DocumentStatus, ExtractionRecord, Filter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::RecordId;
use tracing::instrument;

/// Repository for all database operations
#[derive(Clone)]
pub struct Repository {
    db: DbConnection,
}

impl Repository {
    /// Create a new repository
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    // ==========================================
    // DOCUMENT OPERATIONS
    // ==========================================

    /// Create a new document record
    #[instrument(skip(self, document))]
    pub async fn create_document(&self, document: Document) -> Result<Document> {
        // Use SurrealDB's high-level create API so we get back the stored
        // record including its generated `id`.
        let created: Option<Document> = self.db.create("document").content(document).await?;

        created.ok_or_else(|| DbError::CreateFailed("document".into()))
    }

    /// Look a document up by its corpus-relative path
    #[instrument(skip(self))]
    pub async fn get_document_by_path(&self, path: &str) -> Result<Option<Document>> {
        let documents: Vec<Document> = self
            .db
            .query("SELECT * FROM document WHERE path = $path")
            .bind(("path", path.to_string()))
            .await?
            .take(0)?;

        Ok(documents.into_iter().next())
    }

    /// Remove a document record (used by forced re-ingestion)
    #[instrument(skip(self))]
    pub async fn delete_document_by_path(&self, path: &str) -> Result<()> {
        self.db
            .query("DELETE document WHERE path = $path")
            .bind(("path", path.to_string()))
            .await?;

        Ok(())
    }

    /// Advance a document's pipeline state
    #[instrument(skip(self))]
    pub async fn update_document_status(&self, path: &str, status: DocumentStatus) -> Result<()> {
        self.db
            .query("UPDATE document SET status = $status WHERE path = $path")
            .bind(("path", path.to_string()))
            .bind(("status", status))
            .await?;

        Ok(())
    }

    /// List recent documents, newest first
    #[instrument(skip(self))]
    pub async fn list_documents(&self, limit: usize) -> Result<Vec<Document>> {
        let mut documents: Vec<Document> = self.db.select("document").await?;

        // Sort and truncate in Rust to avoid SurrealDB multi-result
        // `take` issues with full records.
        documents.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));
        if documents.len() > limit {
            documents.truncate(limit);
        }

        Ok(documents)
    }

    /// Documents currently in the given pipeline state
    #[instrument(skip(self))]
    pub async fn list_documents_by_status(
        &self,
        status: DocumentStatus,
    ) -> Result<Vec<Document>> {
        let documents: Vec<Document> = self
            .db
            .query("SELECT * FROM document WHERE status = $status")
            .bind(("status", status))
            .await?
            .take(0)?;

        Ok(documents)
    }

    // ==========================================
    // CHUNK / RETRIEVAL OPERATIONS
    // ==========================================

    /// Replace a logical service's indexed chunks wholesale.
    ///
    /// Re-indexing the same corpus replaces prior contents; there is no
    /// per-chunk deletion API. Callers serialize invocations per service.
    #[instrument(skip(self, chunks))]
    pub async fn replace_service_chunks(
        &self,
        service: &str,
        chunks: Vec<IndexedChunk>,
    ) -> Result<usize> {
        self.db
            .query("DELETE chunk WHERE service = $service")
            .bind(("service", service.to_string()))
            .await?;

        let mut stored = 0;
        for chunk in chunks {
            let created: Option<IndexedChunk> = self.db.create("chunk").content(chunk).await?;
            if created.is_some() {
                stored += 1;
            }
        }

        Ok(stored)
    }

    /// Rank a service's chunks against a query embedding.
    ///
    /// Cosine similarity in the embedding space, attribute filter applied
    /// before the LIMIT, ties broken by insertion ordinal so ordering is
    /// stable. A filter that matches nothing yields an empty vector.
    #[instrument(skip(self, embedding, filter))]
    pub async fn search_chunks(
        &self,
        service: &str,
        embedding: Vec<f32>,
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<ChunkHit>> {
        let mut conditions = String::new();
        let mut binds: Vec<(String, Value)> = Vec::new();
        if let Some(filter) = filter {
            for (i, (key, value)) in filter.terms().into_iter().enumerate() {
                if key.is_empty()
                    || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    return Err(DbError::QueryFailed(format!(
                        "invalid attribute name: {:?}",
                        key
                    )));
                }
                conditions.push_str(&format!(" AND attributes.{} = $attr_{}", key, i));
                binds.push((format!("attr_{}", i), value.clone()));
            }
        }

        let sql = format!(
            r#"
            SELECT
                text,
                attributes,
                ordinal,
                vector::similarity::cosine(embedding, $embedding) AS relevance_score
            FROM chunk
            WHERE service = $service AND embedding IS NOT NONE{}
            ORDER BY relevance_score DESC, ordinal ASC
            LIMIT $limit
            "#,
            conditions
        );

        let mut query = self
            .db
            .query(sql)
            .bind(("service", service.to_string()))
            .bind(("embedding", embedding))
            .bind(("limit", k));
        for (name, value) in binds {
            query = query.bind((name, value));
        }

        let hits: Vec<ChunkHit> = query.await?.take(0)?;
        Ok(hits)
    }

    /// Number of chunks currently indexed for a service
    #[instrument(skip(self))]
    pub async fn count_service_chunks(&self, service: &str) -> Result<i64> {
        let counts: Vec<i64> = self
            .db
            .query("RETURN (SELECT count() FROM chunk WHERE service = $service GROUP ALL)[0].count ?? 0")
            .bind(("service", service.to_string()))
            .await?
            .take(0)?;

        Ok(counts.into_iter().next().unwrap_or(0))
    }

    // ==========================================
    // SERVICE STATE
    // ==========================================

    /// Record (or refresh) a logical service and its staleness contract
    #[instrument(skip(self))]
    pub async fn upsert_service(&self, name: &str, target_lag_secs: i64) -> Result<ServiceState> {
        let result: Option<ServiceState> = self
            .db
            .query(
                r#"
                INSERT INTO service (name, target_lag_secs, refreshed_at)
                VALUES ($name, $target_lag_secs, time::now())
                ON DUPLICATE KEY UPDATE
                    target_lag_secs = $target_lag_secs,
                    refreshed_at = time::now()
                "#,
            )
            .bind(("name", name.to_string()))
            .bind(("target_lag_secs", target_lag_secs))
            .await?
            .take(0)?;

        result.ok_or_else(|| DbError::CreateFailed("service".into()))
    }

    /// Staleness contract for a named service, if it has been indexed
    #[instrument(skip(self))]
    pub async fn get_service(&self, name: &str) -> Result<Option<ServiceState>> {
        let services: Vec<ServiceState> = self
            .db
            .query("SELECT * FROM service WHERE name = $name")
            .bind(("name", name.to_string()))
            .await?
            .take(0)?;

        Ok(services.into_iter().next())
    }

    // ==========================================
    // EXTRACTION OPERATIONS
    // ==========================================

    /// Persist a validated extraction record
    #[instrument(skip(self, record))]
    pub async fn create_extraction(&self, record: ExtractionRecord) -> Result<ExtractionRecord> {
        let created: Option<ExtractionRecord> =
            self.db.create("extraction").content(record).await?;

        created.ok_or_else(|| DbError::CreateFailed("extraction".into()))
    }

    /// Extraction records for one document, newest first
    #[instrument(skip(self))]
    pub async fn get_extractions_for(&self, path: &str) -> Result<Vec<ExtractionRecord>> {
        let mut records: Vec<ExtractionRecord> = self
            .db
            .query("SELECT * FROM extraction WHERE source_path = $path")
            .bind(("path", path.to_string()))
            .await?
            .take(0)?;

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    // ==========================================
    // STATS
    // ==========================================

    /// Get database statistics
    #[instrument(skip(self))]
    pub async fn get_stats(&self) -> Result<DbStats> {
        let stats: Vec<DbStats> = self
            .db
            .query(
                r#"
                RETURN {
                    document_count: (SELECT count() FROM document GROUP ALL)[0].count ?? 0,
                    errored_count: (SELECT count() FROM document WHERE error_info IS NOT NONE GROUP ALL)[0].count ?? 0,
                    chunk_count: (SELECT count() FROM chunk GROUP ALL)[0].count ?? 0,
                    extraction_count: (SELECT count() FROM extraction GROUP ALL)[0].count ?? 0
                }
                "#,
            )
            .await?
            .take(0)?;

        stats
            .into_iter()
            .next()
            .ok_or_else(|| DbError::QueryFailed("stats".into()))
    }
}

// ==========================================
// RESULT TYPES
// ==========================================

/// The retrieval index's own copy of one chunk, plus its attributes and
/// embedding. `ordinal` is the insertion position used for stable
/// tie-breaking at query time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub id: Option<RecordId>,
    pub service: String,
    pub source_path: String,
    pub text: String,
    pub sequence_index: i64,
    pub ordinal: i64,
    pub attributes: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
}

/// One ranked retrieval hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkHit {
    pub text: String,
    pub attributes: serde_json::Map<String, Value>,
    pub ordinal: i64,
    pub relevance_score: f32,
}

/// A logical retrieval service and its staleness contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceState {
    pub id: Option<RecordId>,
    pub name: String,
    pub target_lag_secs: i64,
    #[serde(skip_serializing)]
    pub refreshed_at: DateTime<Utc>,
}

/// Row counts surfaced by `docfacts stats`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DbStats {
    #[serde(default)]
    pub document_count: i64,
    #[serde(default)]
    pub errored_count: i64,
    #[serde(default)]
    pub chunk_count: i64,
    #[serde(default)]
    pub extraction_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_memory;
    use crate::schema::EMBEDDING_DIMENSION;
    use serde_json::json;

    /// Unit-ish embedding with weight on two fixed components, so cosine
    /// similarities are predictable.
    fn embedding(x: f32, y: f32) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIMENSION];
        v[0] = x;
        v[1] = y;
        v
    }

    fn chunk(service: &str, path: &str, seq: i64, ordinal: i64, text: &str, emb: Vec<f32>) -> IndexedChunk {
        let mut attributes = serde_json::Map::new();
        attributes.insert("relative_path".into(), json!(path));
        IndexedChunk {
            id: None,
            service: service.into(),
            source_path: path.into(),
            text: text.into(),
            sequence_index: seq,
            ordinal,
            attributes,
            embedding: emb,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_document() {
        let db = init_memory().await.unwrap();
        let repo = Repository::new(db);

        let document = Document::new("report.pdf", "Extracted text.");
        let created = repo.create_document(document).await.unwrap();
        assert!(created.id.is_some());

        let found = repo.get_document_by_path("report.pdf").await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().extracted_text, "Extracted text.");

        let missing = repo.get_document_by_path("absent.pdf").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_status_update_roundtrips() {
        let db = init_memory().await.unwrap();
        let repo = Repository::new(db);

        repo.create_document(Document::new("a.pdf", "text"))
            .await
            .unwrap();
        repo.update_document_status("a.pdf", DocumentStatus::Chunked)
            .await
            .unwrap();

        let doc = repo.get_document_by_path("a.pdf").await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Chunked);

        let chunked = repo
            .list_documents_by_status(DocumentStatus::Chunked)
            .await
            .unwrap();
        assert_eq!(chunked.len(), 1);
    }

    #[tokio::test]
    async fn test_replace_service_chunks_is_wholesale() {
        let db = init_memory().await.unwrap();
        let repo = Repository::new(db);

        let first = vec![
            chunk("reports", "a.pdf", 0, 0, "old one", embedding(1.0, 0.0)),
            chunk("reports", "a.pdf", 1, 1, "old two", embedding(1.0, 0.0)),
        ];
        assert_eq!(
            repo.replace_service_chunks("reports", first).await.unwrap(),
            2
        );

        let second = vec![chunk("reports", "a.pdf", 0, 0, "new", embedding(1.0, 0.0))];
        assert_eq!(
            repo.replace_service_chunks("reports", second).await.unwrap(),
            1
        );
        assert_eq!(repo.count_service_chunks("reports").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_ranks_by_cosine_and_truncates_to_k() {
        let db = init_memory().await.unwrap();
        let repo = Repository::new(db);

        let chunks = vec![
            chunk("reports", "a.pdf", 0, 0, "far", embedding(0.0, 1.0)),
            chunk("reports", "a.pdf", 1, 1, "near", embedding(1.0, 0.0)),
            chunk("reports", "a.pdf", 2, 2, "middle", embedding(1.0, 1.0)),
        ];
        repo.replace_service_chunks("reports", chunks).await.unwrap();

        let hits = repo
            .search_chunks("reports", embedding(1.0, 0.0), 2, None)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "near");
        assert_eq!(hits[1].text, "middle");
        assert!(hits[0].relevance_score >= hits[1].relevance_score);
    }

    #[tokio::test]
    async fn test_search_ties_break_by_ordinal() {
        let db = init_memory().await.unwrap();
        let repo = Repository::new(db);

        let chunks = vec![
            chunk("reports", "a.pdf", 0, 0, "first", embedding(1.0, 0.0)),
            chunk("reports", "a.pdf", 1, 1, "second", embedding(1.0, 0.0)),
            chunk("reports", "a.pdf", 2, 2, "third", embedding(1.0, 0.0)),
        ];
        repo.replace_service_chunks("reports", chunks).await.unwrap();

        let hits = repo
            .search_chunks("reports", embedding(1.0, 0.0), 3, None)
            .await
            .unwrap();

        let texts: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, ["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_search_filter_applies_before_truncation() {
        let db = init_memory().await.unwrap();
        let repo = Repository::new(db);

        let chunks = vec![
            chunk("reports", "a.pdf", 0, 0, "a close", embedding(1.0, 0.0)),
            chunk("reports", "b.pdf", 0, 1, "b close", embedding(1.0, 0.1)),
            chunk("reports", "b.pdf", 1, 2, "b far", embedding(0.0, 1.0)),
        ];
        repo.replace_service_chunks("reports", chunks).await.unwrap();

        // Filtering to b.pdf must not let a.pdf's closer chunk consume
        // the single result slot.
        let filter = Filter::eq("relative_path", "b.pdf");
        let hits = repo
            .search_chunks("reports", embedding(1.0, 0.0), 1, Some(&filter))
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "b close");
    }

    #[tokio::test]
    async fn test_search_unmatched_filter_is_empty_not_error() {
        let db = init_memory().await.unwrap();
        let repo = Repository::new(db);

        let chunks = vec![chunk("reports", "a.pdf", 0, 0, "text", embedding(1.0, 0.0))];
        repo.replace_service_chunks("reports", chunks).await.unwrap();

        let filter = Filter::eq("relative_path", "nope.pdf");
        let hits = repo
            .search_chunks("reports", embedding(1.0, 0.0), 5, Some(&filter))
            .await
            .unwrap();

        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_search_rejects_malformed_attribute_names() {
        let db = init_memory().await.unwrap();
        let repo = Repository::new(db);

        let filter = Filter::eq("relative_path = 1 OR 1", "x");
        let err = repo
            .search_chunks("reports", embedding(1.0, 0.0), 5, Some(&filter))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::QueryFailed(_)));
    }

    #[tokio::test]
    async fn test_service_state_upsert() {
        let db = init_memory().await.unwrap();
        let repo = Repository::new(db);

        let state = repo.upsert_service("reports", 86_400).await.unwrap();
        assert_eq!(state.name, "reports");
        assert_eq!(state.target_lag_secs, 86_400);

        let state = repo.upsert_service("reports", 3_600).await.unwrap();
        assert_eq!(state.target_lag_secs, 3_600);

        let fetched = repo.get_service("reports").await.unwrap().unwrap();
        assert_eq!(fetched.target_lag_secs, 3_600);
    }

    #[tokio::test]
    async fn test_extraction_records_roundtrip() {
        let db = init_memory().await.unwrap();
        let repo = Repository::new(db);

        let mut facts = std::collections::BTreeMap::new();
        facts.insert("net_income".to_string(), Some(42.0));
        let record = ExtractionRecord::new("a.pdf", "ctx", vec![facts]);

        let created = repo.create_extraction(record).await.unwrap();
        assert!(created.id.is_some());

        let records = repo.get_extractions_for("a.pdf").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].document_entities[0]["net_income"], Some(42.0));
    }

    #[tokio::test]
    async fn test_stats_counts() {
        let db = init_memory().await.unwrap();
        let repo = Repository::new(db);

        repo.create_document(Document::new("a.pdf", "text"))
            .await
            .unwrap();
        repo.create_document(Document::failed("b.pdf", "password protected"))
            .await
            .unwrap();

        let stats = repo.get_stats().await.unwrap();
        assert_eq!(stats.document_count, 2);
        assert_eq!(stats.errored_count, 1);
        assert_eq!(stats.chunk_count, 0);
    }
}
