//! Retrieval index - owns the indexing and querying contract
//!
//! Embeddings and similarity come from external providers; this layer
//! owns record membership, the ranking/filtering contract, and the
//! per-service staleness setting.

use std::sync::Arc;
use std::time::Duration;

use docfacts_core::{Chunk, Filter};
use docfacts_db::{ChunkHit, IndexedChunk, Repository};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::{AgentError, Embedder, Result};

/// Default staleness bound between an `index` call and query visibility.
pub const DEFAULT_TARGET_LAG: Duration = Duration::from_secs(86_400);

/// One record submitted for indexing: chunk text plus the attributes it
/// can be filtered on at query time.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub source_path: String,
    pub sequence_index: usize,
    pub text: String,
    pub attributes: serde_json::Map<String, Value>,
}

impl IndexRecord {
    /// Standard record for a chunk: `relative_path` is always filterable.
    pub fn from_chunk(chunk: &Chunk) -> Self {
        let mut attributes = serde_json::Map::new();
        attributes.insert("relative_path".into(), json!(chunk.source_path));
        Self {
            source_path: chunk.source_path.clone(),
            sequence_index: chunk.sequence_index,
            text: chunk.text.clone(),
            attributes,
        }
    }
}

/// A record that could not be indexed, with the reason. The batch
/// continues past these; callers surface them in their summaries.
#[derive(Debug, Clone)]
pub struct IndexFailure {
    pub source_path: String,
    pub sequence_index: usize,
    pub reason: String,
}

/// Outcome of one `index` call
#[derive(Debug, Default)]
pub struct IndexReport {
    pub indexed: usize,
    pub failures: Vec<IndexFailure>,
}

/// Ordered retrieval hits, relevance-descending, stable on ties.
#[derive(Debug, Default)]
pub struct RetrievalResult {
    pub hits: Vec<ChunkHit>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.hits.iter().map(|h| h.text.as_str())
    }
}

/// A logical retrieval service over one corpus.
#[derive(Clone)]
pub struct SearchIndex {
    repo: Repository,
    embedder: Arc<dyn Embedder>,
    service: String,
    target_lag: Duration,
    // Serializes the replace-contents section per service instance.
    writer: Arc<Mutex<()>>,
}

impl SearchIndex {
    /// Create an index handle for a named logical service.
    pub fn new(repo: Repository, embedder: Arc<dyn Embedder>, service: impl Into<String>) -> Self {
        Self {
            repo,
            embedder,
            service: service.into(),
            target_lag: DEFAULT_TARGET_LAG,
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Set the staleness bound recorded for this service. Queries may
    /// lag the latest `index` call by at most this interval; the
    /// embedded engine refreshes synchronously, so the observed lag is
    /// always within the bound.
    pub fn with_target_lag(mut self, target_lag: Duration) -> Self {
        self.target_lag = target_lag;
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Replace this service's contents with the given records.
    ///
    /// Each record is embedded in passage mode; a record whose embedding
    /// fails is reported and skipped, the rest of the batch proceeds.
    #[instrument(skip(self, records))]
    pub async fn index(&self, records: Vec<IndexRecord>) -> Result<IndexReport> {
        // Single-writer section: two replaces for the same service must
        // not interleave.
        let _guard = self.writer.lock().await;

        let mut chunks = Vec::with_capacity(records.len());
        let mut failures = Vec::new();

        for (ordinal, record) in records.into_iter().enumerate() {
            match self.embedder.embed(&record.text, false).await {
                Ok(embedding) => chunks.push(IndexedChunk {
                    id: None,
                    service: self.service.clone(),
                    source_path: record.source_path,
                    text: record.text,
                    sequence_index: record.sequence_index as i64,
                    ordinal: ordinal as i64,
                    attributes: record.attributes,
                    embedding,
                    created_at: chrono::Utc::now(),
                }),
                Err(err) => {
                    warn!(
                        "Embedding failed for {}#{}: {}",
                        record.source_path, record.sequence_index, err
                    );
                    failures.push(IndexFailure {
                        source_path: record.source_path,
                        sequence_index: record.sequence_index,
                        reason: err.to_string(),
                    });
                }
            }
        }

        let indexed = self
            .repo
            .replace_service_chunks(&self.service, chunks)
            .await?;
        self.repo
            .upsert_service(&self.service, self.target_lag.as_secs() as i64)
            .await?;

        info!(
            "Indexed {} chunks for service {} ({} failures)",
            indexed,
            self.service,
            failures.len()
        );

        Ok(IndexReport { indexed, failures })
    }

    /// Rank this service's chunks against a query.
    ///
    /// The filter is applied before truncating to `k`; a filter matching
    /// nothing yields an empty result, not an error.
    #[instrument(skip(self, filter))]
    pub async fn query(
        &self,
        text: &str,
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<RetrievalResult> {
        if k == 0 {
            return Err(AgentError::InvalidParameter("k must be positive".into()));
        }

        let embedding = self.embedder.embed(text, true).await?;
        let hits = self
            .repo
            .search_chunks(&self.service, embedding, k, filter)
            .await?;

        Ok(RetrievalResult { hits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{embedding, StubEmbedder};
    use docfacts_core::chunk_text;
    use docfacts_db::{init_memory, Repository};

    async fn test_index(embedder: StubEmbedder) -> SearchIndex {
        let db = init_memory().await.expect("Failed to init db");
        SearchIndex::new(Repository::new(db), Arc::new(embedder), "reports")
    }

    fn record(path: &str, seq: usize, text: &str) -> IndexRecord {
        IndexRecord::from_chunk(&chunk_text(path, text, 500, 0).unwrap()[seq])
    }

    #[tokio::test]
    async fn indexing_continues_past_failed_records() {
        let embedder = StubEmbedder::new(embedding(1.0, 0.0)).failing_on("bad chunk");
        let index = test_index(embedder).await;

        let records = vec![
            record("a.pdf", 0, "good chunk"),
            record("b.pdf", 0, "bad chunk"),
            record("c.pdf", 0, "another good chunk"),
        ];
        let report = index.index(records).await.unwrap();

        assert_eq!(report.indexed, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].source_path, "b.pdf");
        assert!(!report.failures[0].reason.is_empty());
    }

    #[tokio::test]
    async fn reindex_replaces_prior_contents() {
        let embedder = StubEmbedder::new(embedding(1.0, 0.0));
        let index = test_index(embedder).await;

        index
            .index(vec![record("a.pdf", 0, "first generation")])
            .await
            .unwrap();
        index
            .index(vec![record("a.pdf", 0, "second generation")])
            .await
            .unwrap();

        let result = index.query("anything", 10, None).await.unwrap();
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].text, "second generation");
    }

    #[tokio::test]
    async fn query_respects_k_and_rejects_zero() {
        let embedder = StubEmbedder::new(embedding(1.0, 0.0));
        let index = test_index(embedder).await;

        let records = (0..5)
            .map(|i| IndexRecord {
                source_path: "a.pdf".into(),
                sequence_index: i,
                text: format!("chunk {}", i),
                attributes: serde_json::Map::new(),
            })
            .collect();
        index.index(records).await.unwrap();

        let result = index.query("anything", 3, None).await.unwrap();
        assert_eq!(result.hits.len(), 3);

        let err = index.query("anything", 0, None).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn unmatched_filter_yields_empty_result() {
        let embedder = StubEmbedder::new(embedding(1.0, 0.0));
        let index = test_index(embedder).await;

        index
            .index(vec![record("a.pdf", 0, "some text")])
            .await
            .unwrap();

        let filter = Filter::eq("relative_path", "other.pdf");
        let result = index.query("anything", 5, Some(&filter)).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn target_lag_is_recorded_with_the_service() {
        let embedder = StubEmbedder::new(embedding(1.0, 0.0));
        let db = init_memory().await.unwrap();
        let repo = Repository::new(db);
        let index = SearchIndex::new(repo.clone(), Arc::new(embedder), "reports")
            .with_target_lag(Duration::from_secs(3600));

        index
            .index(vec![record("a.pdf", 0, "some text")])
            .await
            .unwrap();

        let state = repo.get_service("reports").await.unwrap().unwrap();
        assert_eq!(state.target_lag_secs, 3600);
    }
}
