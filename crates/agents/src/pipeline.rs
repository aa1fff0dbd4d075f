//! Pipeline coordinator - sequences ingestion, chunking, indexing and
//! extraction, tracking per-document state
//!
//! Parse+chunk and per-document extraction fan out on a bounded worker
//! pool; indexing is a barrier between them, since every chunk destined
//! for the shared index must be submitted before extraction queries it.

use std::sync::Arc;

use docfacts_core::{chunk_text, Chunk, Document, DocumentStatus, ExtractionSchema, Filter};
use docfacts_db::Repository;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    AgentError, DocumentParser, Extractor, IndexFailure, IndexRecord, Result, SearchIndex,
};

/// Operational knobs for one pipeline instance.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Worker-pool bound for parse/chunk and extraction fan-out
    pub concurrency: usize,
    /// Re-process documents that already reached a terminal state
    pub force: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 100,
            concurrency: 4,
            force: false,
        }
    }
}

/// One extraction task over a corpus: the ordered queries, the per-query
/// result count, an optional extra filter, the declared fields and the
/// system prompt.
#[derive(Debug, Clone)]
pub struct ExtractionTask {
    pub queries: Vec<String>,
    pub k_per_query: usize,
    pub filter: Option<Filter>,
    pub schema: ExtractionSchema,
    pub system_prompt: String,
}

/// Summary of one ingest run
#[derive(Debug)]
pub struct IngestReport {
    pub run_id: Uuid,
    /// Documents freshly parsed this run
    pub ingested: usize,
    /// Documents reused from a previous run without re-parsing
    pub reused: usize,
    /// Documents whose parse failed (recorded, batch continued)
    pub errored: usize,
    /// Chunks accepted by the retrieval index
    pub indexed_chunks: usize,
    /// Per-record indexing failures
    pub index_failures: Vec<IndexFailure>,
    /// (path, reason) for every parse failure this run
    pub parse_errors: Vec<(String, String)>,
}

/// Summary of one extraction run
#[derive(Debug)]
pub struct ExtractReport {
    pub run_id: Uuid,
    pub extracted: usize,
    pub failed: usize,
    /// Documents not eligible (terminal state without `force`)
    pub skipped: usize,
    /// (path, reason) for every failed extraction this run
    pub failures: Vec<(String, String)>,
}

/// The pipeline coordinator.
pub struct Pipeline {
    repo: Repository,
    parser: Arc<dyn DocumentParser>,
    index: SearchIndex,
    extractor: Extractor,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        repo: Repository,
        parser: Arc<dyn DocumentParser>,
        index: SearchIndex,
        extractor: Extractor,
    ) -> Self {
        Self {
            repo,
            parser,
            index,
            extractor,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Parse, chunk and index a corpus of document paths.
    ///
    /// Per-document parse failures are recorded and never abort the
    /// batch. Documents already ingested are reused (their stored text
    /// is re-chunked so the rebuilt index covers the whole corpus)
    /// unless `force` re-parses them from scratch. All chunks are
    /// submitted to the index in one batch before this returns.
    #[instrument(skip(self, paths))]
    pub async fn ingest(&self, paths: &[String]) -> Result<IngestReport> {
        let run_id = Uuid::new_v4();
        info!("Ingest run {} over {} documents", run_id, paths.len());

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut handles = Vec::with_capacity(paths.len());
        for path in paths {
            let repo = self.repo.clone();
            let parser = self.parser.clone();
            let options = self.options.clone();
            let path = path.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| AgentError::Processing(e.to_string()))?;
                ingest_one(repo, parser, options, path).await
            }));
        }

        let mut report = IngestReport {
            run_id,
            ingested: 0,
            reused: 0,
            errored: 0,
            indexed_chunks: 0,
            index_failures: Vec::new(),
            parse_errors: Vec::new(),
        };
        let mut records = Vec::new();
        let mut chunked_paths = Vec::new();

        // Handles are awaited in submission order, so records keep the
        // corpus order regardless of task completion order.
        for handle in handles {
            let outcome = handle
                .await
                .map_err(|e| AgentError::Processing(format!("ingest task failed: {}", e)))??;
            match outcome {
                IngestOutcome::Fresh { path, chunks } => {
                    report.ingested += 1;
                    records.extend(chunks.iter().map(IndexRecord::from_chunk));
                    chunked_paths.push(path);
                }
                IngestOutcome::Reused { path, chunks } => {
                    report.reused += 1;
                    records.extend(chunks.iter().map(IndexRecord::from_chunk));
                    if !chunks.is_empty() {
                        chunked_paths.push(path);
                    }
                }
                IngestOutcome::Errored { path, reason } => {
                    report.errored += 1;
                    report.parse_errors.push((path, reason));
                }
            }
        }

        if records.is_empty() {
            info!("Ingest run {}: nothing to index", run_id);
            return Ok(report);
        }

        // Barrier: every chunk of the batch is submitted before any
        // query can run against this service.
        let index_report = self.index.index(records).await?;
        report.indexed_chunks = index_report.indexed;
        report.index_failures = index_report.failures;

        for path in chunked_paths {
            if let Some(doc) = self.repo.get_document_by_path(&path).await? {
                if doc.status == DocumentStatus::Chunked {
                    self.repo
                        .update_document_status(&path, DocumentStatus::Indexed)
                        .await?;
                }
            }
        }

        info!(
            "Ingest run {}: {} fresh, {} reused, {} errored, {} chunks indexed",
            run_id, report.ingested, report.reused, report.errored, report.indexed_chunks
        );
        Ok(report)
    }

    /// Run one extraction task over every eligible document.
    ///
    /// Eligible means `Indexed` or `ExtractionFailed` (a retry), plus
    /// terminal documents when `force` is set. Each document gets the
    /// task's filter conjoined with equality on its own path, so one
    /// run never reads another document's chunks. Documents extract
    /// concurrently; one document's backoff never blocks another.
    #[instrument(skip(self, task))]
    pub async fn extract_corpus(
        &self,
        task: &ExtractionTask,
        only: Option<&str>,
    ) -> Result<ExtractReport> {
        let run_id = Uuid::new_v4();

        let documents = self.repo.list_documents(usize::MAX).await?;
        let total = documents
            .iter()
            .filter(|d| only.map(|p| p == d.path).unwrap_or(true))
            .count();
        let candidates: Vec<Document> = documents
            .into_iter()
            .filter(|d| only.map(|p| p == d.path).unwrap_or(true))
            .filter(|d| {
                matches!(
                    d.status,
                    DocumentStatus::Indexed | DocumentStatus::ExtractionFailed
                ) || (self.options.force && d.status == DocumentStatus::Completed)
            })
            .collect();

        let mut report = ExtractReport {
            run_id,
            extracted: 0,
            failed: 0,
            skipped: total - candidates.len(),
            failures: Vec::new(),
        };
        info!(
            "Extraction run {}: {} candidates, {} skipped",
            run_id,
            candidates.len(),
            report.skipped
        );

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut handles = Vec::with_capacity(candidates.len());
        for document in candidates {
            let repo = self.repo.clone();
            let extractor = self.extractor.clone();
            let task = task.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| AgentError::Processing(e.to_string()))?;
                extract_one(repo, extractor, task, document.path).await
            }));
        }

        for handle in handles {
            let (path, failure) = handle
                .await
                .map_err(|e| AgentError::Processing(format!("extraction task failed: {}", e)))??;
            match failure {
                None => report.extracted += 1,
                Some(reason) => {
                    report.failed += 1;
                    report.failures.push((path, reason));
                }
            }
        }

        info!(
            "Extraction run {}: {} extracted, {} failed",
            run_id, report.extracted, report.failed
        );
        Ok(report)
    }
}

enum IngestOutcome {
    Fresh { path: String, chunks: Vec<Chunk> },
    Reused { path: String, chunks: Vec<Chunk> },
    Errored { path: String, reason: String },
}

async fn ingest_one(
    repo: Repository,
    parser: Arc<dyn DocumentParser>,
    options: PipelineOptions,
    path: String,
) -> Result<IngestOutcome> {
    if let Some(existing) = repo.get_document_by_path(&path).await? {
        if !options.force {
            if existing.status == DocumentStatus::ErrorDuringExtraction {
                // Recorded parse failure; nothing to chunk.
                return Ok(IngestOutcome::Reused {
                    path,
                    chunks: Vec::new(),
                });
            }
            // Re-chunk the stored text so the wholesale index rebuild
            // still covers this document. Status only advances for
            // documents that had not reached the index yet.
            let chunks = chunk_text(
                &existing.path,
                &existing.extracted_text,
                options.chunk_size,
                options.chunk_overlap,
            )?;
            if existing.status == DocumentStatus::TextExtracted {
                repo.update_document_status(&path, DocumentStatus::Chunked)
                    .await?;
            }
            return Ok(IngestOutcome::Reused { path, chunks });
        }
        repo.delete_document_by_path(&path).await?;
    }

    let parsed = match parser.parse(&path).await {
        Ok(parsed) => parsed,
        Err(err) => {
            // An unreachable parse collaborator is a parse failure for
            // this document, not for the batch.
            warn!("Parse failed for {}: {}", path, err);
            let reason = err.to_string();
            repo.create_document(Document::failed(&path, &reason)).await?;
            return Ok(IngestOutcome::Errored { path, reason });
        }
    };

    if let Some(error_info) = parsed.error_information {
        repo.create_document(Document::failed(&path, &error_info).with_metadata(parsed.metadata))
            .await?;
        return Ok(IngestOutcome::Errored {
            path,
            reason: error_info,
        });
    }

    let document = Document::new(&path, &parsed.content).with_metadata(parsed.metadata);
    repo.create_document(document).await?;

    let chunks = chunk_text(&path, &parsed.content, options.chunk_size, options.chunk_overlap)?;
    repo.update_document_status(&path, DocumentStatus::Chunked)
        .await?;

    Ok(IngestOutcome::Fresh { path, chunks })
}

async fn extract_one(
    repo: Repository,
    extractor: Extractor,
    task: ExtractionTask,
    path: String,
) -> Result<(String, Option<String>)> {
    repo.update_document_status(&path, DocumentStatus::ExtractionRequested)
        .await?;

    let mut filters = vec![Filter::eq("relative_path", path.as_str())];
    if let Some(extra) = task.filter.clone() {
        filters.push(extra);
    }
    let filter = Filter::and(filters);

    let result = extractor
        .extract(
            &path,
            &task.queries,
            task.k_per_query,
            Some(&filter),
            &task.schema,
            &task.system_prompt,
        )
        .await;

    match result {
        Ok(record) => {
            repo.create_extraction(record).await?;
            repo.update_document_status(&path, DocumentStatus::Completed)
                .await?;
            Ok((path, None))
        }
        Err(err) => {
            warn!("Extraction failed for {}: {}", path, err);
            let reason = err.to_string();
            repo.update_document_status(&path, DocumentStatus::ExtractionFailed)
                .await?;
            Ok((path, Some(reason)))
        }
    }
}
