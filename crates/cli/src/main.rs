//! docfacts CLI
//!
//! Ingests report corpora into a retrieval index and runs
//! retrieval-augmented structured extraction over them.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docfacts_agents::{
    CompleteClient, EmbedClient, Extractor, ExtractionTask, ParseClient, Pipeline,
    PipelineOptions, SearchIndex,
};
use docfacts_core::ExtractionSchema;
use docfacts_db::{init_memory, init_persistent, Repository};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_SYSTEM_PROMPT: &str = "Act as an expert data extraction agent specializing in \
official annual report documents. Carefully read the provided text from snippets of an \
annual report and extract the precise information for the fields given.";

/// docfacts - structured numeric facts out of unstructured report files
#[derive(Parser)]
#[command(name = "docfacts")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database path (defaults to ~/.docfacts/data)
    #[arg(short, long)]
    db_path: Option<PathBuf>,

    /// Use in-memory database (for testing)
    #[arg(long)]
    memory: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse, chunk and index a staged corpus of report files
    Ingest {
        /// Stage directory holding the report files
        dir: PathBuf,

        /// Logical retrieval service to (re)build
        #[arg(short, long, default_value = "report_search_service")]
        corpus: String,

        /// Chunk size in bytes
        #[arg(long, default_value = "500")]
        chunk_size: usize,

        /// Overlap between consecutive chunks in bytes
        #[arg(long, default_value = "100")]
        chunk_overlap: usize,

        /// Worker-pool bound for parsing
        #[arg(long, default_value = "4")]
        concurrency: usize,

        /// Acceptable staleness between indexing and query visibility,
        /// in seconds
        #[arg(long, default_value = "86400")]
        target_lag_secs: u64,

        /// Re-process documents that already completed
        #[arg(long)]
        force: bool,
    },

    /// Run retrieval-augmented extraction over an ingested corpus
    Extract {
        /// Logical retrieval service to query
        #[arg(short, long, default_value = "report_search_service")]
        corpus: String,

        /// Retrieval query; repeat for multiple queries, order is kept
        #[arg(short, long = "query", required = true)]
        queries: Vec<String>,

        /// Results per query concatenated into the context
        #[arg(short, long, default_value = "1")]
        k: usize,

        /// JSON file mapping field names to descriptions
        #[arg(short, long)]
        schema: PathBuf,

        /// System prompt (defaults to the annual-report extraction prompt)
        #[arg(long)]
        system_prompt: Option<String>,

        /// Restrict the run to a single document path
        #[arg(long)]
        doc: Option<String>,

        /// Worker-pool bound for per-document extraction
        #[arg(long, default_value = "4")]
        concurrency: usize,

        /// Re-extract documents that already completed
        #[arg(long)]
        force: bool,
    },

    /// List recent documents and their pipeline state
    List {
        /// Maximum results
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show a document and its extraction records
    Show {
        /// Document path as recorded at ingest time
        path: String,
    },

    /// Show database statistics
    Stats,

    /// Delete the local database (fresh start)
    ResetDb {
        /// Database path (defaults to ~/.docfacts/data)
        #[arg(short, long)]
        db_path: Option<PathBuf>,
    },
}

fn default_db_path() -> PathBuf {
    let mut path = dirs::home_dir().expect("Could not find home directory");
    path.push(".docfacts");
    path.push("data");
    path
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::ResetDb { db_path } = &cli.command {
        let path = db_path.clone().unwrap_or_else(default_db_path);

        if path.exists() {
            std::fs::remove_dir_all(&path)
                .with_context(|| format!("Failed to remove db at {}", path.display()))?;
            println!("✓ Removed database at {}", path.display());
        } else {
            println!("Database not found at {}, nothing to remove", path.display());
        }
        return Ok(());
    }

    let db = if cli.memory {
        info!("Using in-memory database");
        init_memory().await?
    } else {
        let db_path = cli.db_path.clone().unwrap_or_else(default_db_path);

        // Ensure directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Using database at: {}", db_path.display());
        init_persistent(&db_path).await?
    };

    let repo = Repository::new(db);

    match cli.command {
        Commands::Ingest {
            dir,
            corpus,
            chunk_size,
            chunk_overlap,
            concurrency,
            target_lag_secs,
            force,
        } => {
            cmd_ingest(
                repo,
                dir,
                corpus,
                chunk_size,
                chunk_overlap,
                concurrency,
                target_lag_secs,
                force,
            )
            .await?;
        }
        Commands::Extract {
            corpus,
            queries,
            k,
            schema,
            system_prompt,
            doc,
            concurrency,
            force,
        } => {
            cmd_extract(
                repo,
                corpus,
                queries,
                k,
                schema,
                system_prompt,
                doc,
                concurrency,
                force,
            )
            .await?;
        }
        Commands::List { limit } => {
            cmd_list(repo, limit).await?;
        }
        Commands::Show { path } => {
            cmd_show(repo, path).await?;
        }
        Commands::Stats => {
            cmd_stats(repo).await?;
        }
        Commands::ResetDb { .. } => {
            // Handled before database init.
        }
    }

    Ok(())
}

/// Collect every file under `dir`, as paths relative to it. These
/// relative paths are the document identities and are what the parse
/// service resolves against its configured stage root.
fn collect_corpus_paths(dir: &Path) -> Result<Vec<String>> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
        let mut entries: Vec<_> =
            std::fs::read_dir(dir)?.collect::<std::result::Result<_, _>>()?;
        entries.sort_by_key(|e| e.path());
        for entry in entries {
            let path = entry.path();
            if path.is_dir() {
                walk(root, &path, out)?;
            } else {
                let relative = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .into_owned();
                out.push(relative);
            }
        }
        Ok(())
    }

    let mut paths = Vec::new();
    walk(dir, dir, &mut paths)
        .with_context(|| format!("Failed to read corpus directory {}", dir.display()))?;
    Ok(paths)
}

#[allow(clippy::too_many_arguments)]
async fn cmd_ingest(
    repo: Repository,
    dir: PathBuf,
    corpus: String,
    chunk_size: usize,
    chunk_overlap: usize,
    concurrency: usize,
    target_lag_secs: u64,
    force: bool,
) -> Result<()> {
    let paths = collect_corpus_paths(&dir)?;
    if paths.is_empty() {
        println!("No files found under {}", dir.display());
        return Ok(());
    }

    let parse = ParseClient::default_local();
    let embed = EmbedClient::default_local();
    if !parse.health().await.unwrap_or(false) {
        eprintln!("Error: parse service is not reachable.");
        eprintln!("  Parse (OCR): {}", parse.base_url());
        anyhow::bail!("Parse service unavailable");
    }
    if !embed.health().await.unwrap_or(false) {
        eprintln!("Error: embeddings service is not reachable.");
        eprintln!("  Embeddings: {}", embed.base_url());
        anyhow::bail!("Embeddings service unavailable");
    }

    let index = SearchIndex::new(repo.clone(), Arc::new(embed), corpus)
        .with_target_lag(Duration::from_secs(target_lag_secs));
    let extractor = Extractor::new(index.clone(), Arc::new(CompleteClient::default_local()));
    let pipeline =
        Pipeline::new(repo, Arc::new(parse), index, extractor).with_options(PipelineOptions {
            chunk_size,
            chunk_overlap,
            concurrency,
            force,
        });

    let report = pipeline.ingest(&paths).await?;

    println!("\n✓ Ingest complete:");
    println!("  • Documents parsed: {}", report.ingested);
    println!("  • Documents reused: {}", report.reused);
    println!("  • Documents errored: {}", report.errored);
    println!("  • Chunks indexed: {}", report.indexed_chunks);

    for (path, reason) in &report.parse_errors {
        println!("    - parse failed for {}: {}", path, reason);
    }
    for failure in &report.index_failures {
        println!(
            "    - indexing failed for {}#{}: {}",
            failure.source_path, failure.sequence_index, failure.reason
        );
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_extract(
    repo: Repository,
    corpus: String,
    queries: Vec<String>,
    k: usize,
    schema_path: PathBuf,
    system_prompt: Option<String>,
    doc: Option<String>,
    concurrency: usize,
    force: bool,
) -> Result<()> {
    let schema_text = std::fs::read_to_string(&schema_path)
        .with_context(|| format!("Failed to read schema file: {}", schema_path.display()))?;
    let schema_json: serde_json::Value = serde_json::from_str(&schema_text)
        .with_context(|| format!("Schema file is not valid JSON: {}", schema_path.display()))?;
    let schema = ExtractionSchema::from_json(&schema_json)?;

    let embed = EmbedClient::default_local();
    let complete = CompleteClient::default_local();
    if !embed.health().await.unwrap_or(false) {
        eprintln!("Error: embeddings service is not reachable.");
        eprintln!("  Embeddings: {}", embed.base_url());
        anyhow::bail!("Embeddings service unavailable");
    }
    if !complete.health().await.unwrap_or(false) {
        eprintln!("Error: completion service is not reachable.");
        eprintln!("  Completion: {}", complete.base_url());
        anyhow::bail!("Completion service unavailable");
    }

    let index = SearchIndex::new(repo.clone(), Arc::new(embed), corpus);
    let extractor = Extractor::new(index.clone(), Arc::new(complete));
    let pipeline = Pipeline::new(
        repo.clone(),
        Arc::new(ParseClient::default_local()),
        index,
        extractor,
    )
    .with_options(PipelineOptions {
        concurrency,
        force,
        ..PipelineOptions::default()
    });

    let task = ExtractionTask {
        queries,
        k_per_query: k,
        filter: None,
        schema,
        system_prompt: system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
    };

    let report = pipeline.extract_corpus(&task, doc.as_deref()).await?;

    println!("\n✓ Extraction complete:");
    println!("  • Documents extracted: {}", report.extracted);
    println!("  • Documents failed: {}", report.failed);
    println!("  • Documents skipped: {}", report.skipped);

    for (path, reason) in &report.failures {
        println!("    - {}: {}", path, reason);
    }

    Ok(())
}

async fn cmd_list(repo: Repository, limit: usize) -> Result<()> {
    let documents = repo.list_documents(limit).await?;

    if documents.is_empty() {
        println!("No documents yet. Ingest a corpus with: docfacts ingest <dir>");
        return Ok(());
    }

    println!("Recent documents ({}):\n", documents.len());

    for document in documents {
        println!("• {} [{}]", document.path, document.status);
        if let Some(error) = &document.error_info {
            println!("  error: {}", error);
        } else {
            let preview: String = document.extracted_text.chars().take(80).collect();
            println!(
                "  {}{}",
                preview,
                if document.extracted_text.len() > 80 {
                    "..."
                } else {
                    ""
                }
            );
        }
        println!();
    }

    Ok(())
}

async fn cmd_show(repo: Repository, path: String) -> Result<()> {
    let document = repo
        .get_document_by_path(&path)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Document not found: {}", path))?;

    println!("Document: {}", document.path);
    println!("Status: {}", document.status);
    if let Some(error) = &document.error_info {
        println!("Error: {}", error);
    }
    if !document.metadata.is_null() {
        println!("Metadata: {}", document.metadata);
    }

    let records = repo.get_extractions_for(&path).await?;
    if records.is_empty() {
        println!("\nNo extraction records.");
        return Ok(());
    }

    println!("\nExtraction records ({}):", records.len());
    for record in records {
        println!(
            "  • {} entities, context {} bytes",
            record.document_entities.len(),
            record.context.len()
        );
        for entity in &record.document_entities {
            let rendered = serde_json::to_string(entity)?;
            println!("    {}", rendered);
        }
    }

    Ok(())
}

async fn cmd_stats(repo: Repository) -> Result<()> {
    let stats = repo.get_stats().await?;

    println!("Database Statistics:");
    println!("  • Documents: {}", stats.document_count);
    println!("  • Errored documents: {}", stats.errored_count);
    println!("  • Indexed chunks: {}", stats.chunk_count);
    println!("  • Extraction records: {}", stats.extraction_count);

    Ok(())
}
