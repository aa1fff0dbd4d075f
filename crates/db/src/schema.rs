//! SurrealDB schema definitions

use crate::{DbConnection, Result};
use tracing::info;

/// Embedding dimension (arctic-embed-l / jina-v3 class models: 1024)
pub const EMBEDDING_DIMENSION: usize = 1024;

/// Initialize the database schema
pub async fn initialize_schema(db: &DbConnection) -> Result<()> {
    info!("Initializing database schema...");

    // Define tables and fields
    db.query(SCHEMA_DEFINITION).await?;

    info!("Schema initialized successfully");
    Ok(())
}

const SCHEMA_DEFINITION: &str = r#"
-- ============================================
-- TABLES
-- ============================================

-- Documents: one row per ingested source file
DEFINE TABLE document SCHEMAFULL;
DEFINE FIELD path ON document TYPE string;
DEFINE FIELD extracted_text ON document TYPE string;
DEFINE FIELD error_info ON document TYPE option<string>;
DEFINE FIELD metadata ON document FLEXIBLE TYPE option<object>;
DEFINE FIELD status ON document TYPE string DEFAULT 'ingested';
DEFINE FIELD processed_at ON document TYPE datetime DEFAULT time::now();

-- Indexed chunks: the retrieval index's own copy of each chunk
DEFINE TABLE chunk SCHEMAFULL;
DEFINE FIELD service ON chunk TYPE string;
DEFINE FIELD source_path ON chunk TYPE string;
DEFINE FIELD text ON chunk TYPE string;
DEFINE FIELD sequence_index ON chunk TYPE int;
DEFINE FIELD ordinal ON chunk TYPE int;
DEFINE FIELD attributes ON chunk FLEXIBLE TYPE object;
DEFINE FIELD embedding ON chunk TYPE option<array<float>>;
DEFINE FIELD created_at ON chunk TYPE datetime DEFAULT time::now();

-- Extraction records
DEFINE TABLE extraction SCHEMAFULL;
DEFINE FIELD source_path ON extraction TYPE string;
DEFINE FIELD context ON extraction TYPE string;
DEFINE FIELD document_entities ON extraction FLEXIBLE TYPE array;
DEFINE FIELD created_at ON extraction TYPE datetime DEFAULT time::now();

-- Logical retrieval services and their staleness contract
DEFINE TABLE service SCHEMAFULL;
DEFINE FIELD name ON service TYPE string;
DEFINE FIELD target_lag_secs ON service TYPE int;
DEFINE FIELD refreshed_at ON service TYPE datetime DEFAULT time::now();

-- ============================================
-- INDEXES
-- ============================================

-- Document lookups
DEFINE INDEX idx_document_path ON document FIELDS path UNIQUE;
DEFINE INDEX idx_document_status ON document FIELDS status;

-- Chunk lookups per logical service
DEFINE INDEX idx_chunk_service ON chunk FIELDS service;
DEFINE INDEX idx_chunk_source ON chunk FIELDS source_path;

-- Vector index for semantic retrieval (HNSW for performance)
DEFINE INDEX idx_chunk_embedding ON chunk FIELDS embedding
    HNSW DIMENSION 1024 DIST COSINE;

-- Extraction lookups
DEFINE INDEX idx_extraction_source ON extraction FIELDS source_path;

-- Service lookups
DEFINE INDEX idx_service_name ON service FIELDS name UNIQUE;
"#;
