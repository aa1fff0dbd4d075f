//! Core domain types for docfacts
//!
//! This crate defines the fundamental data structures used throughout
//! the pipeline: Documents, Chunks, retrieval filters, extraction
//! schemas, and the pure chunking algorithm.

pub mod chunk;
pub mod document;
pub mod error;
pub mod extraction;
pub mod filter;
pub mod schema;

pub use chunk::{chunk_text, Chunk};
pub use document::{Document, DocumentStatus};
pub use error::{CoreError, Result};
pub use extraction::{EntityFacts, ExtractionRecord};
pub use filter::Filter;
pub use schema::{ExtractionSchema, FieldSpec};
