//! Document types - one record per ingested source file

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::RecordId;

/// Per-document pipeline state.
///
/// Transitions:
/// `Ingested → TextExtracted → ErrorDuringExtraction` (terminal) or
/// `Ingested → TextExtracted → Chunked → Indexed → ExtractionRequested →
/// Completed | ExtractionFailed` (terminal).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Source file seen, parse not yet attempted
    Ingested,
    /// Parse collaborator returned text without an error
    TextExtracted,
    /// Parse collaborator reported an error; processing stops here
    ErrorDuringExtraction,
    /// Text split into chunks
    Chunked,
    /// Chunks submitted to the retrieval index
    Indexed,
    /// Extraction in flight
    ExtractionRequested,
    /// Extraction record persisted
    Completed,
    /// Extraction failed after retries (or with a hard violation)
    ExtractionFailed,
}

impl DocumentStatus {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition(self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Ingested, TextExtracted)
                | (TextExtracted, ErrorDuringExtraction)
                | (TextExtracted, Chunked)
                | (Chunked, Indexed)
                | (Indexed, ExtractionRequested)
                | (ExtractionRequested, Completed)
                | (ExtractionRequested, ExtractionFailed)
        )
    }

    /// Terminal states admit no further processing (absent `force`).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DocumentStatus::ErrorDuringExtraction
                | DocumentStatus::Completed
                | DocumentStatus::ExtractionFailed
        )
    }
}

impl Default for DocumentStatus {
    fn default() -> Self {
        Self::Ingested
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DocumentStatus::Ingested => "ingested",
            DocumentStatus::TextExtracted => "text_extracted",
            DocumentStatus::ErrorDuringExtraction => "error_during_extraction",
            DocumentStatus::Chunked => "chunked",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::ExtractionRequested => "extraction_requested",
            DocumentStatus::Completed => "completed",
            DocumentStatus::ExtractionFailed => "extraction_failed",
        };
        write!(f, "{}", s)
    }
}

/// An ingested source document. Created once per file at ingestion time;
/// the parse outcome (text or error) is fixed at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier (maps to the store's record ID)
    pub id: Option<RecordId>,

    /// Relative path of the source file within the staged corpus
    pub path: String,

    /// Plain text produced by the parse collaborator (possibly empty)
    pub extracted_text: String,

    /// Error reported by the parse collaborator, if extraction failed
    pub error_info: Option<String>,

    /// Parse metadata (page count, mime type, ...)
    #[serde(default)]
    pub metadata: serde_json::Value,

    /// Pipeline state for this document
    #[serde(default)]
    pub status: DocumentStatus,

    /// When the parse result was recorded
    #[serde(skip_serializing)]
    pub processed_at: DateTime<Utc>,
}

impl Document {
    /// Create a document from a successful parse.
    pub fn new(path: impl Into<String>, extracted_text: impl Into<String>) -> Self {
        Self {
            id: None,
            path: path.into(),
            extracted_text: extracted_text.into(),
            error_info: None,
            metadata: serde_json::Value::Null,
            status: DocumentStatus::TextExtracted,
            processed_at: Utc::now(),
        }
    }

    /// Create a document recording a failed parse.
    pub fn failed(path: impl Into<String>, error_info: impl Into<String>) -> Self {
        Self {
            id: None,
            path: path.into(),
            extracted_text: String::new(),
            error_info: Some(error_info.into()),
            metadata: serde_json::Value::Null,
            status: DocumentStatus::ErrorDuringExtraction,
            processed_at: Utc::now(),
        }
    }

    /// Builder: attach parse metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Whether the parse step produced usable text.
    pub fn has_text(&self) -> bool {
        self.error_info.is_none() && !self.extracted_text.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_legal() {
        use DocumentStatus::*;
        let path = [
            Ingested,
            TextExtracted,
            Chunked,
            Indexed,
            ExtractionRequested,
            Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn terminal_states_admit_no_successor() {
        use DocumentStatus::*;
        for terminal in [ErrorDuringExtraction, Completed, ExtractionFailed] {
            assert!(terminal.is_terminal());
            for next in [
                Ingested,
                TextExtracted,
                Chunked,
                Indexed,
                ExtractionRequested,
                Completed,
            ] {
                assert!(!terminal.can_transition(next));
            }
        }
    }

    #[test]
    fn parse_error_halts_at_error_during_extraction() {
        use DocumentStatus::*;
        assert!(TextExtracted.can_transition(ErrorDuringExtraction));
        assert!(!ErrorDuringExtraction.can_transition(Chunked));

        let doc = Document::failed("broken.pdf", "unsupported encoding");
        assert_eq!(doc.status, ErrorDuringExtraction);
        assert!(!doc.has_text());
        assert!(doc.extracted_text.is_empty());
    }

    #[test]
    fn successful_parse_carries_text() {
        let doc = Document::new("report.pdf", "Annual revenue was strong.")
            .with_metadata(serde_json::json!({"pages": 12}));
        assert_eq!(doc.status, DocumentStatus::TextExtracted);
        assert!(doc.has_text());
        assert_eq!(doc.metadata["pages"], 12);
    }
}
