//! Agent error types

use docfacts_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Database error: {0}")]
    Database(#[from] docfacts_db::DbError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Document parse failed: {0}")]
    Parse(String),

    #[error("Indexing failed for {source_path}#{sequence_index}: {reason}")]
    Indexing {
        source_path: String,
        sequence_index: usize,
        reason: String,
    },

    #[error("No retrieval hits for any query")]
    EmptyContext,

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Transient provider failure: {0}")]
    ProviderTransient(String),

    #[error("Provider unavailable after {attempts} attempts: {reason}")]
    ProviderUnavailable { attempts: u32, reason: String },

    #[error("Processing error: {0}")]
    Processing(String),
}

impl From<CoreError> for AgentError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidParameter(msg) => AgentError::InvalidParameter(msg),
            CoreError::SchemaViolation(msg) => AgentError::SchemaViolation(msg),
            CoreError::Serialization(e) => AgentError::Processing(e.to_string()),
        }
    }
}

impl AgentError {
    /// Transient failures (timeouts, rate limits, connection drops) are
    /// retried with backoff; everything else surfaces immediately. A
    /// schema violation in particular is never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            AgentError::ProviderTransient(_) => true,
            AgentError::Http(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err
                        .status()
                        .map(|s| s.as_u16() == 429 || s.is_server_error())
                        .unwrap_or(false)
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_violations_are_not_transient() {
        assert!(!AgentError::SchemaViolation("missing key".into()).is_transient());
        assert!(!AgentError::EmptyContext.is_transient());
        assert!(AgentError::ProviderTransient("429".into()).is_transient());
    }

    #[test]
    fn core_errors_map_onto_agent_variants() {
        let err: AgentError = CoreError::SchemaViolation("bad".into()).into();
        assert!(matches!(err, AgentError::SchemaViolation(_)));

        let err: AgentError = CoreError::InvalidParameter("bad".into()).into();
        assert!(matches!(err, AgentError::InvalidParameter(_)));
    }
}
