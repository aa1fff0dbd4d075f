//! Extraction orchestrator - retrieval-augmented structured extraction
//!
//! Composes retrieval hits into a prompt context, calls the completion
//! provider with a schema-constrained response format, and validates the
//! structured payload before anything else sees it.

use std::sync::Arc;
use std::time::Duration;

use docfacts_core::{ExtractionRecord, ExtractionSchema, Filter};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use crate::{AgentError, ChatMessage, Completer, Result, SearchIndex};

/// Separator between retrieved chunk texts in the prompt context.
pub const CONTEXT_SEPARATOR: &str = " | ";

/// Bounded exponential backoff for transient provider failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// The extraction orchestrator.
#[derive(Clone)]
pub struct Extractor {
    index: SearchIndex,
    completer: Arc<dyn Completer>,
    retry: RetryPolicy,
}

impl Extractor {
    pub fn new(index: SearchIndex, completer: Arc<dyn Completer>) -> Self {
        Self {
            index,
            completer,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run one retrieval-augmented extraction.
    ///
    /// Retrieval queries run concurrently but their hits are recombined
    /// in query order. The completion request is sampled at temperature
    /// 0 (a determinism intent, not a guarantee) and its payload must
    /// match the declared schema exactly: a schema violation surfaces
    /// immediately, a transient provider failure is retried with
    /// backoff.
    #[instrument(skip(self, queries, filter, schema, system_prompt))]
    pub async fn extract(
        &self,
        source_path: &str,
        queries: &[String],
        k_per_query: usize,
        filter: Option<&Filter>,
        schema: &ExtractionSchema,
        system_prompt: &str,
    ) -> Result<ExtractionRecord> {
        if queries.is_empty() {
            return Err(AgentError::InvalidParameter(
                "at least one retrieval query is required".into(),
            ));
        }

        let context = self.build_context(queries, k_per_query, filter).await?;
        debug!("Retrieval context: {} bytes", context.len());

        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(&context),
        ];
        let response_schema = schema.response_format();

        let payload = self
            .complete_with_retry(&messages, &response_schema)
            .await?;
        let entities = schema.validate_entities(&payload)?;

        Ok(ExtractionRecord::new(source_path, context, entities))
    }

    /// Run every retrieval query concurrently; recombine hit texts in
    /// query order regardless of completion order.
    async fn build_context(
        &self,
        queries: &[String],
        k_per_query: usize,
        filter: Option<&Filter>,
    ) -> Result<String> {
        let mut handles = Vec::with_capacity(queries.len());
        for query in queries {
            let index = self.index.clone();
            let query = query.clone();
            let filter = filter.cloned();
            handles.push(tokio::spawn(async move {
                index.query(&query, k_per_query, filter.as_ref()).await
            }));
        }

        let mut blocks = Vec::new();
        for handle in handles {
            let result = handle
                .await
                .map_err(|e| AgentError::Processing(format!("retrieval task failed: {}", e)))??;
            if result.is_empty() {
                continue;
            }
            blocks.push(result.texts().collect::<Vec<_>>().join(CONTEXT_SEPARATOR));
        }

        if blocks.is_empty() {
            return Err(AgentError::EmptyContext);
        }
        Ok(blocks.join(CONTEXT_SEPARATOR))
    }

    async fn complete_with_retry(
        &self,
        messages: &[ChatMessage],
        response_schema: &Value,
    ) -> Result<Value> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self
                .completer
                .complete(messages, 0.0, response_schema)
                .await
            {
                Ok(payload) => return Ok(payload),
                Err(err) if err.is_transient() => {
                    if attempt >= self.retry.max_attempts {
                        return Err(AgentError::ProviderUnavailable {
                            attempts: attempt,
                            reason: err.to_string(),
                        });
                    }
                    let delay = self.retry.delay(attempt);
                    warn!(
                        "Completion attempt {} failed ({}), retrying in {:?}",
                        attempt, err, delay
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
