//! Stub collaborators for unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    AgentError, ChatMessage, Completer, DocumentParser, Embedder, ParsedDocument, Result,
};
use docfacts_db::schema::EMBEDDING_DIMENSION;

/// Full-dimension embedding with weight on two fixed components, so
/// cosine similarities are predictable in tests.
pub fn embedding(x: f32, y: f32) -> Vec<f32> {
    let mut v = vec![0.0; EMBEDDING_DIMENSION];
    v[0] = x;
    v[1] = y;
    v
}

/// Embedder returning canned vectors: exact-text overrides first, a
/// default for everything else, plus configurable per-text failures and
/// delays (for exercising completion-order independence).
pub struct StubEmbedder {
    default: Vec<f32>,
    overrides: HashMap<String, Vec<f32>>,
    fail_on: Vec<String>,
    delays: HashMap<String, std::time::Duration>,
}

impl StubEmbedder {
    pub fn new(default: Vec<f32>) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
            fail_on: Vec::new(),
            delays: HashMap::new(),
        }
    }

    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.overrides.insert(text.into(), vector);
        self
    }

    pub fn failing_on(mut self, text: impl Into<String>) -> Self {
        self.fail_on.push(text.into());
        self
    }

    pub fn delayed_on(mut self, text: impl Into<String>, delay: std::time::Duration) -> Self {
        self.delays.insert(text.into(), delay);
        self
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, text: &str, _is_query: bool) -> Result<Vec<f32>> {
        if let Some(delay) = self.delays.get(text) {
            tokio::time::sleep(*delay).await;
        }
        if self.fail_on.iter().any(|t| t == text) {
            return Err(AgentError::Processing(format!(
                "stub embedder refused: {}",
                text
            )));
        }
        Ok(self
            .overrides
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.default.clone()))
    }
}

/// Completer that pops scripted responses in order and records every
/// request it saw.
pub struct StubCompleter {
    responses: Mutex<VecDeque<Result<Value>>>,
    fallback: Option<Value>,
    pub seen: Mutex<Vec<(Vec<ChatMessage>, f32, Value)>>,
}

impl StubCompleter {
    /// Scripted responses, served in order; exhausting them is an error.
    pub fn new(responses: Vec<Result<Value>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            fallback: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// The same response for every call.
    pub fn always(response: Value) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: Some(response),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl Completer for StubCompleter {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        response_schema: &Value,
    ) -> Result<Value> {
        self.seen.lock().unwrap().push((
            messages.to_vec(),
            temperature,
            response_schema.clone(),
        ));
        let mut responses = self.responses.lock().unwrap();
        match responses.pop_front() {
            Some(response) => response,
            None => match &self.fallback {
                Some(value) => Ok(value.clone()),
                None => Err(AgentError::Processing("stub completer exhausted".into())),
            },
        }
    }
}

/// Parser serving canned text per path, with optional per-path errors.
pub struct StubParser {
    texts: HashMap<String, String>,
    errors: HashMap<String, String>,
}

impl StubParser {
    pub fn new() -> Self {
        Self {
            texts: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_text(mut self, path: impl Into<String>, text: impl Into<String>) -> Self {
        self.texts.insert(path.into(), text.into());
        self
    }

    pub fn with_error(mut self, path: impl Into<String>, error: impl Into<String>) -> Self {
        self.errors.insert(path.into(), error.into());
        self
    }
}

impl Default for StubParser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentParser for StubParser {
    async fn parse(&self, path: &str) -> Result<ParsedDocument> {
        if let Some(error) = self.errors.get(path) {
            return Ok(ParsedDocument {
                content: String::new(),
                error_information: Some(error.clone()),
                metadata: Value::Null,
            });
        }
        match self.texts.get(path) {
            Some(text) => Ok(ParsedDocument {
                content: text.clone(),
                error_information: None,
                metadata: serde_json::json!({"mode": "OCR"}),
            }),
            None => Err(AgentError::Parse(format!("no stub text for {}", path))),
        }
    }
}
