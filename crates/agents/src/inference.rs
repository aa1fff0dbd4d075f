//! Provider seams and local inference clients.
//!
//! The parse (OCR sidecar), embedding (TEI) and completion (Ollama)
//! collaborators are consumed through small traits so the pipeline can
//! be exercised against stubs; the concrete clients here speak the
//! providers' HTTP dialects.

use crate::{AgentError, Result};
use async_trait::async_trait;
use docfacts_db::schema::EMBEDDING_DIMENSION;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const DEFAULT_PARSE_URL: &str = "http://localhost:8090";
const DEFAULT_PARSE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_EMBED_URL: &str = "http://localhost:8081";
const DEFAULT_COMPLETE_URL: &str = "http://localhost:11434";
const DEFAULT_COMPLETE_MODEL: &str = "phi4-mini:latest";
const DEFAULT_COMPLETE_TIMEOUT_SECS: u64 = 120;

fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_timeout(key: &str, default_secs: u64) -> Duration {
    let secs = std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default_secs);
    Duration::from_secs(secs)
}

// ==========================================
// PROVIDER SEAMS
// ==========================================

/// Output of the parse collaborator for one document. Field names follow
/// the upstream parse-document contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedDocument {
    /// Raw extracted plain text
    #[serde(default)]
    pub content: String,
    /// Error information, set when the document could not be processed
    #[serde(default)]
    pub error_information: Option<String>,
    /// Parse metadata (page count, mime type, ...)
    #[serde(default)]
    pub metadata: Value,
}

/// Role-tagged message for the completion provider
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Document parsing/OCR collaborator, consumed once per document.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    async fn parse(&self, path: &str) -> Result<ParsedDocument>;
}

/// Embedding collaborator. Passage and query texts are embedded through
/// the same model; `is_query` selects the provider's query prompt.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str, is_query: bool) -> Result<Vec<f32>>;
}

/// Completion collaborator: role-tagged messages plus a response schema
/// in, a structured object matching the schema out.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        response_schema: &Value,
    ) -> Result<Value>;
}

// ==========================================
// PARSE CLIENT
// ==========================================

/// HTTP client for the document-parsing sidecar.
#[derive(Clone)]
pub struct ParseClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl ParseClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            timeout: Duration::from_secs(DEFAULT_PARSE_TIMEOUT_SECS),
        }
    }

    pub fn default_local() -> Self {
        let mut client = Self::new(env_or_default("PARSE_URL", DEFAULT_PARSE_URL));
        client.timeout = env_timeout("PARSE_TIMEOUT_SECS", DEFAULT_PARSE_TIMEOUT_SECS);
        client
    }

    pub async fn health(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl DocumentParser for ParseClient {
    async fn parse(&self, path: &str) -> Result<ParsedDocument> {
        let url = format!("{}/parse", self.base_url);
        let request = ParseRequest {
            path: path.to_string(),
            mode: "OCR".to_string(),
        };

        debug!("Requesting parse for {}", path);

        let parsed = self
            .client
            .post(&url)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json::<ParsedDocument>()
            .await?;

        Ok(parsed)
    }
}

#[derive(Serialize)]
struct ParseRequest {
    path: String,
    mode: String,
}

// ==========================================
// EMBEDDING CLIENT
// ==========================================

/// TEI-style embeddings client.
#[derive(Clone)]
pub struct EmbedClient {
    client: Client,
    base_url: String,
}

impl EmbedClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn default_local() -> Self {
        Self::new(env_or_default("EMBED_URL", DEFAULT_EMBED_URL))
    }

    pub async fn health(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Embedder for EmbedClient {
    async fn embed(&self, text: &str, is_query: bool) -> Result<Vec<f32>> {
        let prompt_name = if is_query {
            std::env::var("EMBED_PROMPT_NAME_QUERY").ok()
        } else {
            std::env::var("EMBED_PROMPT_NAME_PASSAGE").ok()
        };

        let url = format!("{}/embed", self.base_url);
        let request = EmbedRequest {
            inputs: text,
            truncate: true,
            prompt_name: prompt_name.as_deref(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        let embedding = parse_embedding_response(response)?;
        validate_embedding_dim(embedding.len())?;
        Ok(embedding)
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a str,
    truncate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt_name: Option<&'a str>,
}

fn validate_embedding_dim(len: usize) -> Result<()> {
    if len != EMBEDDING_DIMENSION {
        return Err(AgentError::Processing(format!(
            "Embedding dimension {} does not match expected {}. Choose a 1024-dim model or update the schema.",
            len, EMBEDDING_DIMENSION
        )));
    }
    Ok(())
}

fn parse_embedding_response(value: Value) -> Result<Vec<f32>> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Ok(Vec::new());
            }
            if items.first().map(|v| v.is_number()).unwrap_or(false) {
                serde_json::from_value(Value::Array(items)).map_err(|e| {
                    AgentError::Processing(format!("Invalid embedding array: {}", e))
                })
            } else {
                let first = items
                    .into_iter()
                    .next()
                    .ok_or_else(|| AgentError::Processing("Missing embeddings".to_string()))?;
                serde_json::from_value(first).map_err(|e| {
                    AgentError::Processing(format!("Invalid embedding array: {}", e))
                })
            }
        }
        other => Err(AgentError::Processing(format!(
            "Unexpected embeddings response format: {}",
            other
        ))),
    }
}

// ==========================================
// COMPLETION CLIENT
// ==========================================

/// Ollama-style chat client with schema-constrained structured output.
#[derive(Clone)]
pub struct CompleteClient {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl CompleteClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            timeout: Duration::from_secs(DEFAULT_COMPLETE_TIMEOUT_SECS),
        }
    }

    pub fn default_local() -> Self {
        let mut client = Self::new(
            env_or_default("COMPLETE_URL", DEFAULT_COMPLETE_URL),
            env_or_default("COMPLETE_MODEL", DEFAULT_COMPLETE_MODEL),
        );
        client.timeout = env_timeout("COMPLETE_TIMEOUT_SECS", DEFAULT_COMPLETE_TIMEOUT_SECS);
        client
    }

    pub async fn health(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Completer for CompleteClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        response_schema: &Value,
    ) -> Result<Value> {
        let url = format!("{}/api/chat", self.base_url);
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            stream: false,
            format: response_schema,
            options: ChatOptions { temperature },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json::<ChatResponse>()
            .await?;

        if let Some(done_reason) = response.done_reason.as_deref() {
            debug!("Completion done_reason={}", done_reason);
        }

        let cleaned = normalize_json_payload(&response.message.content);
        serde_json::from_str(&cleaned).map_err(|_| {
            AgentError::Processing(format!(
                "Completion provider returned invalid JSON: {}",
                response.message.content
            ))
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: String,
    messages: &'a [ChatMessage],
    stream: bool,
    format: &'a Value,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
    #[serde(default)]
    done_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Strip markdown fences and leading/trailing prose from a JSON payload.
fn normalize_json_payload(payload: &str) -> String {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return trimmed.to_string();
    }

    let without_fence = if trimmed.starts_with("```") {
        let mut lines = trimmed.lines();
        let _ = lines.next(); // drop ``` or ```json
        let mut content = lines.collect::<Vec<_>>().join("\n");
        if content.ends_with("```") {
            content.truncate(content.len().saturating_sub(3));
        }
        content.trim().to_string()
    } else {
        trimmed.to_string()
    };

    if let (Some(start), Some(end)) = (without_fence.find('{'), without_fence.rfind('}')) {
        if start < end {
            return without_fence[start..=end].to_string();
        }
    }

    without_fence
}
