use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::ModelError;

/// A model the host session has resolved, with its declared context window.
#[derive(Debug, Clone)]
pub struct ModelHandle {
    pub id: String,
    pub context_window: u32,
}

impl ModelHandle {
    pub fn new(id: impl Into<String>, context_window: u32) -> Self {
        Self {
            id: id.into(),
            context_window,
        }
    }
}

/// Resolves API keys per model. The host's model registry implements this.
pub trait ApiKeyResolver: Send + Sync {
    fn api_key(&self, model: &str) -> Option<String>;
}

/// One fully-formed summarization request. The prompt already embeds the
/// structure instructions and any previous summary verbatim.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub api_key: String,
    pub prompt: String,
    /// Response budget. Maps to the API's max output tokens.
    pub reserve_tokens: u32,
}

/// Pure LLM completion call. No state, no history. Request in, text out.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ModelError>;
}

/// Blanket impl so `Box<dyn ModelClient>` can be passed where the trait is expected.
#[async_trait]
impl ModelClient for Box<dyn ModelClient> {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ModelError> {
        (**self).complete(request).await
    }
}

/// Claude API client via Anthropic's messages endpoint.
pub struct AnthropicClient {
    client: reqwest::Client,
    base_url: String,
}

impl AnthropicClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "https://api.anthropic.com".into(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: "https://api.anthropic.com".into(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ModelError> {
        let body = json!({
            "model": request.model,
            "max_tokens": request.reserve_tokens.max(1),
            "messages": [{
                "role": "user",
                "content": request.prompt,
            }],
        });

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &request.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;

        if status != 200 {
            return Err(ModelError::ApiError { status, body: text });
        }

        let parsed: Value =
            serde_json::from_str(&text).map_err(|e| ModelError::Parse(e.to_string()))?;

        let raw = parsed["content"].as_array().cloned().unwrap_or_default();
        let completion = raw
            .iter()
            .filter(|block| block["type"].as_str() == Some("text"))
            .filter_map(|block| block["text"].as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if completion.trim().is_empty() {
            return Err(ModelError::EmptyCompletion);
        }

        Ok(completion)
    }
}
