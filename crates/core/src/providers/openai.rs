//! OpenAI-compatible HTTP providers.
//!
//! Both providers speak the `/embeddings` and `/chat/completions` shapes, so
//! any compatible server (local gateways, Azure deployments) can stand in.

use crate::error::ProviderError;
use crate::traits::{ChatProvider, EmbeddingProvider};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
        }
    }
}

impl OpenAiConfig {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        let base = format!("{}/", self.base_url.trim_end_matches('/'));
        Ok(Url::parse(&base)?.join(path)?)
    }

    fn api_key(&self, provider: &str) -> Result<&str, ProviderError> {
        self.api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ProviderError::MissingApiKey(provider.to_string()))
    }
}

pub struct OpenAiEmbeddings {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiEmbeddings {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn name(&self) -> &str {
        "openai-embeddings"
    }

    async fn embed_batch(
        &self,
        model: &str,
        inputs: &[String],
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(self.config.endpoint("embeddings")?)
            .bearer_auth(self.config.api_key(self.name())?)
            .json(&EmbeddingsRequest { model, input: inputs })
            .send()
            .await?;

        let body: EmbeddingsResponse = decode(self.name(), response).await?;
        let mut data = body.data;
        if data.iter().all(|item| item.index.is_some()) {
            data.sort_by_key(|item| item.index);
        }

        Ok(data.into_iter().map(|item| item.embedding).collect())
    }
}

pub struct OpenAiChat {
    config: OpenAiConfig,
    client: Client,
    temperature: f32,
}

impl OpenAiChat {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            temperature: 0.3,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    fn name(&self) -> &str {
        "openai-chat"
    }

    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(self.config.endpoint("chat/completions")?)
            .bearer_auth(self.config.api_key(self.name())?)
            .json(&request)
            .send()
            .await?;

        let body: ChatResponse = decode(self.name(), response).await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::malformed(self.name(), "response has no message content"))
    }
}

async fn decode<T>(provider: &str, response: Response) -> Result<T, ProviderError>
where
    T: serde::de::DeserializeOwned,
{
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(ProviderError::Status {
            provider: provider.to_string(),
            status: status.as_u16(),
            body: text,
        });
    }

    serde_json::from_str(&text).map_err(|error| ProviderError::malformed(provider, error.to_string()))
}
