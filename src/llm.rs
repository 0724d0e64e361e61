use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{Backend, Config, Secrets};

/// Upper bound on one generation request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Anything that can turn a prompt into reply text.
///
/// `None` means no reply was produced; the implementation has already logged
/// why.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Option<String>;
}

// Gemini generateContent wire types

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

// OpenRouter chat completions wire types

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// Endpoint and credentials of the selected provider.
#[derive(Debug, Clone)]
struct Endpoint {
    base_url: String,
    model: String,
    api_key: String,
}

/// Single-attempt client for whichever backend was chosen at startup.
pub struct LlmClient {
    client: reqwest::Client,
    backend: Backend,
    endpoint: Endpoint,
}

impl LlmClient {
    pub fn new(backend: Backend, config: &Config, secrets: &Secrets) -> Self {
        let (base_url, model) = match backend {
            Backend::Gemini => (&config.gemini.base_url, &config.gemini.model),
            Backend::Openrouter => (&config.openrouter.base_url, &config.openrouter.model),
        };
        Self::with_endpoint(backend, base_url, model, secrets.api_key(backend))
    }

    pub fn with_endpoint(backend: Backend, base_url: &str, model: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            backend,
            endpoint: Endpoint {
                base_url: base_url.trim_end_matches('/').to_string(),
                model: model.to_string(),
                api_key: api_key.to_string(),
            },
        }
    }

    async fn gemini(&self, prompt: &str) -> Result<String> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
        };

        let url = format!(
            "{}/models/{}:generateContent",
            self.endpoint.base_url, self.endpoint.model
        );

        debug!("Sending request to Gemini: {}", url);

        let response = self
            .client
            .post(&url)
            .query(&[("key", &self.endpoint.api_key)])
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await
            // The URL carries the API key
            .map_err(|e| e.without_url())
            .context("Failed to send request to Gemini")?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("Gemini API error ({}): {}", status, body);
        }

        let parsed: GeminiResponse = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse Gemini response: {}", body))?;

        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .filter(|text| !text.is_empty())
            .with_context(|| format!("No text in Gemini response: {}", body))
    }

    async fn openrouter(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.endpoint.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: Some(prompt.to_string()),
            }],
        };

        let url = format!("{}/chat/completions", self.endpoint.base_url);

        debug!("Sending request to OpenRouter: {}", url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.endpoint.api_key))
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to OpenRouter")?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("OpenRouter API error ({}): {}", status, body);
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse OpenRouter response: {}", body))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.is_empty())
            .with_context(|| format!("No response from OpenRouter: {}", body))
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, prompt: &str) -> Option<String> {
        let result = match self.backend {
            Backend::Gemini => self.gemini(prompt).await,
            Backend::Openrouter => self.openrouter(prompt).await,
        };

        match result {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("Generation via {} failed: {:#}", self.backend, e);
                None
            }
        }
    }
}
