//! Client for the external model-serving endpoint (Ollama `generate` API).
//!
//! Every call is a single best-effort POST: no retry, no timeout.

use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_MODEL: &str = "llama3.1";

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("model endpoint unreachable: {0}")]
    Network(#[from] reqwest::Error),

    #[error("model endpoint returned invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("model error: {0}")]
    Model(String),

    #[error("model reply had no response text")]
    MissingResponse,
}

/// Sampling options forwarded as Ollama `options`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Ollama's name for the max token count
    #[serde(rename = "num_predict", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerateOptions {
    fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.max_tokens.is_none()
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Debug, Deserialize)]
struct GenerateReply {
    response: Option<String>,
    error: Option<String>,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

/// Text of a model reply plus token accounting, when the endpoint reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

#[derive(Clone)]
pub struct ModelClient {
    http: reqwest::Client,
    url: String,
    model: String,
}

impl ModelClient {
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            model: model.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// POST `{model, prompt, stream: false}` and return the reply body as
    /// parsed JSON, whatever its shape. The HTTP status is not inspected.
    pub async fn generate_raw(&self, prompt: &str) -> Result<serde_json::Value, ProviderError> {
        self.post(prompt, None).await
    }

    /// Generate a reply and extract its text.
    pub async fn complete(
        &self,
        prompt: &str,
        options: GenerateOptions,
    ) -> Result<Completion, ProviderError> {
        let options = (!options.is_empty()).then_some(options);
        let value = self.post(prompt, options).await?;
        let reply: GenerateReply = serde_json::from_value(value)?;

        if let Some(error) = reply.error {
            return Err(ProviderError::Model(error));
        }

        let text = reply.response.ok_or(ProviderError::MissingResponse)?;
        Ok(Completion {
            text,
            prompt_tokens: reply.prompt_eval_count,
            completion_tokens: reply.eval_count,
        })
    }

    async fn post(
        &self,
        prompt: &str,
        options: Option<GenerateOptions>,
    ) -> Result<serde_json::Value, ProviderError> {
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options,
        };

        let response = self.http.post(&self.url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        debug!("Model endpoint replied {} ({} bytes)", status, text.len());

        Ok(serde_json::from_str(&text)?)
    }
}
