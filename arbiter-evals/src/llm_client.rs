// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! LLM client abstraction for LLM-as-judge evaluators
//!
//! The evaluators only ever see the [`LLMClient`] trait: send a system
//! prompt, a user prompt and the expected response schema, get back the raw
//! model text with token usage. Provider selection, authentication, retries
//! and rate limiting belong to the client; this crate never retries.

use crate::structured::ResponseSchema;
use crate::EvalError;
use arbiter_core::{LLMConfig, Provider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Trait for LLM clients used in evaluations
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Send a judge request and return the raw response
    async fn complete(&self, request: &JudgeRequest) -> Result<LLMResponse, LLMError>;

    /// Get model name
    fn model_name(&self) -> &str;

    fn provider(&self) -> Provider;
}

/// One judge call
#[derive(Debug, Clone)]
pub struct JudgeRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub schema: ResponseSchema,
    pub temperature: f32,
}

impl JudgeRequest {
    pub fn new(system_prompt: String, user_prompt: String, schema: ResponseSchema) -> Self {
        Self {
            system_prompt,
            user_prompt,
            schema,
            temperature: 0.0,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Response from LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
}

impl LLMResponse {
    /// Parse response as JSON
    pub fn as_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.content)
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    fn from_json(usage: &serde_json::Value, prompt_key: &str, completion_key: &str) -> Self {
        let prompt = clamp_count(usage[prompt_key].as_u64().unwrap_or(0));
        let completion = clamp_count(usage[completion_key].as_u64().unwrap_or(0));
        let mut usage_totals = Self::new(prompt, completion);
        if let Some(total) = usage["total_tokens"]
            .as_u64()
            .or_else(|| usage["totalTokenCount"].as_u64())
        {
            usage_totals.total_tokens = clamp_count(total);
        }
        usage_totals
    }
}

impl std::ops::Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, other: TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens.saturating_add(other.prompt_tokens),
            completion_tokens: self.completion_tokens.saturating_add(other.completion_tokens),
            total_tokens: self.total_tokens.saturating_add(other.total_tokens),
        }
    }
}

fn clamp_count(count: u64) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Errors from LLM clients
#[derive(Debug, Error)]
pub enum LLMError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LLMError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(LLMError::RateLimitExceeded);
    }
    if status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::GATEWAY_TIMEOUT
    {
        return Err(LLMError::Timeout);
    }
    let error_text = response.text().await?;
    Err(LLMError::ApiError(format!("{}: {}", status, error_text)))
}

/// OpenAI client implementation
///
/// Also serves Groq through its OpenAI-compatible endpoint.
pub struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    provider: Provider,
    client: reqwest::Client,
}

impl OpenAIClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            base_url: "https://api.openai.com/v1".to_string(),
            provider: Provider::OpenAI,
            client: reqwest::Client::new(),
        }
    }

    /// Groq client using the OpenAI-compatible API
    pub fn groq(api_key: String, model: String) -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            provider: Provider::Groq,
            ..Self::new(api_key, model)
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Groq only honors `json_schema` on a few models, so it gets JSON mode
    /// and relies on the schema instructions already in the prompt.
    fn response_format(&self, schema: &ResponseSchema) -> serde_json::Value {
        match self.provider {
            Provider::Groq => serde_json::json!({ "type": "json_object" }),
            _ => serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.to_json_schema(),
                    "strict": false
                }
            }),
        }
    }
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn complete(&self, request: &JudgeRequest) -> Result<LLMResponse, LLMError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": request.system_prompt
                },
                {
                    "role": "user",
                    "content": request.user_prompt
                }
            ],
            "temperature": request.temperature,
            "response_format": self.response_format(&request.schema)
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let response_data: serde_json::Value = check_status(response).await?.json().await?;

        let content = response_data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or(LLMError::InvalidResponse("Missing content".to_string()))?
            .to_string();

        let usage = TokenUsage::from_json(
            &response_data["usage"],
            "prompt_tokens",
            "completion_tokens",
        );

        Ok(LLMResponse {
            content,
            usage,
            model: self.model.clone(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> Provider {
        self.provider
    }
}

/// Anthropic Claude client implementation
pub struct AnthropicClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            base_url: "https://api.anthropic.com/v1".to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[async_trait]
impl LLMClient for AnthropicClient {
    // No native response schema; the format comes from the prompt instructions
    async fn complete(&self, request: &JudgeRequest) -> Result<LLMResponse, LLMError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": 4096,
            "messages": [
                {
                    "role": "user",
                    "content": request.user_prompt
                }
            ],
            "system": request.system_prompt,
            "temperature": request.temperature
        });

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let response_data: serde_json::Value = check_status(response).await?.json().await?;

        let content = response_data["content"][0]["text"]
            .as_str()
            .ok_or(LLMError::InvalidResponse("Missing content".to_string()))?
            .to_string();

        let usage = TokenUsage::from_json(&response_data["usage"], "input_tokens", "output_tokens");

        Ok(LLMResponse {
            content,
            usage,
            model: self.model.clone(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> Provider {
        Provider::Anthropic
    }
}

/// Google Gemini client implementation
pub struct GeminiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[async_trait]
impl LLMClient for GeminiClient {
    async fn complete(&self, request: &JudgeRequest) -> Result<LLMResponse, LLMError> {
        let body = serde_json::json!({
            "systemInstruction": {
                "parts": [{ "text": request.system_prompt }]
            },
            "contents": [
                {
                    "role": "user",
                    "parts": [{ "text": request.user_prompt }]
                }
            ],
            "generationConfig": {
                "temperature": request.temperature,
                "responseMimeType": "application/json",
                "responseJsonSchema": request.schema.to_json_schema()
            }
        });

        let response = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let response_data: serde_json::Value = check_status(response).await?.json().await?;

        let content = response_data["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or(LLMError::InvalidResponse("Missing content".to_string()))?
            .to_string();

        let usage = TokenUsage::from_json(
            &response_data["usageMetadata"],
            "promptTokenCount",
            "candidatesTokenCount",
        );

        Ok(LLMResponse {
            content,
            usage,
            model: self.model.clone(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> Provider {
        Provider::Gemini
    }
}

/// Resolve a model selector to a client.
///
/// Fails with a configuration error, before any network traffic, when the
/// provider cannot be inferred or its API key is missing.
pub fn client_for_model(model: &str, config: &LLMConfig) -> Result<Arc<dyn LLMClient>, EvalError> {
    let provider = Provider::detect(model).ok_or_else(|| {
        EvalError::Configuration(format!(
            "Cannot determine provider for model '{}'; use a 'provider/model' selector",
            model
        ))
    })?;

    let api_key = config
        .api_key(provider)
        .ok_or_else(|| {
            EvalError::Configuration(format!("No API key configured for provider {}", provider))
        })?
        .to_string();

    let model_id = Provider::model_id(model).to_string();
    let base_url = config.base_url(provider).map(str::to_string);

    let client: Arc<dyn LLMClient> = match provider {
        Provider::OpenAI | Provider::Groq => {
            let mut client = if provider == Provider::Groq {
                OpenAIClient::groq(api_key, model_id)
            } else {
                OpenAIClient::new(api_key, model_id)
            };
            if let Some(url) = base_url {
                client = client.with_base_url(url);
            }
            Arc::new(client)
        }
        Provider::Anthropic => {
            let mut client = AnthropicClient::new(api_key, model_id);
            if let Some(url) = base_url {
                client = client.with_base_url(url);
            }
            Arc::new(client)
        }
        Provider::Gemini => {
            let mut client = GeminiClient::new(api_key, model_id);
            if let Some(url) = base_url {
                client = client.with_base_url(url);
            }
            Arc::new(client)
        }
    };

    tracing::debug!(provider = %provider, model = client.model_name(), "Resolved judge client");
    Ok(client)
}
