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

//! Scripted judge client shared by the unit tests

use crate::llm_client::{JudgeRequest, LLMClient, LLMError, LLMResponse, TokenUsage};
use arbiter_core::Provider;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

enum Script {
    Queue(VecDeque<String>),
    Repeat(String),
    Fail,
}

/// Mock LLM client replaying canned responses in order
pub struct ScriptedClient {
    script: Mutex<Script>,
    requests: Mutex<Vec<JudgeRequest>>,
    delay: Option<Duration>,
    model: String,
}

impl ScriptedClient {
    pub fn new(responses: Vec<&str>) -> Arc<Self> {
        Self::build(Script::Queue(
            responses.into_iter().map(str::to_string).collect(),
        ))
    }

    pub fn repeating(response: &str) -> Arc<Self> {
        Self::build(Script::Repeat(response.to_string()))
    }

    /// Repeating client reporting a specific model name
    pub fn repeating_model(model: &str, response: &str) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Script::Repeat(response.to_string())),
            requests: Mutex::new(Vec::new()),
            delay: None,
            model: model.to_string(),
        })
    }

    /// Every call fails with a rate-limit error
    pub fn failing() -> Arc<Self> {
        Self::build(Script::Fail)
    }

    /// Repeating client that sleeps before answering
    pub fn slow(response: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Script::Repeat(response.to_string())),
            requests: Mutex::new(Vec::new()),
            delay: Some(delay),
            model: "mock-model".to_string(),
        })
    }

    fn build(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            requests: Mutex::new(Vec::new()),
            delay: None,
            model: "mock-model".to_string(),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn user_prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|r| r.user_prompt.clone())
            .collect()
    }

    pub fn system_prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|r| r.system_prompt.clone())
            .collect()
    }

    pub fn usage_per_call(&self) -> TokenUsage {
        TokenUsage::new(100, 20)
    }
}

#[async_trait]
impl LLMClient for ScriptedClient {
    async fn complete(&self, request: &JudgeRequest) -> Result<LLMResponse, LLMError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.requests.lock().push(request.clone());

        let content = match &mut *self.script.lock() {
            Script::Queue(queue) => queue
                .pop_front()
                .ok_or_else(|| LLMError::InvalidResponse("script exhausted".to_string()))?,
            Script::Repeat(response) => response.clone(),
            Script::Fail => return Err(LLMError::RateLimitExceeded),
        };

        Ok(LLMResponse {
            content,
            usage: self.usage_per_call(),
            model: self.model.clone(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> Provider {
        Provider::OpenAI
    }
}
