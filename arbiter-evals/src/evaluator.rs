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

//! Shared judge orchestration
//!
//! [`JudgeCore`] runs the call sequence every evaluator shares: send the
//! prompts, validate the raw answer against the declared schema, re-prompt
//! with the validation error when it does not match (up to
//! `max_repair_attempts` times), and record each completed round trip.
//! [`LlmJudge`] adds the variant-specific parts through a [`JudgeStrategy`].

use crate::interaction::{Interaction, InteractionLog, InteractionPurpose};
use crate::llm_client::{JudgeRequest, LLMClient, TokenUsage};
use crate::structured::{parse_structured, SchemaError, StructuredResponse};
use crate::{require_text, EvalError, Evaluator};
use arbiter_core::config::DEFAULT_MAX_REPAIR_ATTEMPTS;
use arbiter_core::Score;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// A value produced by the judge, with the cost of producing it
#[derive(Debug, Clone)]
pub struct Judged<T> {
    pub value: T,
    /// Tokens spent across all attempts of this call
    pub usage: TokenUsage,
    /// Round trips made (1 = no repair needed)
    pub attempts: u32,
}

impl<T> Judged<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Judged<U> {
        Judged {
            value: f(self.value),
            usage: self.usage,
            attempts: self.attempts,
        }
    }
}

/// Variant-specific parts of an evaluator
pub trait JudgeStrategy: Send + Sync + 'static {
    type Response: StructuredResponse;

    /// Stable identifier, used as the default score name
    fn name(&self) -> &str;

    fn system_prompt(&self) -> String;

    fn user_prompt(&self, output: &str, reference: Option<&str>, criteria: Option<&str>)
        -> String;

    /// Convert a validated response into a score. Must be pure.
    fn compute_score(&self, response: Self::Response) -> Result<Score, EvalError>;
}

/// Prompt/validate/repair loop around an LLM client
pub struct JudgeCore {
    client: Arc<dyn LLMClient>,
    interactions: InteractionLog,
    max_repair_attempts: u32,
    temperature: f32,
}

impl JudgeCore {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            client,
            interactions: InteractionLog::new(),
            max_repair_attempts: DEFAULT_MAX_REPAIR_ATTEMPTS,
            temperature: 0.0,
        }
    }

    pub fn with_max_repair_attempts(mut self, attempts: u32) -> Self {
        self.max_repair_attempts = attempts;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn client(&self) -> &Arc<dyn LLMClient> {
        &self.client
    }

    /// Judge model as `provider/model`
    pub fn judge_model(&self) -> String {
        format!("{}/{}", self.client.provider(), self.client.model_name())
    }

    pub fn interactions(&self) -> &InteractionLog {
        &self.interactions
    }

    /// Ask the judge for a response of type `R`
    pub async fn judge<R: StructuredResponse>(
        &self,
        evaluator: &str,
        purpose: InteractionPurpose,
        system_prompt: String,
        user_prompt: String,
    ) -> Result<Judged<R>, EvalError> {
        let schema = R::schema();
        let base_prompt = format!("{}\n\n{}", user_prompt, schema.instructions());
        let mut prompt = base_prompt.clone();
        let mut usage = TokenUsage::default();
        let mut attempt = 0;
        // Committed only once the call finishes; a failed client call leaves no trace
        let mut round_trips = Vec::new();

        loop {
            let request = JudgeRequest::new(system_prompt.clone(), prompt.clone(), schema.clone())
                .with_temperature(self.temperature);

            let start = Instant::now();
            let response = self.client.complete(&request).await?;
            let latency = start.elapsed();
            usage = usage + response.usage;

            let parsed = parse_structured::<R>(&response.content);

            round_trips.push(Interaction {
                id: Uuid::new_v4(),
                evaluator: evaluator.to_string(),
                purpose,
                timestamp: Utc::now(),
                model: response.model.clone(),
                system_prompt: request.system_prompt,
                user_prompt: request.user_prompt,
                response: response.content.clone(),
                latency,
                usage: response.usage,
                attempt,
                validation_error: parsed.as_ref().err().map(ToString::to_string),
            });

            match parsed {
                Ok(value) => {
                    debug!(
                        evaluator,
                        judgment = value.judgment(),
                        attempts = attempt + 1,
                        latency_ms = latency.as_millis() as u64,
                        tokens = usage.total_tokens,
                        "Judge response validated"
                    );
                    self.interactions.record_all(round_trips);
                    return Ok(Judged {
                        value,
                        usage,
                        attempts: attempt + 1,
                    });
                }
                Err(error) if attempt < self.max_repair_attempts => {
                    warn!(
                        evaluator,
                        attempt,
                        error = %error,
                        "Judge response failed validation, re-prompting"
                    );
                    attempt += 1;
                    prompt = repair_prompt(&base_prompt, &response.content, &error);
                }
                Err(error) => {
                    self.interactions.record_all(round_trips);
                    return Err(EvalError::SchemaValidation {
                        attempts: attempt + 1,
                        error,
                    });
                }
            }
        }
    }
}

fn repair_prompt(base_prompt: &str, previous: &str, error: &SchemaError) -> String {
    format!(
        "{base_prompt}\n\nYour previous response was:\n{previous}\n\n\
         It was rejected because it failed validation: {error}\n\
         Respond again with a corrected JSON object that satisfies every requirement above."
    )
}

/// LLM-as-judge evaluator built from a [`JudgeStrategy`]
pub struct LlmJudge<S: JudgeStrategy> {
    strategy: S,
    core: JudgeCore,
}

impl<S: JudgeStrategy> LlmJudge<S> {
    pub fn with_strategy(llm_client: Arc<dyn LLMClient>, strategy: S) -> Self {
        Self {
            strategy,
            core: JudgeCore::new(llm_client),
        }
    }

    /// Re-prompts allowed after a schema validation failure (default: 1)
    pub fn with_max_repair_attempts(mut self, attempts: u32) -> Self {
        self.core = self.core.with_max_repair_attempts(attempts);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.core = self.core.with_temperature(temperature);
        self
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }
}

#[async_trait]
impl<S: JudgeStrategy> Evaluator for LlmJudge<S> {
    fn name(&self) -> &str {
        self.strategy.name()
    }

    fn judge_model(&self) -> String {
        self.core.judge_model()
    }

    async fn evaluate_judged(
        &self,
        output: &str,
        reference: Option<&str>,
        criteria: Option<&str>,
    ) -> Result<Judged<Score>, EvalError> {
        require_text("output", output)?;

        let reference = reference.filter(|r| !r.trim().is_empty());
        let criteria = criteria.filter(|c| !c.trim().is_empty());

        let system_prompt = self.strategy.system_prompt();
        let user_prompt = self.strategy.user_prompt(output, reference, criteria);

        let judged = self
            .core
            .judge::<S::Response>(
                self.strategy.name(),
                InteractionPurpose::Evaluation,
                system_prompt,
                user_prompt,
            )
            .await?;

        let attempts = judged.attempts;
        let usage = judged.usage;
        let score = self.strategy.compute_score(judged.value)?;

        Ok(Judged {
            value: score,
            usage,
            attempts,
        })
    }

    fn get_interactions(&self) -> Vec<Interaction> {
        self.core.interactions().snapshot()
    }

    fn clear_interactions(&self) {
        self.core.interactions().clear();
    }
}
