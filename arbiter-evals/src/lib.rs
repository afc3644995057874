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

//! # Arbiter Evaluation Framework
//!
//! LLM-as-judge evaluation of text outputs.
//!
//! ## Features
//!
//! - **Trait-based evaluator system**: every variant is a [`JudgeStrategy`]
//!   (prompts + response schema + score conversion) driven by one shared
//!   orchestration in [`LlmJudge`]
//! - **Built-in evaluators**: semantic similarity, custom criteria,
//!   multi-criteria, factuality and pairwise comparison
//! - **Validated structured responses**: judge output is checked against a
//!   schema, with a bounded repair re-prompt on failure
//! - **Middleware pipeline**: logging, metrics and caching around every
//!   evaluate/compare call
//! - **Interaction telemetry**: every judge round trip is recorded
//!
//! ## Example
//!
//! ```rust,ignore
//! use arbiter_evals::{Arbiter, EvaluateOptions};
//! use arbiter_evals::middleware::{MetricsMiddleware, MiddlewarePipeline};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), arbiter_evals::EvalError> {
//!     let arbiter = Arbiter::from_config(arbiter_core::ArbiterConfig::from_env(), Some("gpt-4o-mini"))?;
//!
//!     let metrics = Arc::new(MetricsMiddleware::new());
//!     let pipeline = Arc::new(MiddlewarePipeline::new().with_shared(metrics.clone()));
//!
//!     let score = arbiter
//!         .evaluate(
//!             "Paris is the capital of France",
//!             EvaluateOptions::new()
//!                 .reference("The capital of France is Paris")
//!                 .middleware(pipeline),
//!         )
//!         .await?;
//!
//!     println!("{}: {:.2}", score.name(), score.value());
//!     println!("{:?}", metrics.get_metrics());
//!     Ok(())
//! }
//! ```

use arbiter_core::{Score, ScoreError};
use async_trait::async_trait;
use thiserror::Error;

pub mod arbiter;
pub mod evaluator;
pub mod evaluators;
pub mod interaction;
pub mod llm_client;
pub mod middleware;
pub mod structured;

#[cfg(test)]
mod test_support;

pub use arbiter::{compare, evaluate, Arbiter, CompareOptions, EvaluateOptions};
pub use arbiter_core::{MetadataValue, MetricType, Provider};
pub use evaluator::{JudgeCore, JudgeStrategy, Judged, LlmJudge};
pub use evaluators::{
    AspectScores, ComparisonResult, CustomCriteriaEvaluator, FactualityEvaluator,
    MultiCriteriaEvaluator, PairwiseComparisonEvaluator, SemanticEvaluator, Winner,
};
pub use interaction::{Interaction, InteractionLog, InteractionPurpose};
pub use llm_client::{LLMClient, LLMError, LLMResponse, TokenUsage};
pub use middleware::{
    CachingMiddleware, EvalOutcome, LoggingMiddleware, MetricsMiddleware, MetricsSnapshot,
    Middleware, MiddlewareContext, MiddlewarePipeline,
};
pub use structured::{ResponseSchema, SchemaError, StructuredResponse};

/// Core trait that all absolute-judgment evaluators implement
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Stable identifier (e.g., "semantic_similarity"), the default score name
    fn name(&self) -> &str;

    /// Judge model behind this evaluator, as `provider/model`
    fn judge_model(&self) -> String;

    /// Evaluate one output, reporting the token usage of this call
    async fn evaluate_judged(
        &self,
        output: &str,
        reference: Option<&str>,
        criteria: Option<&str>,
    ) -> Result<Judged<Score>, EvalError>;

    /// Evaluate one output
    async fn evaluate(
        &self,
        output: &str,
        reference: Option<&str>,
        criteria: Option<&str>,
    ) -> Result<Score, EvalError> {
        Ok(self.evaluate_judged(output, reference, criteria).await?.value)
    }

    /// All judge interactions recorded by this evaluator, oldest first
    fn get_interactions(&self) -> Vec<Interaction>;

    /// Explicitly reset the interaction log
    fn clear_interactions(&self);
}

/// Broad class of an evaluation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SchemaValidation,
    Collaborator,
    Configuration,
    Middleware,
}

/// Errors that can occur during evaluation
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Schema validation failed after {attempts} attempt(s): {error}")]
    SchemaValidation {
        attempts: u32,
        #[source]
        error: SchemaError,
    },

    #[error("Judge produced an invalid score: {0}")]
    InvalidScore(#[from] ScoreError),

    #[error("LLM client error: {0}")]
    Collaborator(#[from] LLMError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Middleware '{middleware}' failed: {message}")]
    Middleware { middleware: String, message: String },
}

impl EvalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvalError::SchemaValidation { .. } | EvalError::InvalidScore(_) => {
                ErrorKind::SchemaValidation
            }
            EvalError::Collaborator(_) => ErrorKind::Collaborator,
            EvalError::Configuration(_) => ErrorKind::Configuration,
            EvalError::Middleware { .. } => ErrorKind::Middleware,
        }
    }

    pub fn middleware(middleware: &str, message: impl Into<String>) -> Self {
        EvalError::Middleware {
            middleware: middleware.to_string(),
            message: message.into(),
        }
    }
}

/// Reject empty caller input before any judge call is made
pub(crate) fn require_text(field: &str, value: &str) -> Result<(), EvalError> {
    if value.trim().is_empty() {
        return Err(EvalError::Configuration(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = EvalError::Configuration("output must not be empty".to_string());
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err: EvalError = LLMError::RateLimitExceeded.into();
        assert_eq!(err.kind(), ErrorKind::Collaborator);
        assert_eq!(err.to_string(), "LLM client error: Rate limit exceeded");

        let err = EvalError::middleware("auth", "denied");
        assert_eq!(err.kind(), ErrorKind::Middleware);
        assert_eq!(err.to_string(), "Middleware 'auth' failed: denied");
    }

    #[test]
    fn test_require_text() {
        assert!(require_text("output", "Paris").is_ok());
        let err = require_text("output", "  \n").unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: output must not be empty");
    }
}
