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

//! Middleware pipeline around evaluate/compare calls
//!
//! A [`MiddlewarePipeline`] is an ordered list of [`Middleware`]. The first
//! entry is outermost: it sees the call first and the result last. Each
//! middleware receives a [`Next`] continuation and decides whether to run
//! the rest of the chain; returning without calling [`Next::run`]
//! short-circuits it, and that return value becomes the result.
//!
//! A fresh [`MiddlewareContext`] is created for every top-level call and
//! dropped when it returns.

mod caching;
mod logging;
mod metrics;

pub use caching::{CacheStats, CachingMiddleware};
pub use logging::LoggingMiddleware;
pub use metrics::{MetricsMiddleware, MetricsSnapshot};

use crate::evaluators::{ComparisonResult, PairwiseComparisonEvaluator};
use crate::{EvalError, Evaluator};
use arbiter_core::Score;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Context keys seeded by the pipeline and its terminal handlers
pub mod keys {
    pub const IS_PAIRWISE: &str = "is_pairwise_comparison";
    pub const EVALUATOR: &str = "evaluator";
    /// Judge model as `provider/model`
    pub const MODEL: &str = "model";
    pub const CRITERIA: &str = "criteria";
    pub const PAIRWISE_DATA: &str = "pairwise_data";
    /// Written by the terminal handler once the judge returns
    pub const TOKENS_USED: &str = "tokens_used";
    /// Judge round trips made by this call
    pub const INTERACTIONS: &str = "interactions";
}

/// Result flowing back through the chain
#[derive(Debug, Clone, PartialEq)]
pub enum EvalOutcome {
    Score(Score),
    Comparison(ComparisonResult),
}

impl EvalOutcome {
    pub fn as_score(&self) -> Option<&Score> {
        match self {
            EvalOutcome::Score(score) => Some(score),
            EvalOutcome::Comparison(_) => None,
        }
    }

    pub fn into_score(self) -> Result<Score, EvalError> {
        match self {
            EvalOutcome::Score(score) => Ok(score),
            EvalOutcome::Comparison(_) => Err(EvalError::middleware(
                "pipeline",
                "expected a score, got a comparison result",
            )),
        }
    }

    pub fn into_comparison(self) -> Result<ComparisonResult, EvalError> {
        match self {
            EvalOutcome::Comparison(result) => Ok(result),
            EvalOutcome::Score(_) => Err(EvalError::middleware(
                "pipeline",
                "expected a comparison result, got a score",
            )),
        }
    }
}

/// Per-call key/value state shared along the chain
#[derive(Debug, Clone, Default)]
pub struct MiddlewareContext {
    values: HashMap<String, Value>,
}

impl MiddlewareContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_evaluation(evaluator: &str, model: &str, criteria: Option<&str>) -> Self {
        let mut context = Self::new();
        context.insert(keys::IS_PAIRWISE, false);
        context.insert(keys::EVALUATOR, evaluator);
        context.insert(keys::MODEL, model);
        context.insert(keys::CRITERIA, criteria);
        context
    }

    pub fn for_comparison(
        evaluator: &str,
        model: &str,
        output_a: &str,
        output_b: &str,
        criteria: &str,
        reference: Option<&str>,
    ) -> Self {
        let mut context = Self::new();
        context.insert(keys::IS_PAIRWISE, true);
        context.insert(keys::EVALUATOR, evaluator);
        context.insert(keys::MODEL, model);
        context.insert(keys::CRITERIA, criteria);
        context.insert(
            keys::PAIRWISE_DATA,
            json!({
                "output_a": output_a,
                "output_b": output_b,
                "criteria": criteria,
                "reference": reference,
            }),
        );
        context
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn is_pairwise(&self) -> bool {
        self.get(keys::IS_PAIRWISE)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn tokens_used(&self) -> Option<u64> {
        self.get(keys::TOKENS_USED).and_then(Value::as_u64)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

/// Interceptor around an evaluate/compare call
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    async fn process(
        &self,
        output: &str,
        reference: Option<&str>,
        next: Next<'_>,
        context: &mut MiddlewareContext,
    ) -> Result<EvalOutcome, EvalError>;
}

/// Terminal call at the end of the chain
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        output: &str,
        reference: Option<&str>,
        context: &mut MiddlewareContext,
    ) -> Result<EvalOutcome, EvalError>;
}

/// Continuation over the rest of the chain
#[derive(Clone, Copy)]
pub struct Next<'a> {
    remaining: &'a [Arc<dyn Middleware>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub fn new(remaining: &'a [Arc<dyn Middleware>], handler: &'a dyn Handler) -> Self {
        Self { remaining, handler }
    }

    pub async fn run(
        self,
        output: &str,
        reference: Option<&str>,
        context: &mut MiddlewareContext,
    ) -> Result<EvalOutcome, EvalError> {
        match self.remaining.split_first() {
            Some((current, rest)) => {
                current
                    .process(output, reference, Next::new(rest, self.handler), context)
                    .await
            }
            None => self.handler.handle(output, reference, context).await,
        }
    }
}

/// Ordered middleware chain, first entry outermost
#[derive(Clone, Default)]
pub struct MiddlewarePipeline {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MiddlewarePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<M: Middleware + 'static>(self, middleware: M) -> Self {
        self.with_shared(Arc::new(middleware))
    }

    /// Add a middleware the caller keeps a handle to (e.g. to read metrics)
    pub fn with_shared(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.middleware.iter().map(|m| m.name()).collect()
    }

    /// Run the chain around an arbitrary terminal handler
    pub async fn execute(
        &self,
        output: &str,
        reference: Option<&str>,
        handler: &dyn Handler,
        context: &mut MiddlewareContext,
    ) -> Result<EvalOutcome, EvalError> {
        Next::new(&self.middleware, handler)
            .run(output, reference, context)
            .await
    }

    /// Evaluate through the chain
    pub async fn evaluate(
        &self,
        evaluator: &dyn Evaluator,
        output: &str,
        reference: Option<&str>,
        criteria: Option<&str>,
    ) -> Result<Score, EvalError> {
        let mut context = MiddlewareContext::for_evaluation(
            evaluator.name(),
            &evaluator.judge_model(),
            criteria,
        );
        let handler = EvaluateHandler {
            evaluator,
            criteria,
        };
        self.execute(output, reference, &handler, &mut context)
            .await?
            .into_score()
    }

    /// Compare two outputs through the chain; the chain sees `output_a` as its output
    pub async fn compare(
        &self,
        evaluator: &PairwiseComparisonEvaluator,
        output_a: &str,
        output_b: &str,
        criteria: &str,
        reference: Option<&str>,
    ) -> Result<ComparisonResult, EvalError> {
        let mut context = MiddlewareContext::for_comparison(
            evaluator.name(),
            &evaluator.judge_model(),
            output_a,
            output_b,
            criteria,
            reference,
        );
        let handler = CompareHandler {
            evaluator,
            output_b,
            criteria,
        };
        self.execute(output_a, reference, &handler, &mut context)
            .await?
            .into_comparison()
    }
}

struct EvaluateHandler<'a> {
    evaluator: &'a dyn Evaluator,
    criteria: Option<&'a str>,
}

#[async_trait]
impl<'a> Handler for EvaluateHandler<'a> {
    async fn handle(
        &self,
        output: &str,
        reference: Option<&str>,
        context: &mut MiddlewareContext,
    ) -> Result<EvalOutcome, EvalError> {
        let judged = self
            .evaluator
            .evaluate_judged(output, reference, self.criteria)
            .await?;
        context.insert(keys::TOKENS_USED, judged.usage.total_tokens);
        context.insert(keys::INTERACTIONS, judged.attempts);
        Ok(EvalOutcome::Score(judged.value))
    }
}

struct CompareHandler<'a> {
    evaluator: &'a PairwiseComparisonEvaluator,
    output_b: &'a str,
    criteria: &'a str,
}

#[async_trait]
impl<'a> Handler for CompareHandler<'a> {
    async fn handle(
        &self,
        output: &str,
        reference: Option<&str>,
        context: &mut MiddlewareContext,
    ) -> Result<EvalOutcome, EvalError> {
        let judged = self
            .evaluator
            .compare_judged(output, self.output_b, self.criteria, reference)
            .await?;
        context.insert(keys::TOKENS_USED, judged.usage.total_tokens);
        context.insert(keys::INTERACTIONS, judged.attempts);
        Ok(EvalOutcome::Comparison(judged.value))
    }
}
