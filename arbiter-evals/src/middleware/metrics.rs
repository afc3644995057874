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

//! Running call metrics across every intercepted call

use super::{EvalOutcome, Middleware, MiddlewareContext, Next};
use crate::EvalError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct MetricsState {
    total_requests: u64,
    failed_requests: u64,
    evaluations: u64,
    comparisons: u64,
    total_time: Duration,
    tokens_used: u64,
}

/// Point-in-time view of the accumulated metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Calls intercepted, failed ones included
    pub total_requests: u64,
    pub failed_requests: u64,
    pub evaluations: u64,
    pub comparisons: u64,
    /// Seconds spent in the rest of the chain
    pub total_time: f64,
    pub avg_time_per_request: f64,
    pub tokens_used: u64,
}

/// Accumulates call count, latency and token usage; safe to share
#[derive(Debug, Default)]
pub struct MetricsMiddleware {
    state: Mutex<MetricsState>,
}

impl MetricsMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        let state = self.state.lock();
        let total_time = state.total_time.as_secs_f64();

        MetricsSnapshot {
            total_requests: state.total_requests,
            failed_requests: state.failed_requests,
            evaluations: state.evaluations,
            comparisons: state.comparisons,
            total_time,
            avg_time_per_request: if state.total_requests > 0 {
                total_time / state.total_requests as f64
            } else {
                0.0
            },
            tokens_used: state.tokens_used,
        }
    }

    pub fn reset(&self) {
        *self.state.lock() = MetricsState::default();
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn process(
        &self,
        output: &str,
        reference: Option<&str>,
        next: Next<'_>,
        context: &mut MiddlewareContext,
    ) -> Result<EvalOutcome, EvalError> {
        let start = Instant::now();
        let result = next.run(output, reference, context).await;
        let elapsed = start.elapsed();

        let mut state = self.state.lock();
        state.total_requests += 1;
        state.total_time += elapsed;
        state.tokens_used += context.tokens_used().unwrap_or(0);
        if context.is_pairwise() {
            state.comparisons += 1;
        } else {
            state.evaluations += 1;
        }
        if result.is_err() {
            state.failed_requests += 1;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluators::{PairwiseComparisonEvaluator, SemanticEvaluator};
    use crate::middleware::MiddlewarePipeline;
    use crate::test_support::ScriptedClient;
    use crate::Evaluator;
    use futures::future::join_all;
    use std::sync::Arc;

    const SCORE: &str = r#"{"score": 0.7, "explanation": "ok"}"#;

    #[tokio::test]
    async fn test_accumulates_over_sequential_calls() {
        let metrics = Arc::new(MetricsMiddleware::new());
        let pipeline = MiddlewarePipeline::new().with_shared(metrics.clone());
        let client = ScriptedClient::repeating(SCORE);
        let evaluator = SemanticEvaluator::new(client.clone());

        for _ in 0..3 {
            pipeline
                .evaluate(&evaluator, "text", None, None)
                .await
                .unwrap();
        }

        let snapshot = metrics.get_metrics();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.evaluations, 3);
        assert_eq!(snapshot.avg_time_per_request, snapshot.total_time / 3.0);
        assert_eq!(
            snapshot.tokens_used,
            3 * client.usage_per_call().total_tokens as u64
        );
    }

    #[tokio::test]
    async fn test_counts_comparisons_and_failures() {
        let metrics = Arc::new(MetricsMiddleware::new());
        let pipeline = MiddlewarePipeline::new().with_shared(metrics.clone());

        let pairwise = PairwiseComparisonEvaluator::new(ScriptedClient::repeating(
            r#"{"winner": "output_a", "confidence": 0.9, "reasoning": "better"}"#,
        ));
        pipeline
            .compare(&pairwise, "a", "b", "brevity", None)
            .await
            .unwrap();

        let broken = SemanticEvaluator::new(ScriptedClient::failing());
        assert!(pipeline.evaluate(&broken, "text", None, None).await.is_err());

        let snapshot = metrics.get_metrics();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.comparisons, 1);
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.tokens_used, 120);

        metrics.reset();
        assert_eq!(metrics.get_metrics().total_requests, 0);
        assert_eq!(metrics.get_metrics().avg_time_per_request, 0.0);
    }

    #[tokio::test]
    async fn test_concurrent_calls_lose_no_updates() {
        let metrics = Arc::new(MetricsMiddleware::new());
        let pipeline = MiddlewarePipeline::new().with_shared(metrics.clone());
        let evaluator =
            SemanticEvaluator::new(ScriptedClient::slow(SCORE, Duration::from_millis(5)));

        let calls = (0..20).map(|_| pipeline.evaluate(&evaluator, "text", None, None));
        let results = join_all(calls).await;

        assert!(results.iter().all(Result::is_ok));
        let snapshot = metrics.get_metrics();
        assert_eq!(snapshot.total_requests, 20);
        assert_eq!(snapshot.tokens_used, 20 * 120);
        assert_eq!(evaluator.get_interactions().len(), 20);
    }
}
