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

//! High-level entry points
//!
//! [`Arbiter`] resolves a judge client from configuration, keeps one
//! evaluator per metric so their interaction logs accumulate, and routes
//! calls through an optional [`MiddlewarePipeline`].

use crate::evaluator::LlmJudge;
use crate::evaluators::{
    ComparisonResult, CustomCriteria, Factuality, MultiCriteria, PairwiseComparisonEvaluator,
    SemanticSimilarity,
};
use crate::interaction::Interaction;
use crate::llm_client::{client_for_model, LLMClient};
use crate::middleware::MiddlewarePipeline;
use crate::{require_text, EvalError, Evaluator, JudgeStrategy};
use arbiter_core::{ArbiterConfig, MetricType, Score};
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Options for [`Arbiter::evaluate`]
#[derive(Clone, Default)]
pub struct EvaluateOptions {
    pub reference: Option<String>,
    pub criteria: Option<String>,
    /// Defaults to semantic similarity
    pub metric: Option<MetricType>,
    /// With [`MetricType::Custom`], score each criterion separately
    pub per_criterion: bool,
    pub middleware: Option<Arc<MiddlewarePipeline>>,
}

impl EvaluateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn criteria(mut self, criteria: impl Into<String>) -> Self {
        self.criteria = Some(criteria.into());
        self
    }

    pub fn metric(mut self, metric: MetricType) -> Self {
        self.metric = Some(metric);
        self
    }

    pub fn per_criterion(mut self, per_criterion: bool) -> Self {
        self.per_criterion = per_criterion;
        self
    }

    pub fn middleware(mut self, pipeline: Arc<MiddlewarePipeline>) -> Self {
        self.middleware = Some(pipeline);
        self
    }
}

/// Options for [`Arbiter::compare`]
#[derive(Clone, Default)]
pub struct CompareOptions {
    pub reference: Option<String>,
    pub middleware: Option<Arc<MiddlewarePipeline>>,
}

impl CompareOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn middleware(mut self, pipeline: Arc<MiddlewarePipeline>) -> Self {
        self.middleware = Some(pipeline);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EvaluatorKind {
    Semantic,
    Custom,
    MultiCriteria,
    Factuality,
}

impl EvaluatorKind {
    fn resolve(metric: MetricType, per_criterion: bool) -> Result<Self, EvalError> {
        match metric {
            MetricType::SemanticSimilarity => Ok(Self::Semantic),
            MetricType::Factuality => Ok(Self::Factuality),
            MetricType::Custom if per_criterion => Ok(Self::MultiCriteria),
            MetricType::Custom => Ok(Self::Custom),
            other => Err(EvalError::Configuration(format!(
                "Metric '{}' is not supported; use semantic_similarity, factuality or custom",
                other
            ))),
        }
    }
}

/// Evaluation facade bound to one judge client
pub struct Arbiter {
    client: Arc<dyn LLMClient>,
    config: ArbiterConfig,
    evaluators: Mutex<HashMap<EvaluatorKind, Arc<dyn Evaluator>>>,
    pairwise: PairwiseComparisonEvaluator,
}

impl Arbiter {
    pub fn new(client: Arc<dyn LLMClient>, config: ArbiterConfig) -> Self {
        let pairwise = PairwiseComparisonEvaluator::new(client.clone())
            .with_max_repair_attempts(config.evaluation.max_repair_attempts)
            .with_temperature(config.llm.temperature);

        Self {
            client,
            config,
            evaluators: Mutex::new(HashMap::new()),
            pairwise,
        }
    }

    /// Validate `config` and resolve the judge for `model` (or the configured default)
    pub fn from_config(config: ArbiterConfig, model: Option<&str>) -> Result<Self, EvalError> {
        config
            .validate()
            .map_err(|e| EvalError::Configuration(e.to_string()))?;

        let model = model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(&config.llm.default_model);
        let client = client_for_model(model, &config.llm)?;

        info!(
            provider = %client.provider(),
            model = client.model_name(),
            "Arbiter initialised"
        );
        Ok(Self::new(client, config))
    }

    pub fn client(&self) -> &Arc<dyn LLMClient> {
        &self.client
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    fn build<S: JudgeStrategy>(&self, strategy: S) -> Arc<dyn Evaluator> {
        Arc::new(
            LlmJudge::with_strategy(self.client.clone(), strategy)
                .with_max_repair_attempts(self.config.evaluation.max_repair_attempts)
                .with_temperature(self.config.llm.temperature),
        )
    }

    /// Evaluator for `metric`, shared across calls
    pub fn evaluator(
        &self,
        metric: MetricType,
        per_criterion: bool,
    ) -> Result<Arc<dyn Evaluator>, EvalError> {
        let kind = EvaluatorKind::resolve(metric, per_criterion)?;
        let mut evaluators = self.evaluators.lock();

        let evaluator = evaluators
            .entry(kind)
            .or_insert_with(|| match kind {
                EvaluatorKind::Semantic => self.build(SemanticSimilarity),
                EvaluatorKind::Custom => self.build(CustomCriteria),
                EvaluatorKind::MultiCriteria => self.build(MultiCriteria),
                EvaluatorKind::Factuality => self.build(Factuality),
            })
            .clone();

        Ok(evaluator)
    }

    pub fn pairwise(&self) -> &PairwiseComparisonEvaluator {
        &self.pairwise
    }

    pub async fn evaluate(&self, output: &str, options: EvaluateOptions) -> Result<Score, EvalError> {
        require_text("output", output)?;

        let metric = options.metric.unwrap_or(MetricType::SemanticSimilarity);
        let evaluator = self.evaluator(metric, options.per_criterion)?;
        let reference = options.reference.as_deref();
        let criteria = options.criteria.as_deref();

        debug!(evaluator = evaluator.name(), "Evaluating output");

        match &options.middleware {
            Some(pipeline) => {
                pipeline
                    .evaluate(evaluator.as_ref(), output, reference, criteria)
                    .await
            }
            None => evaluator.evaluate(output, reference, criteria).await,
        }
    }

    /// Evaluate several outputs concurrently; results keep input order
    pub async fn evaluate_batch(
        &self,
        outputs: &[&str],
        options: EvaluateOptions,
    ) -> Vec<Result<Score, EvalError>> {
        let calls = outputs
            .iter()
            .map(|output| self.evaluate(output, options.clone()));
        join_all(calls).await
    }

    pub async fn compare(
        &self,
        output_a: &str,
        output_b: &str,
        criteria: &str,
        options: CompareOptions,
    ) -> Result<ComparisonResult, EvalError> {
        require_text("output_a", output_a)?;
        require_text("output_b", output_b)?;

        let reference = options.reference.as_deref();

        match &options.middleware {
            Some(pipeline) => {
                pipeline
                    .compare(&self.pairwise, output_a, output_b, criteria, reference)
                    .await
            }
            None => {
                self.pairwise
                    .compare(output_a, output_b, criteria, reference)
                    .await
            }
        }
    }

    /// Interactions of every evaluator this facade has used, oldest first
    pub fn get_interactions(&self) -> Vec<Interaction> {
        let evaluators: Vec<Arc<dyn Evaluator>> =
            self.evaluators.lock().values().cloned().collect();

        let mut interactions: Vec<Interaction> = evaluators
            .iter()
            .flat_map(|e| e.get_interactions())
            .chain(self.pairwise.get_interactions())
            .collect();
        interactions.sort_by_key(|i| i.timestamp);
        interactions
    }

    pub fn clear_interactions(&self) {
        for evaluator in self.evaluators.lock().values() {
            evaluator.clear_interactions();
        }
        self.pairwise.clear_interactions();
    }
}

/// One-shot evaluation with configuration taken from the environment
pub async fn evaluate(
    output: &str,
    model: Option<&str>,
    options: EvaluateOptions,
) -> Result<Score, EvalError> {
    require_text("output", output)?;
    if let Some(metric) = options.metric {
        EvaluatorKind::resolve(metric, options.per_criterion)?;
    }

    Arbiter::from_config(ArbiterConfig::from_env(), model)?
        .evaluate(output, options)
        .await
}

/// One-shot pairwise comparison with configuration taken from the environment
pub async fn compare(
    output_a: &str,
    output_b: &str,
    criteria: &str,
    model: Option<&str>,
    options: CompareOptions,
) -> Result<ComparisonResult, EvalError> {
    require_text("output_a", output_a)?;
    require_text("output_b", output_b)?;

    Arbiter::from_config(ArbiterConfig::from_env(), model)?
        .compare(output_a, output_b, criteria, options)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluators::Winner;
    use crate::middleware::{MetricsMiddleware, MiddlewarePipeline};
    use crate::test_support::ScriptedClient;
    use crate::ErrorKind;
    use std::time::Duration;

    const PARIS: &str = r#"{
        "score": 0.96,
        "confidence": 0.9,
        "explanation": "Same fact, different order",
        "key_similarities": ["Paris is the capital of France"]
    }"#;

    #[tokio::test]
    async fn test_evaluate_defaults_to_semantic_similarity() {
        let client = ScriptedClient::repeating(PARIS);
        let arbiter = Arbiter::new(client.clone(), ArbiterConfig::default());

        let score = arbiter
            .evaluate(
                "Paris is the capital of France",
                EvaluateOptions::new().reference("The capital of France is Paris"),
            )
            .await
            .unwrap();

        assert_eq!(score.name(), "semantic_similarity");
        assert!(score.value() >= 0.9);
        assert_eq!(arbiter.get_interactions().len(), 1);
    }

    #[tokio::test]
    async fn test_evaluators_are_reused_across_calls() {
        let arbiter = Arbiter::new(ScriptedClient::repeating(PARIS), ArbiterConfig::default());

        arbiter.evaluate("one", EvaluateOptions::new()).await.unwrap();
        arbiter.evaluate("two", EvaluateOptions::new()).await.unwrap();

        let evaluator = arbiter
            .evaluator(MetricType::SemanticSimilarity, false)
            .unwrap();
        assert_eq!(evaluator.get_interactions().len(), 2);

        arbiter.clear_interactions();
        assert!(arbiter.get_interactions().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_metric_fails_before_any_call() {
        let client = ScriptedClient::repeating(PARIS);
        let arbiter = Arbiter::new(client.clone(), ArbiterConfig::default());

        let err = arbiter
            .evaluate("text", EvaluateOptions::new().metric(MetricType::Fluency))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_max_repair_attempts_from_config() {
        let client = ScriptedClient::repeating(r#"{"explanation": "no score"}"#);
        let mut config = ArbiterConfig::default();
        config.evaluation.max_repair_attempts = 3;
        let arbiter = Arbiter::new(client.clone(), config);

        let err = arbiter
            .evaluate("text", EvaluateOptions::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SchemaValidation);
        assert_eq!(client.calls(), 4);
    }

    #[tokio::test]
    async fn test_custom_metric_per_criterion() {
        let client = ScriptedClient::repeating(
            r#"{"criteria_scores": {"tone": {"score": 0.5}}, "overall_score": 0.5, "explanation": "meh"}"#,
        );
        let arbiter = Arbiter::new(client, ArbiterConfig::default());

        let score = arbiter
            .evaluate(
                "text",
                EvaluateOptions::new()
                    .metric(MetricType::Custom)
                    .criteria("tone")
                    .per_criterion(true),
            )
            .await
            .unwrap();

        assert_eq!(score.name(), "multi_criteria");
    }

    #[tokio::test]
    async fn test_batch_keeps_input_order() {
        let client = ScriptedClient::slow(PARIS, Duration::from_millis(2));
        let arbiter = Arbiter::new(client.clone(), ArbiterConfig::default());

        let results = arbiter
            .evaluate_batch(&["a", "", "c"], EvaluateOptions::new())
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert_eq!(
            results[1].as_ref().unwrap_err().kind(),
            ErrorKind::Configuration
        );
        assert!(results[2].is_ok());
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_compare_through_shared_pipeline() {
        let metrics = Arc::new(MetricsMiddleware::new());
        let pipeline = Arc::new(MiddlewarePipeline::new().with_shared(metrics.clone()));
        let arbiter = Arbiter::new(
            ScriptedClient::repeating(
                r#"{"winner": "output_a", "confidence": 0.65, "reasoning": "A is crisper"}"#,
            ),
            ArbiterConfig::default(),
        );

        let result = arbiter
            .compare(
                "Short answer A",
                "Short answer B",
                "brevity",
                CompareOptions::new().middleware(pipeline.clone()),
            )
            .await
            .unwrap();

        assert_eq!(result.winner, Winner::OutputA);
        assert!((0.0..=1.0).contains(&result.confidence));
        assert_eq!(metrics.get_metrics().comparisons, 1);
        assert_eq!(arbiter.get_interactions().len(), 1);
    }

    #[tokio::test]
    async fn test_free_functions_fail_fast_on_empty_output() {
        let err = evaluate("", Some("gpt-4o-mini"), EvaluateOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = compare("a", "", "brevity", None, CompareOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_from_config_rejects_unknown_model() {
        let mut config = ArbiterConfig::default();
        config.llm.openai_api_key = Some("sk-test".to_string());

        assert!(Arbiter::from_config(config.clone(), Some("gpt-4o-mini")).is_ok());

        let err = Arbiter::from_config(config.clone(), Some("mystery-model"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        config.llm.temperature = 5.0;
        assert!(Arbiter::from_config(config, None).is_err());
    }
}
