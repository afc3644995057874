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

//! Semantic similarity using LLM-as-judge
//!
//! Compares what two texts mean rather than how they are worded. Without a
//! reference the judge falls back to a criteria-guided quality assessment,
//! and without criteria either to a general coherence assessment.

use crate::evaluator::{JudgeStrategy, LlmJudge};
use crate::llm_client::LLMClient;
use crate::structured::{FieldSpec, ResponseSchema, StructuredResponse};
use crate::EvalError;
use arbiter_core::Score;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub(crate) fn default_confidence() -> f64 {
    0.85
}

/// Structured response for semantic similarity evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticResponse {
    /// 0 = completely different meaning, 1 = identical meaning
    pub score: f64,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    pub explanation: String,
    #[serde(default)]
    pub key_differences: Vec<String>,
    #[serde(default)]
    pub key_similarities: Vec<String>,
}

impl StructuredResponse for SemanticResponse {
    fn schema() -> ResponseSchema {
        ResponseSchema::new(
            "semantic_similarity",
            "Semantic similarity between an output and a reference",
        )
        .field(FieldSpec::unit(
            "score",
            "Semantic similarity (0 = completely different meaning, 1 = identical meaning)",
        ))
        .field(FieldSpec::unit("confidence", "Confidence in this assessment").optional())
        .field(FieldSpec::string(
            "explanation",
            "Why this similarity score was assigned",
        ))
        .field(
            FieldSpec::string_list("key_differences", "Key semantic differences").optional(),
        )
        .field(
            FieldSpec::string_list("key_similarities", "Key semantic similarities").optional(),
        )
    }

    fn judgment(&self) -> f64 {
        self.score
    }

    fn explanation(&self) -> &str {
        &self.explanation
    }
}

/// Prompts and score shaping for semantic similarity
#[derive(Debug, Clone, Default)]
pub struct SemanticSimilarity;

impl JudgeStrategy for SemanticSimilarity {
    type Response = SemanticResponse;

    fn name(&self) -> &str {
        "semantic_similarity"
    }

    fn system_prompt(&self) -> String {
        r#"You are an expert at evaluating semantic similarity between texts.

Your task is to assess how similar two texts are in MEANING, not just in wording.

Consider:
- Core concepts and ideas conveyed
- Factual accuracy and information content
- Intent and purpose of the text
- Logical relationships between ideas

Ignore:
- Exact wording or phrasing
- Grammatical structure
- Writing style or tone (unless it changes meaning)

Provide a similarity score from 0.0 (completely different meaning) to 1.0 (identical meaning),
your confidence, a clear explanation, and the key similarities and differences you identified."#
            .to_string()
    }

    fn user_prompt(&self, output: &str, reference: Option<&str>, criteria: Option<&str>) -> String {
        match (reference, criteria) {
            (Some(reference), _) => format!(
                r#"Compare the semantic similarity of these two texts:

OUTPUT (to evaluate):
{output}

REFERENCE (ground truth):
{reference}

Assess how similar they are in MEANING. Consider whether they convey the same information,
even if expressed differently."#
            ),
            (None, Some(criteria)) => format!(
                r#"Evaluate the semantic quality of this text based on the criteria: {criteria}

Text to evaluate:
{output}"#
            ),
            (None, None) => format!(
                r#"Evaluate the semantic coherence and clarity of this text:

{output}

Assess how well the text conveys clear meaning and logical ideas."#
            ),
        }
    }

    fn compute_score(&self, response: SemanticResponse) -> Result<Score, EvalError> {
        let mut explanation = response.explanation;

        if !response.key_similarities.is_empty() {
            explanation.push_str("\n\nKey Similarities:\n- ");
            explanation.push_str(&response.key_similarities.join("\n- "));
        }

        if !response.key_differences.is_empty() {
            explanation.push_str("\n\nKey Differences:\n- ");
            explanation.push_str(&response.key_differences.join("\n- "));
        }

        Ok(Score::new(self.name(), response.score, response.confidence)?
            .with_explanation(explanation)
            .with_metadata("similarities_count", response.key_similarities.len())
            .with_metadata("differences_count", response.key_differences.len()))
    }
}

/// Semantic similarity evaluator
pub type SemanticEvaluator = LlmJudge<SemanticSimilarity>;

impl LlmJudge<SemanticSimilarity> {
    pub fn new(llm_client: Arc<dyn LLMClient>) -> Self {
        Self::with_strategy(llm_client, SemanticSimilarity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structured::parse_structured;
    use crate::test_support::ScriptedClient;
    use crate::Evaluator;

    const PARIS: &str = r#"{
        "score": 0.97,
        "confidence": 0.95,
        "explanation": "Both state that Paris is the capital of France.",
        "key_similarities": ["Paris is the capital", "Subject is France"],
        "key_differences": []
    }"#;

    #[tokio::test]
    async fn test_paraphrase_scores_high() {
        let client = ScriptedClient::new(vec![PARIS]);
        let evaluator = SemanticEvaluator::new(client.clone());

        let score = evaluator
            .evaluate(
                "Paris is the capital of France",
                Some("The capital of France is Paris"),
                None,
            )
            .await
            .unwrap();

        assert_eq!(score.name(), "semantic_similarity");
        assert!(score.value() >= 0.9);
        assert!(score.explanation().contains("Key Similarities:\n- Paris is the capital"));
        assert!(!score.explanation().contains("Key Differences"));
        assert_eq!(
            score.metadata_value("similarities_count").and_then(|v| v.as_i64()),
            Some(2)
        );
        assert_eq!(
            score.metadata_value("differences_count").and_then(|v| v.as_i64()),
            Some(0)
        );

        let prompt = &client.user_prompts()[0];
        assert!(prompt.contains("REFERENCE (ground truth):\nThe capital of France is Paris"));
        assert!(client.system_prompts()[0].contains("similar two texts are in MEANING"));
    }

    #[tokio::test]
    async fn test_missing_confidence_defaults() {
        let client = ScriptedClient::new(vec![r#"{"score": 0.3, "explanation": "Different"}"#]);
        let evaluator = SemanticEvaluator::new(client);

        let score = evaluator.evaluate("cats", Some("dogs"), None).await.unwrap();
        assert_eq!(score.confidence(), 0.85);
        assert_eq!(score.explanation(), "Different");
    }

    #[test]
    fn test_prompt_degrades_without_reference() {
        let strategy = SemanticSimilarity;

        let with_criteria = strategy.user_prompt("text", None, Some("clarity"));
        assert!(with_criteria.contains("based on the criteria: clarity"));

        let bare = strategy.user_prompt("text", None, None);
        assert!(bare.contains("semantic coherence and clarity"));
    }

    #[test]
    fn test_score_conversion_is_pure() {
        let strategy = SemanticSimilarity;
        let raw = r#"{
            "score": 0.6,
            "explanation": "Partly overlapping",
            "key_similarities": ["topic"],
            "key_differences": ["date", "location"]
        }"#;

        let first = strategy
            .compute_score(parse_structured::<SemanticResponse>(raw).unwrap())
            .unwrap();
        let second = strategy
            .compute_score(parse_structured::<SemanticResponse>(raw).unwrap())
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first.explanation(),
            "Partly overlapping\n\nKey Similarities:\n- topic\n\nKey Differences:\n- date\n- location"
        );
    }
}
