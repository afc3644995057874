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

//! Custom criteria evaluation
//!
//! Scores an output against free-form criteria supplied by the caller,
//! either as one aggregate judgment or broken down per criterion.

use super::semantic::default_confidence;
use crate::evaluator::{JudgeStrategy, LlmJudge};
use crate::llm_client::LLMClient;
use crate::structured::{FieldSpec, ResponseSchema, StructuredResponse};
use crate::EvalError;
use arbiter_core::{MetadataValue, Score};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

const GENERAL_QUALITY: &str = "overall quality, accuracy, clarity and helpfulness";

/// Single aggregate judgment against custom criteria
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomCriteriaResponse {
    pub score: f64,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    pub explanation: String,
    #[serde(default)]
    pub criteria_met: Vec<String>,
    #[serde(default)]
    pub criteria_not_met: Vec<String>,
}

impl StructuredResponse for CustomCriteriaResponse {
    fn schema() -> ResponseSchema {
        ResponseSchema::new(
            "custom_criteria",
            "How well an output satisfies caller-supplied criteria",
        )
        .field(FieldSpec::unit(
            "score",
            "How well the output meets the criteria (0 = not at all, 1 = fully)",
        ))
        .field(FieldSpec::unit("confidence", "Confidence in this assessment").optional())
        .field(FieldSpec::string("explanation", "Reasoning behind the score"))
        .field(FieldSpec::string_list("criteria_met", "Criteria the output satisfies").optional())
        .field(
            FieldSpec::string_list("criteria_not_met", "Criteria the output fails to satisfy")
                .optional(),
        )
    }

    fn judgment(&self) -> f64 {
        self.score
    }

    fn explanation(&self) -> &str {
        &self.explanation
    }
}

/// Prompts for a single aggregate custom-criteria score
#[derive(Debug, Clone, Default)]
pub struct CustomCriteria;

impl JudgeStrategy for CustomCriteria {
    type Response = CustomCriteriaResponse;

    fn name(&self) -> &str {
        "custom_criteria"
    }

    fn system_prompt(&self) -> String {
        r#"You are an expert evaluator assessing text against specific criteria.

Judge strictly by the criteria you are given. For each criterion decide whether the
output satisfies it, then give an overall score from 0.0 (meets none of the criteria)
to 1.0 (fully meets every criterion), your confidence, and a clear explanation.
List which criteria were met and which were not."#
            .to_string()
    }

    fn user_prompt(&self, output: &str, reference: Option<&str>, criteria: Option<&str>) -> String {
        let criteria = criteria.unwrap_or(GENERAL_QUALITY);
        let mut prompt = format!("Evaluate this output against the following criteria:\n\nCRITERIA:\n{criteria}\n\nOUTPUT:\n{output}");
        if let Some(reference) = reference {
            prompt.push_str(&format!("\n\nREFERENCE (for context):\n{reference}"));
        }
        prompt
    }

    fn compute_score(&self, response: CustomCriteriaResponse) -> Result<Score, EvalError> {
        Ok(Score::new(self.name(), response.score, response.confidence)?
            .with_explanation(response.explanation)
            .with_metadata("criteria_met_count", response.criteria_met.len())
            .with_metadata("criteria_not_met_count", response.criteria_not_met.len()))
    }
}

/// Custom criteria evaluator (single aggregate score)
pub type CustomCriteriaEvaluator = LlmJudge<CustomCriteria>;

impl LlmJudge<CustomCriteria> {
    pub fn new(llm_client: Arc<dyn LLMClient>) -> Self {
        Self::with_strategy(llm_client, CustomCriteria)
    }
}

/// Score for one named criterion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionScore {
    pub score: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Per-criterion breakdown plus an overall judgment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiCriteriaResponse {
    pub criteria_scores: HashMap<String, CriterionScore>,
    pub overall_score: f64,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    pub explanation: String,
}

impl StructuredResponse for MultiCriteriaResponse {
    fn schema() -> ResponseSchema {
        ResponseSchema::new(
            "multi_criteria",
            "Per-criterion scores and an overall score",
        )
        .field(FieldSpec::object(
            "criteria_scores",
            "Map from criterion name to {\"score\": 0-1, \"reasoning\": string}",
        ))
        .field(FieldSpec::unit("overall_score", "Overall score across all criteria"))
        .field(FieldSpec::unit("confidence", "Confidence in this assessment").optional())
        .field(FieldSpec::string("explanation", "Summary of the assessment"))
    }

    fn judgment(&self) -> f64 {
        self.overall_score
    }

    fn explanation(&self) -> &str {
        &self.explanation
    }

    fn validate(&self) -> Result<(), Vec<String>> {
        let problems: Vec<String> = self
            .criteria_scores
            .iter()
            .filter(|(_, c)| !(0.0..=1.0).contains(&c.score))
            .map(|(name, c)| {
                format!(
                    "criteria_scores['{}'].score must be within [0, 1], got {}",
                    name, c.score
                )
            })
            .collect();

        if self.criteria_scores.is_empty() {
            return Err(vec!["criteria_scores must not be empty".to_string()]);
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

/// Splits criteria text into individual named criteria
pub fn split_criteria(criteria: &str) -> Vec<String> {
    criteria
        .split(|c| c == '\n' || c == ',')
        .map(|c| c.trim().trim_start_matches(['-', '*']).trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Prompts for a per-criterion breakdown
#[derive(Debug, Clone, Default)]
pub struct MultiCriteria;

impl JudgeStrategy for MultiCriteria {
    type Response = MultiCriteriaResponse;

    fn name(&self) -> &str {
        "multi_criteria"
    }

    fn system_prompt(&self) -> String {
        r#"You are an expert evaluator scoring text on several criteria independently.

Score each criterion on its own from 0.0 to 1.0 with a short reasoning, then give an
overall score that reflects all criteria together, your confidence, and an explanation."#
            .to_string()
    }

    fn user_prompt(&self, output: &str, reference: Option<&str>, criteria: Option<&str>) -> String {
        let criteria = split_criteria(criteria.unwrap_or(GENERAL_QUALITY));
        let listed = criteria
            .iter()
            .map(|c| format!("- {c}"))
            .collect::<Vec<_>>()
            .join("\n");

        let mut prompt = format!(
            "Score this output on each criterion separately. Use exactly these criterion names \
             as keys of criteria_scores:\n{listed}\n\nOUTPUT:\n{output}"
        );
        if let Some(reference) = reference {
            prompt.push_str(&format!("\n\nREFERENCE (for context):\n{reference}"));
        }
        prompt
    }

    fn compute_score(&self, response: MultiCriteriaResponse) -> Result<Score, EvalError> {
        let mut names: Vec<&String> = response.criteria_scores.keys().collect();
        names.sort();

        let mut explanation = response.explanation.clone();
        explanation.push_str("\n\nCriteria Breakdown:");
        for name in &names {
            let criterion = &response.criteria_scores[*name];
            explanation.push_str(&format!("\n- {}: {:.2}", name, criterion.score));
            if !criterion.reasoning.is_empty() {
                explanation.push_str(&format!(" ({})", criterion.reasoning));
            }
        }

        let breakdown: HashMap<String, MetadataValue> = response
            .criteria_scores
            .iter()
            .map(|(name, c)| (name.clone(), MetadataValue::from(c.score)))
            .collect();

        Ok(
            Score::new(self.name(), response.overall_score, response.confidence)?
                .with_explanation(explanation)
                .with_metadata("criteria_count", names.len())
                .with_metadata("criteria_scores", breakdown),
        )
    }
}

/// Custom criteria evaluator with per-criterion breakdown
pub type MultiCriteriaEvaluator = LlmJudge<MultiCriteria>;

impl LlmJudge<MultiCriteria> {
    pub fn new(llm_client: Arc<dyn LLMClient>) -> Self {
        Self::with_strategy(llm_client, MultiCriteria)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structured::parse_structured;
    use crate::test_support::ScriptedClient;
    use crate::{ErrorKind, Evaluator};

    #[tokio::test]
    async fn test_custom_criteria_score() {
        let client = ScriptedClient::new(vec![
            r#"{
                "score": 0.75,
                "confidence": 0.8,
                "explanation": "Accurate but verbose",
                "criteria_met": ["accuracy"],
                "criteria_not_met": ["brevity"]
            }"#,
        ]);
        let evaluator = CustomCriteriaEvaluator::new(client.clone());

        let score = evaluator
            .evaluate("A long answer", None, Some("accuracy, brevity"))
            .await
            .unwrap();

        assert_eq!(score.name(), "custom_criteria");
        assert_eq!(score.value(), 0.75);
        assert_eq!(
            score.metadata_value("criteria_not_met_count").and_then(|v| v.as_i64()),
            Some(1)
        );
        assert!(client.user_prompts()[0].contains("CRITERIA:\naccuracy, brevity"));
    }

    #[test]
    fn test_custom_criteria_without_criteria_uses_general_quality() {
        let prompt = CustomCriteria.user_prompt("text", None, None);
        assert!(prompt.contains(GENERAL_QUALITY));
    }

    #[test]
    fn test_split_criteria() {
        assert_eq!(
            split_criteria("accuracy, clarity\n- completeness\n\n"),
            vec!["accuracy", "clarity", "completeness"]
        );
    }

    #[tokio::test]
    async fn test_multi_criteria_breakdown() {
        let client = ScriptedClient::new(vec![
            r#"{
                "criteria_scores": {
                    "clarity": {"score": 0.9, "reasoning": "Easy to follow"},
                    "accuracy": {"score": 0.6, "reasoning": "One wrong date"}
                },
                "overall_score": 0.75,
                "explanation": "Clear with a factual slip"
            }"#,
        ]);
        let evaluator = MultiCriteriaEvaluator::new(client.clone());

        let score = evaluator
            .evaluate("Some answer", None, Some("accuracy\nclarity"))
            .await
            .unwrap();

        assert_eq!(score.name(), "multi_criteria");
        assert_eq!(score.value(), 0.75);
        assert_eq!(
            score.metadata_value("criteria_count").and_then(|v| v.as_i64()),
            Some(2)
        );
        let breakdown = score
            .metadata_value("criteria_scores")
            .and_then(|v| v.as_object())
            .unwrap();
        assert_eq!(breakdown["accuracy"].as_f64(), Some(0.6));
        assert!(score
            .explanation()
            .ends_with("Criteria Breakdown:\n- accuracy: 0.60 (One wrong date)\n- clarity: 0.90 (Easy to follow)"));

        let prompt = &client.user_prompts()[0];
        assert!(prompt.contains("- accuracy\n- clarity"));
    }

    #[tokio::test]
    async fn test_multi_criteria_out_of_range_sub_score_needs_repair() {
        let client = ScriptedClient::new(vec![
            r#"{"criteria_scores": {"clarity": {"score": 4}}, "overall_score": 0.5, "explanation": "x"}"#,
            r#"{"criteria_scores": {"clarity": {"score": 4}}, "overall_score": 0.5, "explanation": "x"}"#,
        ]);
        let evaluator = MultiCriteriaEvaluator::new(client.clone());

        let err = evaluator
            .evaluate("text", None, Some("clarity"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SchemaValidation);
        assert!(err.to_string().contains("criteria_scores['clarity'].score"));
        assert_eq!(client.calls(), 2);
    }

    #[test]
    fn test_multi_criteria_conversion_is_pure() {
        let raw = r#"{
            "criteria_scores": {"b": {"score": 0.2}, "a": {"score": 0.4}},
            "overall_score": 0.3,
            "explanation": "Weak"
        }"#;
        let first = MultiCriteria
            .compute_score(parse_structured::<MultiCriteriaResponse>(raw).unwrap())
            .unwrap();
        let second = MultiCriteria
            .compute_score(parse_structured::<MultiCriteriaResponse>(raw).unwrap())
            .unwrap();
        assert_eq!(first, second);
    }
}
