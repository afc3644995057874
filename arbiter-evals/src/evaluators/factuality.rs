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

//! Factuality and hallucination detection
//!
//! Claims in the output are checked against the reference when one is
//! given, and against general knowledge otherwise.

use super::semantic::default_confidence;
use crate::evaluator::{JudgeStrategy, LlmJudge};
use crate::llm_client::LLMClient;
use crate::structured::{FieldSpec, ResponseSchema, StructuredResponse};
use crate::EvalError;
use arbiter_core::Score;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactualityResponse {
    /// 1 = every claim is factual
    pub score: f64,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    pub explanation: String,
    #[serde(default)]
    pub factual_claims: Vec<String>,
    #[serde(default)]
    pub non_factual_claims: Vec<String>,
    #[serde(default)]
    pub uncertain_claims: Vec<String>,
}

impl StructuredResponse for FactualityResponse {
    fn schema() -> ResponseSchema {
        ResponseSchema::new("factuality", "Factual accuracy of the claims in an output")
            .field(FieldSpec::unit(
                "score",
                "Factual accuracy (0 = entirely false or fabricated, 1 = entirely factual)",
            ))
            .field(FieldSpec::unit("confidence", "Confidence in this assessment").optional())
            .field(FieldSpec::string("explanation", "Summary of the fact check"))
            .field(
                FieldSpec::string_list("factual_claims", "Claims that are correct").optional(),
            )
            .field(
                FieldSpec::string_list(
                    "non_factual_claims",
                    "Claims that are incorrect, contradicted or fabricated",
                )
                .optional(),
            )
            .field(
                FieldSpec::string_list("uncertain_claims", "Claims that cannot be verified")
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

#[derive(Debug, Clone, Default)]
pub struct Factuality;

impl JudgeStrategy for Factuality {
    type Response = FactualityResponse;

    fn name(&self) -> &str {
        "factuality"
    }

    fn system_prompt(&self) -> String {
        r#"You are an expert fact-checker detecting hallucinations in generated text.

Break the output into individual factual claims. Classify each claim as:
- factual: correct and supported
- non-factual: incorrect, contradicted by the reference, or fabricated
- uncertain: cannot be verified from the available information

Opinions and hedged statements are not factual claims. Score from 0.0 (entirely
non-factual) to 1.0 (every claim factual), weighting serious errors more heavily."#
            .to_string()
    }

    fn user_prompt(&self, output: &str, reference: Option<&str>, criteria: Option<&str>) -> String {
        let mut prompt = match reference {
            Some(reference) => format!(
                "Check the factual accuracy of the OUTPUT against the REFERENCE. Treat the \
                 reference as ground truth.\n\nOUTPUT:\n{output}\n\nREFERENCE:\n{reference}"
            ),
            None => format!(
                "Check the factual accuracy of this text using well-established general \
                 knowledge.\n\nOUTPUT:\n{output}"
            ),
        };
        if let Some(criteria) = criteria {
            prompt.push_str(&format!("\n\nFocus on: {criteria}"));
        }
        prompt
    }

    fn compute_score(&self, response: FactualityResponse) -> Result<Score, EvalError> {
        let mut explanation = response.explanation;

        if !response.non_factual_claims.is_empty() {
            explanation.push_str("\n\nNon-factual Claims:\n- ");
            explanation.push_str(&response.non_factual_claims.join("\n- "));
        }

        if !response.uncertain_claims.is_empty() {
            explanation.push_str("\n\nUncertain Claims:\n- ");
            explanation.push_str(&response.uncertain_claims.join("\n- "));
        }

        Ok(Score::new(self.name(), response.score, response.confidence)?
            .with_explanation(explanation)
            .with_metadata("factual_count", response.factual_claims.len())
            .with_metadata("non_factual_count", response.non_factual_claims.len())
            .with_metadata("uncertain_count", response.uncertain_claims.len())
            .with_metadata(
                "hallucination_detected",
                !response.non_factual_claims.is_empty(),
            ))
    }
}

/// Factuality evaluator
pub type FactualityEvaluator = LlmJudge<Factuality>;

impl LlmJudge<Factuality> {
    pub fn new(llm_client: Arc<dyn LLMClient>) -> Self {
        Self::with_strategy(llm_client, Factuality)
    }
}
