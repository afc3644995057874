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

//! Pairwise comparison of two candidate outputs
//!
//! The only comparative judgment: decides which of two outputs better
//! satisfies the criteria, optionally with a per-aspect breakdown.

use crate::evaluator::{JudgeCore, Judged};
use crate::interaction::{Interaction, InteractionPurpose};
use crate::llm_client::LLMClient;
use crate::structured::{FieldSpec, ResponseSchema, StructuredResponse};
use crate::{require_text, EvalError};
use arbiter_core::Score;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

const DEFAULT_CRITERIA: &str = "overall quality";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    OutputA,
    OutputB,
    Tie,
}

impl Winner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Winner::OutputA => "output_a",
            Winner::OutputB => "output_b",
            Winner::Tie => "tie",
        }
    }

    /// 1.0 when A wins, 0.5 for a tie, 0.0 when B wins
    pub fn preference_for_a(&self) -> f64 {
        match self {
            Winner::OutputA => 1.0,
            Winner::Tie => 0.5,
            Winner::OutputB => 0.0,
        }
    }
}

impl fmt::Display for Winner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AspectComparison {
    pub aspect: String,
    pub output_a_score: f64,
    pub output_b_score: f64,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairwiseResponse {
    pub winner: Winner,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub aspect_comparisons: Vec<AspectComparison>,
}

impl StructuredResponse for PairwiseResponse {
    fn schema() -> ResponseSchema {
        ResponseSchema::new("pairwise_comparison", "Which of two outputs is better")
            .field(FieldSpec::enumeration(
                "winner",
                &["output_a", "output_b", "tie"],
                "The better output, or tie when they are equally good",
            ))
            .field(FieldSpec::unit("confidence", "Confidence in the decision"))
            .field(FieldSpec::string("reasoning", "Why this winner was chosen"))
            .field(
                FieldSpec::object_list(
                    "aspect_comparisons",
                    "Per-aspect scores: {\"aspect\", \"output_a_score\" (0-1), \"output_b_score\" (0-1), \"reasoning\"}",
                )
                .optional(),
            )
    }

    fn judgment(&self) -> f64 {
        self.winner.preference_for_a()
    }

    fn explanation(&self) -> &str {
        &self.reasoning
    }

    fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();
        for comparison in &self.aspect_comparisons {
            if !seen.insert(comparison.aspect.as_str()) {
                problems.push(format!(
                    "aspect '{}' appears more than once",
                    comparison.aspect
                ));
            }
            for (side, value) in [
                ("output_a_score", comparison.output_a_score),
                ("output_b_score", comparison.output_b_score),
            ] {
                if !(0.0..=1.0).contains(&value) {
                    problems.push(format!(
                        "aspect '{}' {} must be within [0, 1], got {}",
                        comparison.aspect, side, value
                    ));
                }
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

/// Sub-scores of one aspect, one per output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AspectScores {
    pub output_a: f64,
    pub output_b: f64,
}

/// Outcome of a pairwise comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub winner: Winner,
    pub confidence: f64,
    pub reasoning: String,
    /// None when the judge returned no aspect breakdown
    pub aspect_scores: Option<HashMap<String, AspectScores>>,
}

impl ComparisonResult {
    fn from_response(response: PairwiseResponse) -> Self {
        let aspect_scores = (!response.aspect_comparisons.is_empty()).then(|| {
            response
                .aspect_comparisons
                .into_iter()
                .map(|c| {
                    (
                        c.aspect,
                        AspectScores {
                            output_a: c.output_a_score,
                            output_b: c.output_b_score,
                        },
                    )
                })
                .collect()
        });

        Self {
            winner: response.winner,
            confidence: response.confidence,
            reasoning: response.reasoning,
            aspect_scores,
        }
    }

    pub fn is_tie(&self) -> bool {
        self.winner == Winner::Tie
    }

    /// Score named `pairwise_comparison` expressing preference for output A
    pub fn to_score(&self) -> Result<Score, EvalError> {
        Ok(
            Score::new("pairwise_comparison", self.winner.preference_for_a(), self.confidence)?
                .with_explanation(self.reasoning.clone())
                .with_metadata("winner", self.winner.as_str()),
        )
    }
}

/// Aspects named by comma-separated criteria; breakdown requested when more than one
fn requested_aspects(criteria: &str) -> Vec<&str> {
    let aspects: Vec<&str> = criteria
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .collect();
    if aspects.len() > 1 {
        aspects
    } else {
        Vec::new()
    }
}

const SYSTEM_PROMPT: &str = r#"You are an expert evaluator comparing two outputs side by side.

Decide which output better satisfies the given criteria. Judge the content, not the
position: the order in which the outputs are shown must not influence your decision.
Declare a tie when the outputs are equally good; a tie is a legitimate verdict.
Give your confidence from 0.0 to 1.0 and explain your reasoning."#;

/// Pairwise comparison evaluator
pub struct PairwiseComparisonEvaluator {
    core: JudgeCore,
}

impl PairwiseComparisonEvaluator {
    pub fn new(llm_client: Arc<dyn LLMClient>) -> Self {
        Self {
            core: JudgeCore::new(llm_client),
        }
    }

    pub fn with_max_repair_attempts(mut self, attempts: u32) -> Self {
        self.core = self.core.with_max_repair_attempts(attempts);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.core = self.core.with_temperature(temperature);
        self
    }

    pub fn name(&self) -> &str {
        "pairwise_comparison"
    }

    pub fn judge_model(&self) -> String {
        self.core.judge_model()
    }

    fn user_prompt(
        &self,
        output_a: &str,
        output_b: &str,
        criteria: &str,
        reference: Option<&str>,
    ) -> String {
        let mut prompt = format!(
            "Compare these two outputs on: {criteria}\n\nOUTPUT A:\n{output_a}\n\nOUTPUT B:\n{output_b}"
        );

        if let Some(reference) = reference {
            prompt.push_str(&format!("\n\nREFERENCE:\n{reference}"));
        }

        let aspects = requested_aspects(criteria);
        if !aspects.is_empty() {
            prompt.push_str(&format!(
                "\n\nScore each output from 0.0 to 1.0 on every one of these aspects and report \
                 them in aspect_comparisons: {}. The aspect scores must agree with the winner.",
                aspects.join(", ")
            ));
        }

        prompt
    }

    pub async fn compare(
        &self,
        output_a: &str,
        output_b: &str,
        criteria: &str,
        reference: Option<&str>,
    ) -> Result<ComparisonResult, EvalError> {
        Ok(self
            .compare_judged(output_a, output_b, criteria, reference)
            .await?
            .value)
    }

    pub async fn compare_judged(
        &self,
        output_a: &str,
        output_b: &str,
        criteria: &str,
        reference: Option<&str>,
    ) -> Result<Judged<ComparisonResult>, EvalError> {
        require_text("output_a", output_a)?;
        require_text("output_b", output_b)?;

        let criteria = if criteria.trim().is_empty() {
            DEFAULT_CRITERIA
        } else {
            criteria.trim()
        };
        let reference = reference.filter(|r| !r.trim().is_empty());

        let judged = self
            .core
            .judge::<PairwiseResponse>(
                self.name(),
                InteractionPurpose::PairwiseComparison,
                SYSTEM_PROMPT.to_string(),
                self.user_prompt(output_a, output_b, criteria, reference),
            )
            .await?;

        Ok(judged.map(ComparisonResult::from_response))
    }

    pub fn get_interactions(&self) -> Vec<Interaction> {
        self.core.interactions().snapshot()
    }

    pub fn clear_interactions(&self) {
        self.core.interactions().clear();
    }
}
