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

//! Evaluation score value type
//!
//! A [`Score`] is the result of a single evaluation: a named value in
//! `[0, 1]`, the judge's confidence in `[0, 1]`, a human-readable
//! explanation and open-ended metadata. Scores can only be built through
//! [`Score::new`] (or deserialised through the same checks), so an
//! out-of-range score never exists.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Metadata values attached to a score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Object(HashMap<String, MetadataValue>),
}

impl MetadataValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Int(i) => Some(*i as f64),
            MetadataValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HashMap<String, MetadataValue>> {
        match self {
            MetadataValue::Object(map) => Some(map),
            _ => None,
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<usize> for MetadataValue {
    fn from(value: usize) -> Self {
        MetadataValue::Int(value as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<HashMap<String, MetadataValue>> for MetadataValue {
    fn from(value: HashMap<String, MetadataValue>) -> Self {
        MetadataValue::Object(value)
    }
}

/// Errors raised when building a score
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScoreError {
    #[error("{field} must be within [0, 1], got {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("Score name must not be empty")]
    EmptyName,
}

/// Result of evaluating one output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScoreRecord")]
pub struct Score {
    name: String,
    value: f64,
    confidence: f64,
    explanation: String,
    metadata: HashMap<String, MetadataValue>,
}

/// Unchecked wire form of [`Score`]
#[derive(Deserialize)]
struct ScoreRecord {
    name: String,
    value: f64,
    confidence: f64,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    metadata: HashMap<String, MetadataValue>,
}

impl TryFrom<ScoreRecord> for Score {
    type Error = ScoreError;

    fn try_from(record: ScoreRecord) -> Result<Self, Self::Error> {
        Ok(Score::new(record.name, record.value, record.confidence)?
            .with_explanation(record.explanation)
            .with_metadata_map(record.metadata))
    }
}

fn check_unit_interval(field: &'static str, value: f64) -> Result<f64, ScoreError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ScoreError::OutOfRange { field, value })
    }
}

impl Score {
    /// Create a score, rejecting values or confidences outside `[0, 1]`
    pub fn new(name: impl Into<String>, value: f64, confidence: f64) -> Result<Self, ScoreError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ScoreError::EmptyName);
        }

        Ok(Self {
            name,
            value: check_unit_interval("value", value)?,
            confidence: check_unit_interval("confidence", confidence)?,
            explanation: String::new(),
            metadata: HashMap::new(),
        })
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = explanation.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata_map(mut self, metadata: HashMap<String, MetadataValue>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Metric identifier (e.g. "semantic_similarity")
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn explanation(&self) -> &str {
        &self.explanation
    }

    pub fn metadata(&self) -> &HashMap<String, MetadataValue> {
        &self.metadata
    }

    pub fn metadata_value(&self, key: &str) -> Option<&MetadataValue> {
        self.metadata.get(key)
    }

    /// Whether the score meets a pass threshold
    pub fn passed(&self, threshold: f64) -> bool {
        self.value >= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_metadata_value_serialization() {
        let value = MetadataValue::Float(0.85);
        assert_eq!(serde_json::to_string(&value).unwrap(), "0.85");

        let value = MetadataValue::Bool(true);
        assert_eq!(serde_json::to_string(&value).unwrap(), "true");

        let parsed: MetadataValue = serde_json::from_str("3").unwrap();
        assert_eq!(parsed, MetadataValue::Int(3));

        let parsed: MetadataValue = serde_json::from_str(r#"{"accuracy": 0.5}"#).unwrap();
        let object = parsed.as_object().unwrap();
        assert_eq!(object["accuracy"].as_f64(), Some(0.5));
    }

    #[test]
    fn test_score_builder() {
        let score = Score::new("semantic_similarity", 0.9, 0.8)
            .unwrap()
            .with_explanation("Same meaning")
            .with_metadata("similarities_count", 2usize);

        assert_eq!(score.name(), "semantic_similarity");
        assert_eq!(score.explanation(), "Same meaning");
        assert_eq!(
            score.metadata_value("similarities_count").and_then(|v| v.as_i64()),
            Some(2)
        );
        assert!(score.passed(0.7));
        assert!(!score.passed(0.95));
    }

    #[test]
    fn test_score_rejects_invalid_input() {
        assert_eq!(
            Score::new("x", 1.5, 0.5),
            Err(ScoreError::OutOfRange {
                field: "value",
                value: 1.5
            })
        );
        assert!(matches!(
            Score::new("x", 0.5, f64::NAN),
            Err(ScoreError::OutOfRange {
                field: "confidence",
                ..
            })
        ));
        assert_eq!(Score::new("  ", 0.5, 0.5), Err(ScoreError::EmptyName));
    }

    #[test]
    fn test_deserialization_enforces_bounds() {
        let ok: Score = serde_json::from_str(
            r#"{"name": "factuality", "value": 0.4, "confidence": 0.9, "metadata": {"claims": 3}}"#,
        )
        .unwrap();
        assert_eq!(ok.value(), 0.4);
        assert_eq!(ok.explanation(), "");

        let bad = serde_json::from_str::<Score>(
            r#"{"name": "factuality", "value": -0.1, "confidence": 0.9}"#,
        );
        assert!(bad.is_err());
    }

    proptest! {
        #[test]
        fn prop_unit_interval_accepted(value in 0.0f64..=1.0, confidence in 0.0f64..=1.0) {
            let score = Score::new("metric", value, confidence).unwrap();
            prop_assert!((0.0..=1.0).contains(&score.value()));
            prop_assert!((0.0..=1.0).contains(&score.confidence()));
        }

        #[test]
        fn prop_out_of_range_rejected(value in prop_oneof![-1.0e6f64..-1.0e-9, 1.0 + 1.0e-9..1.0e6]) {
            prop_assert!(Score::new("metric", value, 0.5).is_err());
            prop_assert!(Score::new("metric", 0.5, value).is_err());
        }
    }
}
