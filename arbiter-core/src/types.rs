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

//! Provider and metric identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Anthropic,
    Gemini,
    Groq,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
            Provider::Groq => "groq",
        }
    }

    pub fn all() -> [Provider; 4] {
        [
            Provider::OpenAI,
            Provider::Anthropic,
            Provider::Gemini,
            Provider::Groq,
        ]
    }

    /// Infer the provider for a model selector.
    ///
    /// An explicit `provider/model` prefix wins; otherwise the model family
    /// name decides. Returns `None` for selectors no provider serves.
    pub fn detect(model: &str) -> Option<Provider> {
        if let Some((prefix, _)) = model.split_once('/') {
            if let Ok(provider) = prefix.parse() {
                return Some(provider);
            }
        }

        let model = model.to_ascii_lowercase();
        if model.starts_with("gpt-") || model.starts_with("o1") || model.starts_with("o3") {
            Some(Provider::OpenAI)
        } else if model.starts_with("claude-") {
            Some(Provider::Anthropic)
        } else if model.starts_with("gemini-") {
            Some(Provider::Gemini)
        } else if model.starts_with("llama")
            || model.starts_with("mixtral")
            || model.starts_with("gemma")
        {
            Some(Provider::Groq)
        } else {
            None
        }
    }

    /// Strip an explicit `provider/` prefix from a model selector
    pub fn model_id(model: &str) -> &str {
        match model.split_once('/') {
            Some((prefix, rest)) if prefix.parse::<Provider>().is_ok() => rest,
            _ => model,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for unrecognised identifiers
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown {kind}: {value}")]
pub struct UnknownIdentifier {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for Provider {
    type Err = UnknownIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAI),
            "anthropic" => Ok(Provider::Anthropic),
            "gemini" | "google" => Ok(Provider::Gemini),
            "groq" => Ok(Provider::Groq),
            _ => Err(UnknownIdentifier {
                kind: "provider",
                value: s.to_string(),
            }),
        }
    }
}

/// Kinds of evaluation metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    SemanticSimilarity,
    Factuality,
    Consistency,
    Relevance,
    Coherence,
    Fluency,
    Custom,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::SemanticSimilarity => "semantic_similarity",
            MetricType::Factuality => "factuality",
            MetricType::Consistency => "consistency",
            MetricType::Relevance => "relevance",
            MetricType::Coherence => "coherence",
            MetricType::Fluency => "fluency",
            MetricType::Custom => "custom",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = UnknownIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "semantic_similarity" | "semantic" => Ok(MetricType::SemanticSimilarity),
            "factuality" => Ok(MetricType::Factuality),
            "consistency" => Ok(MetricType::Consistency),
            "relevance" => Ok(MetricType::Relevance),
            "coherence" => Ok(MetricType::Coherence),
            "fluency" => Ok(MetricType::Fluency),
            "custom" | "custom_criteria" => Ok(MetricType::Custom),
            _ => Err(UnknownIdentifier {
                kind: "metric",
                value: s.to_string(),
            }),
        }
    }
}
