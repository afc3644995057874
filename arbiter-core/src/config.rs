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

//! Arbiter configuration
//!
//! Settings come from a TOML file, the environment, or both (the
//! environment overlays whatever the file provided).

use crate::types::Provider;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default judge model
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default number of repair re-prompts after a schema validation failure
pub const DEFAULT_MAX_REPAIR_ATTEMPTS: u32 = 1;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ArbiterConfig {
    #[serde(default)]
    pub llm: LLMConfig,

    #[serde(default)]
    pub evaluation: EvaluationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Provider credentials and judge model settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LLMConfig {
    /// OpenAI API key
    pub openai_api_key: Option<String>,

    /// Anthropic API key
    pub anthropic_api_key: Option<String>,

    /// Google Gemini API key
    pub gemini_api_key: Option<String>,

    /// Groq API key
    pub groq_api_key: Option<String>,

    /// Base URL overrides (proxies, self-hosted gateways)
    pub openai_base_url: Option<String>,
    pub anthropic_base_url: Option<String>,
    pub gemini_base_url: Option<String>,
    pub groq_base_url: Option<String>,

    /// Model used when a call does not name one
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Sampling temperature for judge calls
    #[serde(default)]
    pub temperature: f32,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            anthropic_api_key: None,
            gemini_api_key: None,
            groq_api_key: None,
            openai_base_url: None,
            anthropic_base_url: None,
            gemini_base_url: None,
            groq_base_url: None,
            default_model: default_model(),
            temperature: 0.0,
        }
    }
}

impl LLMConfig {
    pub fn api_key(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::OpenAI => self.openai_api_key.as_deref(),
            Provider::Anthropic => self.anthropic_api_key.as_deref(),
            Provider::Gemini => self.gemini_api_key.as_deref(),
            Provider::Groq => self.groq_api_key.as_deref(),
        }
    }

    pub fn base_url(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::OpenAI => self.openai_base_url.as_deref(),
            Provider::Anthropic => self.anthropic_base_url.as_deref(),
            Provider::Gemini => self.gemini_base_url.as_deref(),
            Provider::Groq => self.groq_base_url.as_deref(),
        }
    }
}

/// Evaluation orchestration settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvaluationConfig {
    /// Re-prompts allowed after a response fails schema validation
    #[serde(default = "default_max_repair_attempts")]
    pub max_repair_attempts: u32,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            max_repair_attempts: default_max_repair_attempts(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Level for the `arbiter` targets (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_repair_attempts() -> u32 {
    DEFAULT_MAX_REPAIR_ATTEMPTS
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl ArbiterConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    ///
    /// Supported environment variables:
    /// - OPENAI_API_KEY, ANTHROPIC_API_KEY, GROQ_API_KEY: provider keys
    /// - GEMINI_API_KEY (or GOOGLE_API_KEY): Gemini key
    /// - ARBITER_DEFAULT_MODEL: judge model (default: gpt-4o-mini)
    /// - ARBITER_TEMPERATURE: sampling temperature (default: 0.0)
    /// - ARBITER_MAX_REPAIR_ATTEMPTS: repair re-prompts (default: 1)
    /// - ARBITER_LOG_LEVEL: log level (default: warn)
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay environment variables onto this configuration
    pub fn apply_env(&mut self) {
        let var = |name: &str| std::env::var(name).ok().and_then(non_empty);

        if let Some(key) = var("OPENAI_API_KEY") {
            self.llm.openai_api_key = Some(key);
        }
        if let Some(key) = var("ANTHROPIC_API_KEY") {
            self.llm.anthropic_api_key = Some(key);
        }
        if let Some(key) = var("GEMINI_API_KEY").or_else(|| var("GOOGLE_API_KEY")) {
            self.llm.gemini_api_key = Some(key);
        }
        if let Some(key) = var("GROQ_API_KEY") {
            self.llm.groq_api_key = Some(key);
        }

        if let Some(model) = var("ARBITER_DEFAULT_MODEL") {
            self.llm.default_model = model;
        }
        if let Some(temperature) = var("ARBITER_TEMPERATURE") {
            if let Ok(val) = temperature.parse() {
                self.llm.temperature = val;
            }
        }
        if let Some(attempts) = var("ARBITER_MAX_REPAIR_ATTEMPTS") {
            if let Ok(val) = attempts.parse() {
                self.evaluation.max_repair_attempts = val;
            }
        }
        if let Some(level) = var("ARBITER_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.llm.default_model.trim().is_empty() {
            bail!("llm.default_model must not be empty");
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            bail!(
                "llm.temperature must be within [0, 2], got {}",
                self.llm.temperature
            );
        }
        Ok(())
    }
}
