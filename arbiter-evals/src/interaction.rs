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

//! Judge interaction telemetry
//!
//! Every completed round trip to the judge model is appended to the
//! evaluator's [`InteractionLog`]. The log is shared by concurrent calls on
//! one evaluator and only ever appended to, so entries appear in completion
//! order. Failed or cancelled client calls are never recorded.

use crate::llm_client::TokenUsage;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Why the judge was called
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionPurpose {
    Evaluation,
    PairwiseComparison,
}

/// One LLM round trip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: Uuid,
    pub evaluator: String,
    pub purpose: InteractionPurpose,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub response: String,
    #[serde(with = "duration_ms")]
    pub latency: Duration,
    pub usage: TokenUsage,
    /// 0 for the initial call, 1.. for repair re-prompts
    pub attempt: u32,
    /// Set when the response failed schema validation
    pub validation_error: Option<String>,
}

impl Interaction {
    pub fn is_repair(&self) -> bool {
        self.attempt > 0
    }

    pub fn is_valid(&self) -> bool {
        self.validation_error.is_none()
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Append-only, thread-safe interaction log
#[derive(Debug, Clone, Default)]
pub struct InteractionLog {
    entries: Arc<Mutex<Vec<Interaction>>>,
}

impl InteractionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, interaction: Interaction) {
        self.entries.lock().push(interaction);
    }

    /// Append the round trips of one finished call under a single lock
    pub fn record_all(&self, interactions: Vec<Interaction>) {
        self.entries.lock().extend(interactions);
    }

    /// Snapshot of all entries, oldest first
    pub fn snapshot(&self) -> Vec<Interaction> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn total_usage(&self) -> TokenUsage {
        self.entries
            .lock()
            .iter()
            .fold(TokenUsage::default(), |acc, i| acc + i.usage)
    }

    pub fn total_latency(&self) -> Duration {
        self.entries.lock().iter().map(|i| i.latency).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interaction(attempt: u32, tokens: u32) -> Interaction {
        Interaction {
            id: Uuid::new_v4(),
            evaluator: "semantic_similarity".to_string(),
            purpose: InteractionPurpose::Evaluation,
            timestamp: Utc::now(),
            model: "mock-model".to_string(),
            system_prompt: "system".to_string(),
            user_prompt: "user".to_string(),
            response: "{}".to_string(),
            latency: Duration::from_millis(25),
            usage: TokenUsage::new(tokens, 0),
            attempt,
            validation_error: None,
        }
    }

    #[test]
    fn test_log_accumulates_and_clears() {
        let log = InteractionLog::new();
        log.record(interaction(0, 100));
        log.record(interaction(1, 50));

        assert_eq!(log.len(), 2);
        assert_eq!(log.total_usage().total_tokens, 150);
        assert_eq!(log.total_latency(), Duration::from_millis(50));

        let first = log.snapshot();
        let second = log.snapshot();
        assert_eq!(first.len(), second.len());
        assert!(first[1].is_repair());

        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let log = InteractionLog::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        log.record(interaction(0, 1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.len(), 800);
    }

    #[test]
    fn test_interaction_serializes_latency_in_ms() {
        let json = serde_json::to_value(interaction(0, 10)).unwrap();
        assert_eq!(json["latency"], 25);
        assert_eq!(json["purpose"], "evaluation");
    }
}
