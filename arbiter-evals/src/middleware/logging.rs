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

//! Entry/exit logging for evaluate and compare calls

use super::{keys, EvalOutcome, Middleware, MiddlewareContext, Next};
use crate::EvalError;
use arbiter_core::logging::parse_level;
use async_trait::async_trait;
use std::time::Instant;
use tracing::Level;

macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        if $level == Level::ERROR {
            tracing::error!($($arg)+)
        } else if $level == Level::WARN {
            tracing::warn!($($arg)+)
        } else if $level == Level::INFO {
            tracing::info!($($arg)+)
        } else if $level == Level::DEBUG {
            tracing::debug!($($arg)+)
        } else {
            tracing::trace!($($arg)+)
        }
    };
}

/// Logs every call at a configurable level; failures always at WARN or above
#[derive(Debug, Clone)]
pub struct LoggingMiddleware {
    level: Level,
}

impl LoggingMiddleware {
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Level by name ("debug", "info", ...), WARN when unrecognised
    pub fn with_level_name(level: &str) -> Self {
        Self::new(parse_level(level))
    }

    pub fn level(&self) -> Level {
        self.level
    }
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn process(
        &self,
        output: &str,
        reference: Option<&str>,
        next: Next<'_>,
        context: &mut MiddlewareContext,
    ) -> Result<EvalOutcome, EvalError> {
        let call = if context.is_pairwise() {
            "compare"
        } else {
            "evaluate"
        };
        let evaluator = context
            .get_str(keys::EVALUATOR)
            .unwrap_or("unknown")
            .to_string();

        log_at!(
            self.level,
            call,
            evaluator = %evaluator,
            output_len = output.len(),
            has_reference = reference.is_some(),
            "Starting {}",
            call
        );

        let start = Instant::now();
        let result = next.run(output, reference, context).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        let tokens = context.tokens_used().unwrap_or(0);

        match &result {
            Ok(EvalOutcome::Score(score)) => log_at!(
                self.level,
                call,
                evaluator = %evaluator,
                score = score.value(),
                confidence = score.confidence(),
                elapsed_ms,
                tokens,
                "Completed {}",
                call
            ),
            Ok(EvalOutcome::Comparison(comparison)) => log_at!(
                self.level,
                call,
                evaluator = %evaluator,
                winner = %comparison.winner,
                confidence = comparison.confidence,
                elapsed_ms,
                tokens,
                "Completed {}",
                call
            ),
            Err(error) => {
                let level = if self.level == Level::ERROR {
                    Level::ERROR
                } else {
                    Level::WARN
                };
                log_at!(
                    level,
                    call,
                    evaluator = %evaluator,
                    error = %error,
                    elapsed_ms,
                    "Failed {}",
                    call
                )
            }
        }

        result
    }
}
