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

//! Caching layer for evaluation results

use super::{keys, EvalOutcome, Middleware, MiddlewareContext, Next};
use crate::EvalError;
use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Context key set to `true` when the result came from the cache
pub const CACHE_HIT: &str = "cache_hit";

/// Serves repeated calls from memory without invoking the judge
pub struct CachingMiddleware {
    cache: Cache<u64, EvalOutcome>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl CachingMiddleware {
    /// Create a new cache with specified TTL in seconds
    pub fn new(ttl_secs: u64) -> Self {
        Self::with_capacity(ttl_secs, 10_000)
    }

    pub fn with_capacity(ttl_secs: u64, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self {
            cache,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Key over the inputs and the call shape seeded into the context
    fn compute_key(output: &str, reference: Option<&str>, context: &MiddlewareContext) -> u64 {
        let mut hasher = DefaultHasher::new();

        output.hash(&mut hasher);
        reference.hash(&mut hasher);
        context.is_pairwise().hash(&mut hasher);

        for key in [keys::EVALUATOR, keys::MODEL, keys::CRITERIA, keys::PAIRWISE_DATA] {
            if let Some(value) = context.get(key) {
                key.hash(&mut hasher);
                value.to_string().hash(&mut hasher);
            }
        }

        hasher.finish()
    }

    /// Clear entire cache
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
            entry_count: self.cache.entry_count(),
        }
    }
}

impl Default for CachingMiddleware {
    fn default() -> Self {
        Self::new(3600)
    }
}

#[async_trait]
impl Middleware for CachingMiddleware {
    fn name(&self) -> &str {
        "caching"
    }

    async fn process(
        &self,
        output: &str,
        reference: Option<&str>,
        next: Next<'_>,
        context: &mut MiddlewareContext,
    ) -> Result<EvalOutcome, EvalError> {
        let key = Self::compute_key(output, reference, context);

        if let Some(cached) = self.cache.get(&key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            context.insert(CACHE_HIT, true);
            debug!(key, "Serving evaluation from cache");
            return Ok(cached);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        context.insert(CACHE_HIT, false);

        let outcome = next.run(output, reference, context).await?;
        self.cache.insert(key, outcome.clone()).await;
        Ok(outcome)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub entry_count: u64,
}
