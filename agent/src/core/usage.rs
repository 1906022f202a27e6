//! Token usage accounting and quota checks.
//!
//! Exact counts (reported by the model backend) and length-based estimates are
//! kept as separate sub-totals; the quota applies to their sum.

use std::time::{Duration, Instant};

use serde_json::Value;

use crate::core::types::short_comment;

pub const DEFAULT_TOKEN_QUOTA: u64 = 10_000;

/// Characters per token assumed by the estimate path.
const CHARS_PER_TOKEN: u64 = 4;

/// Reply metadata shapes that may carry a total token count, tried in order.
const USAGE_POINTERS: [&str; 4] = [
    "/usage/total_tokens",
    "/response_metadata/token_usage/total_tokens",
    "/lc_metadata/usage/total_tokens",
    "/response/usage/total_tokens",
];

/// Running token counter for one control-loop run.
#[derive(Debug, Clone)]
pub struct UsageTracker {
    exact: u64,
    estimated: u64,
    limit: u64,
    start: Instant,
}

impl UsageTracker {
    pub fn new(limit: u64) -> Self {
        Self {
            exact: 0,
            estimated: 0,
            limit,
            start: Instant::now(),
        }
    }

    /// Add `exact_tokens` verbatim, or estimate from `text` when absent.
    pub fn account(&mut self, exact_tokens: Option<u64>, text: &str) -> u64 {
        match exact_tokens {
            Some(tokens) => {
                self.exact = self.exact.saturating_add(tokens);
                tokens
            }
            None => {
                let tokens = estimate_tokens(text);
                self.estimated = self.estimated.saturating_add(tokens);
                tokens
            }
        }
    }

    pub fn tokens(&self) -> u64 {
        self.exact.saturating_add(self.estimated)
    }

    pub fn exact_tokens(&self) -> u64 {
        self.exact
    }

    pub fn estimated_tokens(&self) -> u64 {
        self.estimated
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn quota_exceeded(&self) -> bool {
        self.tokens() > self.limit
    }

    pub fn reset(&mut self) {
        self.exact = 0;
        self.estimated = 0;
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Operator-facing line for one dispatched action. Adds no cost.
    pub fn activity_line(&self, timestamp: &str, action: &str, comment: &str) -> String {
        format!(
            "{timestamp} {action:<24} {:<50} {:>6} tok",
            short_comment(comment),
            self.tokens()
        )
    }

    /// Durable summary line written once at clean shutdown.
    pub fn summary_line(&self) -> String {
        format!(
            "{}s | tok={} (exact={} estimated={})",
            self.elapsed().as_secs(),
            self.tokens(),
            self.exact,
            self.estimated
        )
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_QUOTA)
    }
}

/// `max(1, chars / 4)`.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64 / CHARS_PER_TOKEN).max(1)
}

/// Pull a total token count out of reply metadata, if any known shape matches.
pub fn extract_total_tokens(metadata: &Value) -> Option<u64> {
    USAGE_POINTERS
        .iter()
        .find_map(|pointer| metadata.pointer(pointer).and_then(Value::as_u64))
}
