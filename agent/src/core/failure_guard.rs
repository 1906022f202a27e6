//! Consecutive build-failure counter.

use crate::core::types::{Action, ActionKind, ActionResult};

pub const DEFAULT_MAX_BUILD_FAILURES: u32 = 3;

/// What the loop must do after recording a dispatched action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    /// Counter was reset (non-build action or successful build).
    Clear,
    /// A failed build was counted; threshold not reached yet.
    Counting(u32),
    /// Threshold reached: escalate to a human. The counter is already zero.
    Escalate,
}

#[derive(Debug, Clone)]
pub struct FailureGuard {
    consecutive: u32,
    limit: u32,
}

impl FailureGuard {
    pub fn new(limit: u32) -> Self {
        Self {
            consecutive: 0,
            limit,
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Record the outcome of one dispatched action.
    pub fn observe(&mut self, action: &Action, result: &ActionResult) -> FailureVerdict {
        if !action.is(ActionKind::Build) || !result.is_error() {
            self.consecutive = 0;
            return FailureVerdict::Clear;
        }
        self.consecutive += 1;
        if self.consecutive >= self.limit {
            self.consecutive = 0;
            return FailureVerdict::Escalate;
        }
        FailureVerdict::Counting(self.consecutive)
    }
}

impl Default for FailureGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUILD_FAILURES)
    }
}
