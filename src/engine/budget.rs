use crate::clock::chrono_duration;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Budgets never drop below this, however tight the host ceiling is.
pub const MIN_BUDGET: Duration = Duration::from_secs(10);

/// Derives the per-invocation time allowance from the host's execution
/// ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBudget {
    pub execution_ceiling: Duration,
    pub safety_margin: Duration,
    pub max_budget: Duration,
}

impl TimeBudget {
    pub fn new(execution_ceiling: Duration, safety_margin: Duration, max_budget: Duration) -> Self {
        Self {
            execution_ceiling,
            safety_margin,
            max_budget,
        }
    }

    /// `ceiling - margin`, capped at `max_budget` and floored at [`MIN_BUDGET`].
    pub fn budget(&self) -> Duration {
        self.execution_ceiling
            .saturating_sub(self.safety_margin)
            .min(self.max_budget)
            .max(MIN_BUDGET)
    }

    pub fn window(&self, start_time: DateTime<Utc>) -> BatchWindow {
        BatchWindow {
            start_time,
            budget: self.budget(),
        }
    }
}

/// One invocation's time allowance. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchWindow {
    pub start_time: DateTime<Utc>,
    pub budget: Duration,
}

impl BatchWindow {
    pub fn deadline(&self) -> DateTime<Utc> {
        self.start_time + chrono_duration(self.budget)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline()
    }
}
