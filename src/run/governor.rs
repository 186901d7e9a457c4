//! Cost ceiling enforcement for a running scan.
//!
//! The governor watches the clamped cost. The first time it reaches the
//! tier's ceiling the run is told to wrap up and its iteration ceiling is
//! lowered to a small allowance past the current iteration. It fires at
//! most once per run.

use crate::engine::{EngineSession, IterationBudget};
use tracing::{error, warn};

pub const WRAP_UP_DIRECTIVE: &str = "URGENT COST LIMIT REACHED: You have exceeded the budget for this scan. \
Immediately wrap up all work. Tell all sub-agents to finish their current tasks and call agent_finish NOW. \
Then generate your final report and call finish_scan. No new tests or scans. Wrap up with what you have.";

/// Trip record returned when the governor fires.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WrapUp {
    pub cost: f64,
    pub ceiling: f64,
    /// New iteration ceiling, never above the previous one.
    pub max_iterations: u32,
}

#[derive(Debug, Clone)]
pub struct BudgetGovernor {
    ceiling: f64,
    allowance: u32,
    fired: bool,
}

impl BudgetGovernor {
    /// A ceiling of zero or less disables the governor.
    pub fn new(ceiling: f64, allowance: u32) -> Self {
        Self {
            ceiling,
            allowance,
            fired: false,
        }
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// Checks a clamped cost. Returns the wrap-up to apply on the first trip.
    pub fn check(&mut self, cost: f64, budget: IterationBudget) -> Option<WrapUp> {
        if self.fired || self.ceiling <= 0.0 || cost < self.ceiling {
            return None;
        }
        self.fired = true;
        Some(WrapUp {
            cost,
            ceiling: self.ceiling,
            max_iterations: clamp_iterations(budget, self.allowance),
        })
    }

    /// Sends the wrap-up to the run. Failures are logged, never raised.
    pub async fn enforce(&self, wrap_up: WrapUp, session: &dyn EngineSession) {
        warn!(
            "Run {} cost ${:.2} reached limit ${:.2}, telling it to wrap up within {} iterations",
            session.run_name(),
            wrap_up.cost,
            wrap_up.ceiling,
            wrap_up.max_iterations
        );

        if let Err(e) = session.inject_directive(WRAP_UP_DIRECTIVE).await {
            error!("Failed to send wrap-up directive to {}: {}", session.run_name(), e);
        }
        if let Err(e) = session.limit_iterations(wrap_up.max_iterations).await {
            error!("Failed to lower iteration ceiling of {}: {}", session.run_name(), e);
        }
    }
}

/// `min(max, current + allowance)`.
pub fn clamp_iterations(budget: IterationBudget, allowance: u32) -> u32 {
    budget.max.min(budget.current.saturating_add(allowance))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(current: u32, max: u32) -> IterationBudget {
        IterationBudget { current, max }
    }

    #[test]
    fn test_fires_once_at_ceiling() {
        let mut governor = BudgetGovernor::new(4.0, 8);
        assert_eq!(governor.check(3.99, budget(10, 50)), None);

        let wrap_up = governor.check(4.0, budget(12, 50)).unwrap();
        assert_eq!(wrap_up.max_iterations, 20);
        assert!(governor.has_fired());

        assert_eq!(governor.check(9.0, budget(13, 50)), None);
    }

    #[test]
    fn test_never_raises_iteration_ceiling() {
        assert_eq!(clamp_iterations(budget(46, 50), 8), 50);
        assert_eq!(clamp_iterations(budget(0, 50), 8), 8);
        assert_eq!(clamp_iterations(budget(u32::MAX - 1, u32::MAX), 8), u32::MAX);
    }

    #[test]
    fn test_disabled_without_ceiling() {
        let mut governor = BudgetGovernor::new(0.0, 8);
        assert_eq!(governor.check(1_000.0, budget(1, 50)), None);
        assert!(!governor.has_fired());
    }
}
