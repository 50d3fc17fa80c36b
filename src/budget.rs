// src/budget.rs

//! Budget governor: decides whether new agents may start.
//!
//! The governor only reads session state. It never kills running agents;
//! work already in flight is allowed to finish and its cost is still
//! recorded.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::state::Session;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BudgetAssessment {
    /// No ceiling configured.
    Unlimited,
    WithinBudget { accumulated: f64, limit: f64 },
    /// Past the warn threshold but below the hard stop.
    Warning { accumulated: f64, limit: f64 },
    /// At or past the hard stop. No new agents.
    Exhausted { accumulated: f64, limit: f64 },
}

impl BudgetAssessment {
    pub fn allows_spawn(self) -> bool {
        !matches!(self, BudgetAssessment::Exhausted { .. })
    }
}

#[derive(Debug, Default)]
pub struct BudgetGovernor {
    warned: AtomicBool,
}

impl BudgetGovernor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulated cost: the larger of the stored total and the sum of the
    /// agents' latest costs.
    pub fn accumulated(session: &Session) -> f64 {
        session.budget.accumulated.max(session.agent_cost_total())
    }

    pub fn assess(&self, session: &Session) -> BudgetAssessment {
        let Some(limit) = session.budget.hard_limit() else {
            return BudgetAssessment::Unlimited;
        };
        let accumulated = Self::accumulated(session);

        if accumulated >= limit {
            return BudgetAssessment::Exhausted { accumulated, limit };
        }

        let warn_at = session.budget.warn_limit().unwrap_or(limit);
        if accumulated >= warn_at {
            if !self.warned.swap(true, Ordering::SeqCst) {
                warn!(
                    session_id = %session.session_id,
                    accumulated,
                    limit,
                    "budget warning threshold crossed"
                );
            }
            return BudgetAssessment::Warning { accumulated, limit };
        }

        BudgetAssessment::WithinBudget { accumulated, limit }
    }

    pub fn can_spawn(&self, session: &Session) -> bool {
        let assessment = self.assess(session);
        if let BudgetAssessment::Exhausted { accumulated, limit } = assessment {
            info!(
                session_id = %session.session_id,
                accumulated,
                limit,
                "budget exhausted; not starting new agents"
            );
        }
        assessment.allows_spawn()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{BudgetRecord, SessionStatus};
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;

    fn session(ceiling: Option<f64>, accumulated: f64) -> Session {
        Session {
            session_id: "s".into(),
            status: SessionStatus::Active,
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
            dag_path: None,
            dag_fingerprint: String::new(),
            budget: BudgetRecord {
                ceiling,
                accumulated,
                warn_threshold: 0.7,
                hard_stop_threshold: 1.0,
            },
            max_concurrency: 1,
            waves: Vec::new(),
            agents: Default::default(),
        }
    }

    #[test]
    fn no_ceiling_is_unlimited() {
        let governor = BudgetGovernor::new();
        assert_eq!(governor.assess(&session(None, 1e9)), BudgetAssessment::Unlimited);
        assert!(governor.can_spawn(&session(None, 1e9)));
    }

    #[test]
    fn thresholds_classify_accumulated_cost() {
        let g = BudgetGovernor::new();
        assert!(matches!(g.assess(&session(Some(10.0), 6.9)), BudgetAssessment::WithinBudget { .. }));
        assert!(matches!(g.assess(&session(Some(10.0), 7.0)), BudgetAssessment::Warning { .. }));
        assert!(matches!(g.assess(&session(Some(10.0), 10.0)), BudgetAssessment::Exhausted { .. }));
        assert!(!g.can_spawn(&session(Some(10.0), 11.0)));
    }

    #[test]
    fn zero_ceiling_blocks_everything() {
        assert!(!BudgetGovernor::new().can_spawn(&session(Some(0.0), 0.0)));
    }

    proptest! {
        #[test]
        fn can_spawn_is_monotonic_in_cost(ceiling in 0.0f64..100.0, a in 0.0f64..200.0, b in 0.0f64..200.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let g = BudgetGovernor::new();
            if !g.can_spawn(&session(Some(ceiling), lo)) {
                prop_assert!(!g.can_spawn(&session(Some(ceiling), hi)));
            }
        }
    }
}
