//! Iteration and loop outcome types.

use serde::{Deserialize, Serialize};

use crate::domain::LoopState;

/// What one invocation of the step collaborator achieved
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationReport {
    /// Story the agent was pointed at, if any was ready
    pub story_attempted: Option<String>,
    /// Whether that story passes after the iteration
    pub story_completed: bool,
    /// Whether the whole backlog is done
    pub all_work_complete: bool,
}

/// Terminal outcome of a supervised loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum LoopOutcome {
    /// The step reported all backlog work done
    Completed,
    /// The iteration budget ran out with work remaining
    BudgetExhausted,
    /// The step collaborator failed
    Failed(String),
    /// A stop was requested
    Aborted,
}

impl LoopOutcome {
    /// The persisted state a loop ending this way leaves behind
    pub fn persisted_state(&self) -> LoopState {
        match self {
            LoopOutcome::Completed => LoopState::Completed,
            LoopOutcome::BudgetExhausted | LoopOutcome::Aborted => LoopState::Idle,
            LoopOutcome::Failed(_) => LoopState::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persisted_state_mapping() {
        assert_eq!(LoopOutcome::Completed.persisted_state(), LoopState::Completed);
        assert_eq!(LoopOutcome::BudgetExhausted.persisted_state(), LoopState::Idle);
        assert_eq!(LoopOutcome::Aborted.persisted_state(), LoopState::Idle);
        assert_eq!(LoopOutcome::Failed("boom".into()).persisted_state(), LoopState::Error);
    }

    #[test]
    fn test_iteration_report_default() {
        let report = IterationReport::default();
        assert!(report.story_attempted.is_none());
        assert!(!report.story_completed);
        assert!(!report.all_work_complete);
    }
}
