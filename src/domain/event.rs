//! Loop lifecycle events.
//!
//! The controller publishes these on a broadcast channel so that logging, CLI
//! output and any UI stay decoupled from the iteration driver.

use serde::{Deserialize, Serialize};

use crate::domain::{IterationReport, LoopOutcome, ProjectId};

/// An event in the life of one supervised loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    Started {
        project_id: ProjectId,
        run_id: String,
        max_iterations: u32,
    },
    IterationStarted {
        project_id: ProjectId,
        iteration: u32,
    },
    IterationFinished {
        project_id: ProjectId,
        iteration: u32,
        report: IterationReport,
    },
    BudgetUpdated {
        project_id: ProjectId,
        max_iterations: u32,
    },
    StopRequested {
        project_id: ProjectId,
    },
    Finished {
        project_id: ProjectId,
        run_id: String,
        outcome: LoopOutcome,
        iterations: u32,
    },
}

impl LoopEvent {
    pub fn project_id(&self) -> &ProjectId {
        match self {
            LoopEvent::Started { project_id, .. }
            | LoopEvent::IterationStarted { project_id, .. }
            | LoopEvent::IterationFinished { project_id, .. }
            | LoopEvent::BudgetUpdated { project_id, .. }
            | LoopEvent::StopRequested { project_id }
            | LoopEvent::Finished { project_id, .. } => project_id,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, LoopEvent::Finished { .. })
    }
}
