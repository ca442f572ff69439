//! Collaborator seams used by the loop runner.

use async_trait::async_trait;

use crate::domain::{Backlog, IterationReport, Project};
use crate::error::Result;

/// Performs one unit of agent work.
///
/// Calls may take seconds to minutes. The runner never interrupts a call in
/// flight, so implementations that need a hard deadline must enforce it
/// themselves.
#[async_trait]
pub trait IterationStep: Send + Sync {
    /// Run iteration number `iteration` (1-based) for `project`.
    async fn run_one_iteration(&self, project: &Project, iteration: u32) -> Result<IterationReport>;
}

/// Supplies the remaining-work count the iteration budget is sized from.
pub trait BacklogSource: Send + Sync {
    fn compute_backlog(&self, project: &Project) -> Result<Backlog>;
}
