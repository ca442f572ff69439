//! Loop runner implementation - supervises one project's iterations.
//!
//! Each boundary, in order:
//! 1. A cancelled handle ends the loop as `Aborted` (an iteration already in
//!    flight is allowed to finish first; it is never interrupted)
//! 2. Finished backlog ends the loop as `Completed`
//! 3. The budget is read fresh from the handle; reaching it ends the loop as
//!    `BudgetExhausted`
//! 4. Otherwise the step runs, the count is incremented and persisted before
//!    the next boundary
//!
//! Whatever happens, including a panic inside the step, the registry entry is
//! removed when the runner finishes.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::broadcast;

use crate::domain::{LoopEvent, LoopOutcome, LoopState, LoopStatus, Project};
use crate::error::Result;
use crate::manager::{LoopRegistry, RunningLoopHandle};
use crate::runner::IterationStep;
use crate::storage::StatusStore;

/// Removes the registry entry for a run when dropped.
struct RegistrationGuard {
    registry: Arc<LoopRegistry>,
    project: Project,
    run_id: String,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        if self.registry.unregister_run(&self.project.id, &self.run_id) {
            log::debug!("Unregistered run {} for project {}", self.run_id, self.project.id);
        }
    }
}

/// Drives iterations for one project until a terminal outcome.
pub struct LoopRunner<S, T>
where
    S: StatusStore,
    T: IterationStep,
{
    project: Project,
    handle: RunningLoopHandle,
    store: Arc<S>,
    registry: Arc<LoopRegistry>,
    step: Arc<T>,
    events: broadcast::Sender<LoopEvent>,
}

impl<S, T> LoopRunner<S, T>
where
    S: StatusStore,
    T: IterationStep,
{
    pub fn new(
        project: Project,
        handle: RunningLoopHandle,
        store: Arc<S>,
        registry: Arc<LoopRegistry>,
        step: Arc<T>,
        events: broadcast::Sender<LoopEvent>,
    ) -> Self {
        Self {
            project,
            handle,
            store,
            registry,
            step,
            events,
        }
    }

    /// Run the loop to completion and return how it ended.
    ///
    /// `status` is the record written at start; `backlog_done` says whether the
    /// backlog was already empty when the loop was started.
    pub async fn run(self, mut status: LoopStatus, backlog_done: bool) -> LoopOutcome {
        let guard = RegistrationGuard {
            registry: self.registry.clone(),
            project: self.project.clone(),
            run_id: self.handle.run_id().to_string(),
        };

        let driven = AssertUnwindSafe(self.drive(&mut status, backlog_done))
            .catch_unwind()
            .await;
        let outcome = match driven {
            Ok(outcome) => outcome,
            Err(panic) => {
                let reason = format!("iteration step panicked: {}", panic_message(panic.as_ref()));
                tracing::error!(project = %self.project.id, reason = %reason, "Loop task panicked");
                LoopOutcome::Failed(reason)
            }
        };

        self.finish(&mut status, &outcome);
        drop(guard);

        tracing::info!(
            project = %self.project.id,
            run_id = %self.handle.run_id(),
            outcome = ?outcome,
            iterations = status.current_iteration,
            elapsed_secs = self.handle.elapsed().as_secs(),
            "Loop finished"
        );
        self.emit(LoopEvent::Finished {
            project_id: self.project.id.clone(),
            run_id: self.handle.run_id().to_string(),
            outcome: outcome.clone(),
            iterations: status.current_iteration,
        });

        outcome
    }

    async fn drive(&self, status: &mut LoopStatus, backlog_done: bool) -> LoopOutcome {
        let mut all_work_complete = backlog_done;

        loop {
            if self.handle.is_cancelled() {
                return LoopOutcome::Aborted;
            }
            if all_work_complete {
                return LoopOutcome::Completed;
            }
            let budget = self.handle.iteration_budget();
            if status.current_iteration >= budget {
                return LoopOutcome::BudgetExhausted;
            }

            let iteration = status.current_iteration + 1;
            tracing::debug!(project = %self.project.id, iteration, budget, "Iteration starting");
            self.emit(LoopEvent::IterationStarted {
                project_id: self.project.id.clone(),
                iteration,
            });

            let report = match self.step.run_one_iteration(&self.project, iteration).await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(project = %self.project.id, iteration, error = %e, "Iteration failed");
                    return LoopOutcome::Failed(e.to_string());
                }
            };

            status.current_iteration = iteration;
            // A budget lowered below the count ends the loop at the next
            // boundary; until then the record must not read current > max.
            status.max_iterations = self.handle.iteration_budget().max(iteration);
            status.touch();
            all_work_complete = report.all_work_complete;

            // After a stop the record already says idle; the final write
            // below carries the count instead.
            if let Some(Err(e)) = self.handle.unless_cancelled(|| self.persist(status)) {
                tracing::error!(project = %self.project.id, error = %e, "Failed to persist iteration count");
                return LoopOutcome::Failed(e.to_string());
            }

            tracing::info!(
                project = %self.project.id,
                iteration,
                story = ?report.story_attempted,
                story_completed = report.story_completed,
                all_work_complete = report.all_work_complete,
                "Iteration finished"
            );
            self.emit(LoopEvent::IterationFinished {
                project_id: self.project.id.clone(),
                iteration,
                report,
            });
        }
    }

    /// Write the terminal state.
    fn finish(&self, status: &mut LoopStatus, outcome: &LoopOutcome) {
        status.max_iterations = self.handle.iteration_budget().max(status.current_iteration);
        match outcome.persisted_state() {
            LoopState::Completed => status.mark_completed(),
            LoopState::Error => {
                let reason = match outcome {
                    LoopOutcome::Failed(reason) => reason.clone(),
                    _ => String::new(),
                };
                status.mark_error(reason);
            }
            LoopState::Idle | LoopState::Running => status.mark_idle(),
        }

        if let Err(e) = self.persist(status) {
            tracing::error!(project = %self.project.id, error = %e, "Failed to persist final loop status");
        }
    }

    /// Save unless a newer run has taken over the project.
    fn persist(&self, status: &LoopStatus) -> Result<()> {
        let owned = match self.registry.get(&self.project.id) {
            None => true,
            Some(current) => current.run_id() == self.handle.run_id(),
        };
        if !owned {
            log::debug!(
                "Run {} no longer owns project {}; skipping status write",
                self.handle.run_id(),
                self.project.id
            );
            return Ok(());
        }
        self.store.save(status)
    }

    fn emit(&self, event: LoopEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
