//! Loop controller implementation
//!
//! `LoopController` is the caller-facing surface for build loops: it validates
//! start preconditions, sizes the iteration budget, registers the loop and
//! spawns its runner, and serves stop, status and budget-update requests. All
//! status reads go through the reconciler.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::domain::{LoopEvent, LoopOutcome, LoopStatus, Project, ProjectId};
use crate::error::{LoopError, Result};
use crate::limit::calculate_loop_limit;
use crate::liveness::ProcessProbe;
use crate::manager::reconciler::{Reconciliation, StaleReason, StatusReconciler};
use crate::manager::{LoopRegistry, RunningLoopHandle};
use crate::runner::{BacklogSource, IterationStep, LoopRunner};
use crate::storage::StatusStore;

/// Configuration for the LoopController
#[derive(Debug, Clone)]
pub struct LoopControllerConfig {
    /// Capacity of the lifecycle event channel
    pub event_capacity: usize,
    /// PID recorded as the owner of loops started here
    pub owner_pid: u32,
}

impl Default for LoopControllerConfig {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            owner_pid: std::process::id(),
        }
    }
}

/// Caller options for `start`
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Use this budget instead of sizing it from the backlog
    pub max_iterations: Option<u32>,
    /// Stories added since the backlog was last counted
    pub newly_added: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartResponse {
    pub accepted: bool,
    pub status: LoopStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopResponse {
    pub ok: bool,
    /// Whether a supervised loop was actually stopped
    pub was_running: bool,
}

/// Reconciled status plus whether this process is driving the loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusView {
    #[serde(flatten)]
    pub status: LoopStatus,
    pub is_actively_supervised: bool,
    /// Live budget of the supervised loop, which may differ from the
    /// persisted `max_iterations` until the next boundary
    pub iteration_budget: Option<u32>,
}

/// Orchestrates build loops for any number of projects
pub struct LoopController<S, B, T>
where
    S: StatusStore,
    B: BacklogSource,
    T: IterationStep,
{
    store: Arc<S>,
    registry: Arc<LoopRegistry>,
    reconciler: StatusReconciler<S>,
    backlog: Arc<B>,
    step: Arc<T>,
    events: broadcast::Sender<LoopEvent>,
    config: LoopControllerConfig,
}

impl<S, B, T> LoopController<S, B, T>
where
    S: StatusStore + 'static,
    B: BacklogSource + 'static,
    T: IterationStep + 'static,
{
    /// Create a controller that probes real processes and treats now as the
    /// process start
    pub fn new(store: Arc<S>, registry: Arc<LoopRegistry>, backlog: Arc<B>, step: Arc<T>) -> Self {
        let reconciler = StatusReconciler::new(store.clone(), registry.clone(), Arc::new(ProcessProbe), Utc::now());
        Self::with_reconciler(store, registry, reconciler, backlog, step, LoopControllerConfig::default())
    }

    /// Create a controller with an explicit reconciler and configuration.
    ///
    /// The reconciler adopts `config.owner_pid`, so records this controller
    /// writes are the ones it judges as its own.
    pub fn with_reconciler(
        store: Arc<S>,
        registry: Arc<LoopRegistry>,
        reconciler: StatusReconciler<S>,
        backlog: Arc<B>,
        step: Arc<T>,
        config: LoopControllerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            store,
            registry,
            reconciler: reconciler.with_owner_pid(config.owner_pid),
            backlog,
            step,
            events,
            config,
        }
    }

    /// Start a loop for `project`.
    ///
    /// Returns once the loop is registered and its `running` status persisted;
    /// iterations run on a spawned task. Fails with `AlreadyRunning` if this
    /// process supervises the project or its reconciled status is running,
    /// which includes a loop driven by another live process.
    pub fn start(&self, project: &Project, options: StartOptions) -> Result<StartResponse> {
        self.spawn(project, options).map(|(response, _)| response)
    }

    /// Like `start`, but also hands back the runner task.
    pub fn spawn(&self, project: &Project, options: StartOptions) -> Result<(StartResponse, JoinHandle<LoopOutcome>)> {
        if self.registry.is_running(&project.id) {
            tracing::warn!(project = %project.id, "Start rejected: loop already supervised");
            return Err(LoopError::AlreadyRunning(project.id.clone()));
        }

        let Reconciliation { status, .. } = self.reconciler.reconcile(&project.id)?;
        if !status.state.can_start() {
            tracing::warn!(
                project = %project.id,
                owner_pid = ?status.owner_process_id,
                "Start rejected: status still running after reconciliation"
            );
            return Err(LoopError::AlreadyRunning(project.id.clone()));
        }

        let backlog = self.backlog.compute_backlog(project)?;
        let budget = options
            .max_iterations
            .unwrap_or_else(|| calculate_loop_limit(backlog.incomplete_count, options.newly_added));

        let handle = RunningLoopHandle::new(budget);
        self.registry.register(&project.id, handle.clone())?;

        let mut status = status;
        status.begin(budget, self.config.owner_pid, Utc::now());
        if let Err(e) = self.store.save(&status) {
            self.registry.unregister_run(&project.id, handle.run_id());
            return Err(e);
        }

        tracing::info!(
            project = %project.id,
            run_id = %handle.run_id(),
            budget,
            incomplete = backlog.incomplete_count,
            overridden = options.max_iterations.is_some(),
            "Loop started"
        );
        let _ = self.events.send(LoopEvent::Started {
            project_id: project.id.clone(),
            run_id: handle.run_id().to_string(),
            max_iterations: budget,
        });

        let runner = LoopRunner::new(
            project.clone(),
            handle,
            self.store.clone(),
            self.registry.clone(),
            self.step.clone(),
            self.events.clone(),
        );
        let task = tokio::spawn(runner.run(status.clone(), backlog.is_done()));

        Ok((StartResponse { accepted: true, status }, task))
    }

    /// Stop a project's loop.
    ///
    /// Deregisters immediately and marks the status idle; an iteration in
    /// flight finishes on its own and no further iteration starts. Stopping a
    /// project with no loop is a no-op.
    pub fn stop(&self, project: &ProjectId) -> StopResponse {
        let Some(handle) = self.registry.unregister(project) else {
            log::debug!("Stop for {} ignored: nothing running", project);
            return StopResponse {
                ok: true,
                was_running: false,
            };
        };
        handle.cancel();
        tracing::info!(project = %project, run_id = %handle.run_id(), "Loop stop requested");
        let _ = self.events.send(LoopEvent::StopRequested {
            project_id: project.clone(),
        });

        match self.store.load(project) {
            Ok(mut status) if status.is_running() => {
                status.mark_idle();
                if let Err(e) = self.store.save(&status) {
                    tracing::error!(project = %project, error = %e, "Failed to persist stopped status");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::error!(project = %project, error = %e, "Failed to load status on stop"),
        }

        StopResponse {
            ok: true,
            was_running: true,
        }
    }

    /// Reconciled status for a project
    pub fn status(&self, project: &ProjectId) -> Result<StatusView> {
        let Reconciliation { status, .. } = self.reconciler.reconcile(project)?;
        let handle = self.registry.get(project);
        Ok(StatusView {
            status,
            is_actively_supervised: handle.is_some(),
            iteration_budget: handle.map(|h| h.iteration_budget()),
        })
    }

    /// Change the ceiling a running loop checks at its next boundary.
    ///
    /// Returns false if no loop is running for the project.
    pub fn update_iteration_budget(&self, project: &ProjectId, new_max: u32) -> bool {
        match self.registry.update_budget(project, new_max) {
            Ok(()) => {
                tracing::info!(project = %project, new_max, "Iteration budget updated");
                let _ = self.events.send(LoopEvent::BudgetUpdated {
                    project_id: project.clone(),
                    max_iterations: new_max,
                });
                true
            }
            Err(e) => {
                log::debug!("Budget update for {} rejected: {}", project, e);
                false
            }
        }
    }

    /// Reset every stale `running` record, typically once at startup
    pub fn recover(&self) -> Result<Vec<(ProjectId, StaleReason)>> {
        self.reconciler.reconcile_all()
    }

    /// Subscribe to lifecycle events for all projects
    pub fn subscribe(&self) -> broadcast::Receiver<LoopEvent> {
        self.events.subscribe()
    }

    pub fn running_projects(&self) -> Vec<ProjectId> {
        self.registry.running_projects()
    }

    pub fn running_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_running(&self, project: &ProjectId) -> bool {
        self.registry.is_running(project)
    }
}
