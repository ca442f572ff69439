//! Build loop integration tests
//!
//! Drives the controller end to end against an on-disk status store with a
//! fake iteration step.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tempfile::TempDir;
use tokio::sync::{Semaphore, broadcast};

use speclooper::domain::{Backlog, IterationReport, LoopEvent, LoopOutcome, LoopState, LoopStatus, Project, ProjectId};
use speclooper::error::{LoopError, Result};
use speclooper::liveness::ProcessProbe;
use speclooper::manager::{LoopController, LoopControllerConfig, LoopRegistry, StartOptions, StatusReconciler};
use speclooper::runner::{BacklogSource, IterationStep};
use speclooper::storage::{JsonlStatusStore, StatusStore};

struct CountedBacklog(u32);

impl BacklogSource for CountedBacklog {
    fn compute_backlog(&self, _project: &Project) -> Result<Backlog> {
        Ok(Backlog {
            incomplete_count: self.0,
            ready_stories: Vec::new(),
        })
    }
}

/// Never finishes the backlog; optionally waits for a permit per iteration
#[derive(Default)]
struct EndlessStep {
    calls: AtomicU32,
    gate: Option<Arc<Semaphore>>,
}

#[async_trait]
impl IterationStep for EndlessStep {
    async fn run_one_iteration(&self, _project: &Project, iteration: u32) -> Result<IterationReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        Ok(IterationReport {
            story_attempted: Some(format!("S-{}", iteration)),
            story_completed: false,
            all_work_complete: false,
        })
    }
}

type Controller = LoopController<JsonlStatusStore, CountedBacklog, EndlessStep>;

fn controller(dir: &TempDir, incomplete: u32, step: Arc<EndlessStep>) -> (Controller, Arc<JsonlStatusStore>) {
    controller_as(dir, std::process::id(), incomplete, step)
}

/// A controller that stamps and judges records as if it ran under `owner_pid`
fn controller_as(
    dir: &TempDir,
    owner_pid: u32,
    incomplete: u32,
    step: Arc<EndlessStep>,
) -> (Controller, Arc<JsonlStatusStore>) {
    let store = Arc::new(JsonlStatusStore::new(dir.path()).unwrap());
    let registry = Arc::new(LoopRegistry::new());
    let reconciler = StatusReconciler::new(store.clone(), registry.clone(), Arc::new(ProcessProbe), Utc::now());
    let controller = LoopController::with_reconciler(
        store.clone(),
        registry,
        reconciler,
        Arc::new(CountedBacklog(incomplete)),
        step,
        LoopControllerConfig {
            owner_pid,
            ..Default::default()
        },
    );
    (controller, store)
}

async fn wait_for_iteration(rx: &mut broadcast::Receiver<LoopEvent>, n: u32) {
    loop {
        if let LoopEvent::IterationStarted { iteration, .. } = rx.recv().await.unwrap()
            && iteration == n
        {
            return;
        }
    }
}

#[tokio::test]
async fn test_budget_sized_from_backlog_runs_to_exhaustion() {
    let dir = TempDir::new().unwrap();
    let step = Arc::new(EndlessStep::default());
    let (ctl, _store) = controller(&dir, 10, step.clone());
    let project = Project::new("docs", dir.path());

    let (response, task) = ctl.spawn(&project, StartOptions::default()).unwrap();
    assert_eq!(response.status.max_iterations, 12);

    assert_eq!(task.await.unwrap(), LoopOutcome::BudgetExhausted);
    assert_eq!(step.calls.load(Ordering::SeqCst), 12);

    // A fresh store instance sees the final record on disk.
    let reopened = JsonlStatusStore::new(dir.path()).unwrap();
    let status = reopened.load(&project.id).unwrap();
    assert_eq!(status.state, LoopState::Idle);
    assert_eq!(status.current_iteration, 12);
    assert_eq!(status.max_iterations, 12);
    assert!(!ctl.is_running(&project.id));
}

#[tokio::test]
async fn test_budget_raised_mid_run() {
    let dir = TempDir::new().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let step = Arc::new(EndlessStep {
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let (ctl, store) = controller(&dir, 10, step.clone());
    let project = Project::new("docs", dir.path());
    let mut rx = ctl.subscribe();

    let (_, task) = ctl.spawn(&project, StartOptions::default()).unwrap();
    gate.add_permits(4);
    wait_for_iteration(&mut rx, 5).await;

    assert!(ctl.update_iteration_budget(&project.id, 20));
    gate.add_permits(100);

    assert_eq!(task.await.unwrap(), LoopOutcome::BudgetExhausted);
    assert_eq!(step.calls.load(Ordering::SeqCst), 20);
    let status = store.load(&project.id).unwrap();
    assert_eq!(status.state, LoopState::Idle);
    assert_eq!(status.current_iteration, 20);
    assert_eq!(status.max_iterations, 20);
}

#[tokio::test]
async fn test_budget_lowered_mid_run_stops_at_next_boundary() {
    let dir = TempDir::new().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let step = Arc::new(EndlessStep {
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let (ctl, store) = controller(&dir, 10, step.clone());
    let project = Project::new("docs", dir.path());
    let mut rx = ctl.subscribe();

    let (_, task) = ctl.spawn(&project, StartOptions::default()).unwrap();
    gate.add_permits(2);
    wait_for_iteration(&mut rx, 3).await;

    assert!(ctl.update_iteration_budget(&project.id, 2));
    gate.add_permits(100);

    assert_eq!(task.await.unwrap(), LoopOutcome::BudgetExhausted);
    assert_eq!(step.calls.load(Ordering::SeqCst), 3);
    let status = store.load(&project.id).unwrap();
    assert_eq!(status.current_iteration, 3);
    assert_eq!(status.max_iterations, 3);
}

#[tokio::test]
async fn test_stop_then_restart() {
    let dir = TempDir::new().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let step = Arc::new(EndlessStep {
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let (ctl, store) = controller(&dir, 3, step.clone());
    let project = Project::new("docs", dir.path());
    let mut rx = ctl.subscribe();

    let (_, task) = ctl.spawn(&project, StartOptions::default()).unwrap();
    wait_for_iteration(&mut rx, 1).await;

    let stopped = ctl.stop(&project.id);
    assert!(stopped.ok);
    assert_eq!(store.load(&project.id).unwrap().state, LoopState::Idle);

    gate.add_permits(1);
    assert_eq!(task.await.unwrap(), LoopOutcome::Aborted);
    assert_eq!(step.calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.load(&project.id).unwrap().current_iteration, 1);

    gate.add_permits(100);
    let (response, task) = ctl.spawn(&project, StartOptions::default()).unwrap();
    assert!(response.accepted);
    assert_eq!(task.await.unwrap(), LoopOutcome::BudgetExhausted);
    assert_eq!(store.load(&project.id).unwrap().current_iteration, 4);
}

#[tokio::test]
async fn test_records_from_previous_process_reset() {
    let dir = TempDir::new().unwrap();
    {
        let previous = JsonlStatusStore::new(dir.path()).unwrap();
        let mut status = LoopStatus::idle(ProjectId::new("docs"));
        status.begin(12, std::process::id(), Utc::now() - Duration::hours(2));
        status.current_iteration = 7;
        previous.save(&status).unwrap();
    }

    let (ctl, store) = controller(&dir, 1, Arc::new(EndlessStep::default()));

    let healed = ctl.recover().unwrap();
    assert_eq!(healed.len(), 1);

    let view = ctl.status(&ProjectId::new("docs")).unwrap();
    assert_eq!(view.status.state, LoopState::Idle);
    assert_eq!(view.status.current_iteration, 7);
    assert!(!view.is_actively_supervised);
    assert_eq!(store.load(&ProjectId::new("docs")).unwrap().state, LoopState::Idle);
}

// Two `run` processes sharing one data directory. The second one runs as
// pid 1, which is always alive, so the first one never treats it as gone.
#[tokio::test]
async fn test_two_processes_share_status_directory() {
    let dir = TempDir::new().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let step = Arc::new(EndlessStep {
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let (first, _) = controller(&dir, 10, step.clone());
    let (second, _) = controller_as(&dir, 1, 1, Arc::new(EndlessStep::default()));
    let docs = Project::new("docs", dir.path());
    let handbook = Project::new("handbook", dir.path());
    let mut rx = first.subscribe();

    let (_, docs_task) = first.spawn(&docs, StartOptions::default()).unwrap();
    wait_for_iteration(&mut rx, 1).await;

    // The second process neither resets nor duplicates the live loop.
    assert!(second.recover().unwrap().is_empty());
    let err = second.start(&docs, StartOptions::default()).unwrap_err();
    assert!(matches!(err, LoopError::AlreadyRunning(_)));
    let view = second.status(&docs.id).unwrap();
    assert_eq!(view.status.state, LoopState::Running);
    assert!(!view.is_actively_supervised);

    let (_, handbook_task) = second
        .spawn(
            &handbook,
            StartOptions {
                max_iterations: Some(2),
                newly_added: 0,
            },
        )
        .unwrap();
    assert_eq!(handbook_task.await.unwrap(), LoopOutcome::BudgetExhausted);

    first.stop(&docs.id);
    gate.add_permits(1);
    assert_eq!(docs_task.await.unwrap(), LoopOutcome::Aborted);

    let reopened = JsonlStatusStore::new(dir.path()).unwrap();
    let docs_status = reopened.load(&docs.id).unwrap();
    assert_eq!(docs_status.state, LoopState::Idle);
    assert_eq!(docs_status.current_iteration, 1);
    let handbook_status = reopened.load(&handbook.id).unwrap();
    assert_eq!(handbook_status.state, LoopState::Idle);
    assert_eq!(handbook_status.current_iteration, 2);
    assert_eq!(handbook_status.owner_process_id, Some(1));
}
