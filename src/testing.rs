//! Test doubles for the collaborator traits.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::domain::{Backlog, IterationReport, LoopStatus, Project, ProjectId, Story};
use crate::error::{LoopError, Result};
use crate::runner::{BacklogSource, IterationStep};
use crate::storage::{MemoryStatusStore, StatusStore};

/// Shared call counter
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU32>);

impl Counter {
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    fn incr(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Step whose behavior is scripted per iteration number
#[derive(Debug, Default)]
pub struct ScriptedStep {
    complete_after: Option<u32>,
    fail_on: Option<u32>,
    panic_on: Option<u32>,
    gate: Option<Arc<Semaphore>>,
    calls: Counter,
    seen: Arc<Mutex<Vec<u32>>>,
}

impl ScriptedStep {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report all work complete once `n` calls have been made
    pub fn complete_after(mut self, n: u32) -> Self {
        self.complete_after = Some(n);
        self
    }

    pub fn fail_on(mut self, iteration: u32) -> Self {
        self.fail_on = Some(iteration);
        self
    }

    pub fn panic_on(mut self, iteration: u32) -> Self {
        self.panic_on = Some(iteration);
        self
    }

    /// Each iteration waits for one permit before returning
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Counter {
        self.calls.clone()
    }

    pub fn seen(&self) -> Arc<Mutex<Vec<u32>>> {
        self.seen.clone()
    }
}

#[async_trait]
impl IterationStep for ScriptedStep {
    async fn run_one_iteration(&self, _project: &Project, iteration: u32) -> Result<IterationReport> {
        let call = self.calls.incr();
        self.seen.lock().unwrap().push(iteration);

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        if self.panic_on == Some(iteration) {
            panic!("scripted panic on iteration {}", iteration);
        }
        if self.fail_on == Some(iteration) {
            return Err(LoopError::StepFailed(format!("scripted failure on iteration {}", iteration)));
        }

        let done = self.complete_after.is_some_and(|n| call >= n);
        Ok(IterationReport {
            story_attempted: Some(format!("S-{}", iteration)),
            story_completed: true,
            all_work_complete: done,
        })
    }
}

/// Backlog with a fixed number of incomplete stories
#[derive(Debug, Clone, Default)]
pub struct FixedBacklog {
    pub incomplete: u32,
    pub fail: bool,
}

impl FixedBacklog {
    pub fn new(incomplete: u32) -> Self {
        Self { incomplete, fail: false }
    }

    pub fn failing() -> Self {
        Self { incomplete: 0, fail: true }
    }
}

impl BacklogSource for FixedBacklog {
    fn compute_backlog(&self, _project: &Project) -> Result<Backlog> {
        if self.fail {
            return Err(LoopError::Backlog("scripted backlog failure".into()));
        }
        Ok(Backlog {
            incomplete_count: self.incomplete,
            ready_stories: (1..=self.incomplete.min(3))
                .map(|i| Story {
                    id: format!("S-{}", i),
                    title: format!("Story {}", i),
                })
                .collect(),
        })
    }
}

/// Memory store that also keeps every record it was asked to save
#[derive(Debug, Default)]
pub struct RecordingStore {
    inner: MemoryStatusStore,
    saves: Mutex<Vec<LoopStatus>>,
}

impl RecordingStore {
    pub fn saves(&self) -> Vec<LoopStatus> {
        self.saves.lock().unwrap().clone()
    }
}

impl StatusStore for RecordingStore {
    fn load(&self, project: &ProjectId) -> Result<LoopStatus> {
        self.inner.load(project)
    }

    fn save(&self, status: &LoopStatus) -> Result<()> {
        self.saves.lock().unwrap().push(status.clone());
        self.inner.save(status)
    }

    fn list(&self) -> Result<Vec<LoopStatus>> {
        self.inner.list()
    }
}
