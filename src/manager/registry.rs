//! Loop registry
//!
//! In-memory table of the loops this process is actively supervising, keyed by
//! project. It is the authority on whether a loop is really running right now;
//! the persisted status only says what some process once claimed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::domain::ProjectId;
use crate::error::{LoopError, Result};
use crate::id::generate_run_id;

/// Volatile handle for one supervised loop.
///
/// Clones share the same cancellation token and budget cell, so the copy held
/// by the loop task observes updates made through the registry.
#[derive(Debug, Clone)]
pub struct RunningLoopHandle {
    run_id: String,
    cancel: CancellationToken,
    // Held by `cancel` and `unless_cancelled` so the two never interleave.
    cancel_gate: Arc<Mutex<()>>,
    iteration_budget: Arc<AtomicU32>,
    started_at: Instant,
}

impl RunningLoopHandle {
    pub fn new(iteration_budget: u32) -> Self {
        Self {
            run_id: generate_run_id(),
            cancel: CancellationToken::new(),
            cancel_gate: Arc::new(Mutex::new(())),
            iteration_budget: Arc::new(AtomicU32::new(iteration_budget)),
            started_at: Instant::now(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Current ceiling on completed iterations
    pub fn iteration_budget(&self) -> u32 {
        self.iteration_budget.load(Ordering::SeqCst)
    }

    fn set_iteration_budget(&self, budget: u32) {
        self.iteration_budget.store(budget, Ordering::SeqCst);
    }

    fn cancel_gate(&self) -> MutexGuard<'_, ()> {
        self.cancel_gate.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Request that no further iterations start.
    ///
    /// Waits for a write admitted by `unless_cancelled` to finish, so anything
    /// the caller persists afterwards lands last.
    pub fn cancel(&self) {
        let _gate = self.cancel_gate();
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `write` only if the loop has not been cancelled.
    ///
    /// Returns `None` without running it once `cancel` has been called.
    pub fn unless_cancelled<R>(&self, write: impl FnOnce() -> R) -> Option<R> {
        let _gate = self.cancel_gate();
        if self.cancel.is_cancelled() {
            return None;
        }
        Some(write())
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Process-wide map from project to its running loop
#[derive(Debug, Default)]
pub struct LoopRegistry {
    loops: Mutex<HashMap<ProjectId, RunningLoopHandle>>,
}

impl LoopRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave the map half-updated, so a
    // poisoned lock is still safe to use.
    fn loops(&self) -> MutexGuard<'_, HashMap<ProjectId, RunningLoopHandle>> {
        self.loops.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a handle, failing if the project already has one
    pub fn register(&self, project: &ProjectId, handle: RunningLoopHandle) -> Result<()> {
        let mut loops = self.loops();
        if loops.contains_key(project) {
            return Err(LoopError::AlreadyRunning(project.clone()));
        }
        loops.insert(project.clone(), handle);
        Ok(())
    }

    pub fn get(&self, project: &ProjectId) -> Option<RunningLoopHandle> {
        self.loops().get(project).cloned()
    }

    pub fn is_running(&self, project: &ProjectId) -> bool {
        self.loops().contains_key(project)
    }

    /// Remove a project's entry; absent entries are not an error
    pub fn unregister(&self, project: &ProjectId) -> Option<RunningLoopHandle> {
        self.loops().remove(project)
    }

    /// Remove a project's entry only if it still belongs to `run_id`.
    ///
    /// Returns whether an entry was removed.
    pub fn unregister_run(&self, project: &ProjectId, run_id: &str) -> bool {
        let mut loops = self.loops();
        match loops.get(project) {
            Some(handle) if handle.run_id() == run_id => {
                loops.remove(project);
                true
            }
            _ => false,
        }
    }

    /// Whether `run_id` is the registered owner of the project's entry
    pub fn is_current_run(&self, project: &ProjectId, run_id: &str) -> bool {
        self.loops()
            .get(project)
            .is_some_and(|handle| handle.run_id() == run_id)
    }

    /// Replace the iteration budget of a running loop
    pub fn update_budget(&self, project: &ProjectId, budget: u32) -> Result<()> {
        let loops = self.loops();
        let handle = loops
            .get(project)
            .ok_or_else(|| LoopError::NotRunning(project.clone()))?;
        handle.set_iteration_budget(budget);
        Ok(())
    }

    pub fn running_projects(&self) -> Vec<ProjectId> {
        let mut ids: Vec<ProjectId> = self.loops().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.loops().len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(id: &str) -> ProjectId {
        ProjectId::new(id)
    }

    #[test]
    fn test_register_and_get() {
        let registry = LoopRegistry::new();
        let handle = RunningLoopHandle::new(12);
        let run_id = handle.run_id().to_string();

        registry.register(&pid("a"), handle).unwrap();

        let fetched = registry.get(&pid("a")).unwrap();
        assert_eq!(fetched.run_id(), run_id);
        assert_eq!(fetched.iteration_budget(), 12);
        assert!(registry.is_running(&pid("a")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_twice_fails() {
        let registry = LoopRegistry::new();
        registry.register(&pid("a"), RunningLoopHandle::new(1)).unwrap();

        let err = registry.register(&pid("a"), RunningLoopHandle::new(2)).unwrap_err();
        assert!(matches!(err, LoopError::AlreadyRunning(_)));
        assert_eq!(registry.get(&pid("a")).unwrap().iteration_budget(), 1);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = LoopRegistry::new();
        registry.register(&pid("a"), RunningLoopHandle::new(1)).unwrap();

        assert!(registry.unregister(&pid("a")).is_some());
        assert!(registry.unregister(&pid("a")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_run_ignores_other_runs() {
        let registry = LoopRegistry::new();
        let old = RunningLoopHandle::new(1);
        let old_id = old.run_id().to_string();
        registry.register(&pid("a"), old).unwrap();
        registry.unregister(&pid("a"));

        let new = RunningLoopHandle::new(1);
        let new_id = new.run_id().to_string();
        registry.register(&pid("a"), new).unwrap();

        assert!(!registry.unregister_run(&pid("a"), &old_id));
        assert!(registry.is_current_run(&pid("a"), &new_id));
        assert!(registry.unregister_run(&pid("a"), &new_id));
        assert!(!registry.is_running(&pid("a")));
    }

    #[test]
    fn test_update_budget_visible_through_clones() {
        let registry = LoopRegistry::new();
        let handle = RunningLoopHandle::new(12);
        let task_copy = handle.clone();
        registry.register(&pid("a"), handle).unwrap();

        registry.update_budget(&pid("a"), 20).unwrap();

        assert_eq!(task_copy.iteration_budget(), 20);
    }

    #[test]
    fn test_update_budget_not_running() {
        let registry = LoopRegistry::new();
        let err = registry.update_budget(&pid("ghost"), 5).unwrap_err();
        assert!(matches!(err, LoopError::NotRunning(_)));
        assert!(!registry.is_running(&pid("ghost")));
    }

    #[test]
    fn test_cancel_shared_between_clones() {
        let handle = RunningLoopHandle::new(3);
        let task_copy = handle.clone();
        assert!(!task_copy.is_cancelled());
        handle.cancel();
        assert!(task_copy.is_cancelled());
        assert!(task_copy.unless_cancelled(|| ()).is_none());
    }

    #[test]
    fn test_cancel_waits_for_admitted_write() {
        let handle = RunningLoopHandle::new(3);
        let canceller = handle.clone();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();

        let writer = {
            let order = order.clone();
            std::thread::spawn(move || {
                handle.unless_cancelled(|| {
                    entered_tx.send(()).unwrap();
                    std::thread::sleep(Duration::from_millis(50));
                    order.lock().unwrap().push("write");
                })
            })
        };

        entered_rx.recv().unwrap();
        canceller.cancel();
        order.lock().unwrap().push("cancel");

        assert!(writer.join().unwrap().is_some());
        assert_eq!(*order.lock().unwrap(), vec!["write", "cancel"]);
    }

    #[test]
    fn test_running_projects_sorted() {
        let registry = LoopRegistry::new();
        registry.register(&pid("b"), RunningLoopHandle::new(1)).unwrap();
        registry.register(&pid("a"), RunningLoopHandle::new(1)).unwrap();
        assert_eq!(registry.running_projects(), vec![pid("a"), pid("b")]);
    }

    #[test]
    fn test_concurrent_registration_single_winner() {
        let registry = Arc::new(LoopRegistry::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.register(&ProjectId::new("a"), RunningLoopHandle::new(1)).is_ok())
            })
            .collect();

        let winners = threads.into_iter().map(|t| t.join().unwrap()).filter(|ok| *ok).count();
        assert_eq!(winners, 1);
    }
}
