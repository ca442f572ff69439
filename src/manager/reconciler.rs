//! Status reconciliation
//!
//! A crash or restart can leave a `running` record behind with nothing driving
//! it. Every status read goes through `StatusReconciler::reconcile`, which
//! cross-checks the record against the registry, this process's start time and
//! the owning process, and rewrites it to `idle` when it is provably stale.
//!
//! Several processes can share one status store, so a record owned by another
//! process is only touched once that process is gone. Records owned by this
//! process are checked cheapest and most authoritative first:
//! 1. No registry entry in this process
//! 2. `started_at` earlier than this process's start
//! 3. Owning process no longer alive

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{LoopStatus, ProjectId};
use crate::error::Result;
use crate::liveness::LivenessProbe;
use crate::manager::LoopRegistry;
use crate::storage::StatusStore;

/// Why a `running` record was judged stale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// Nothing in this process is supervising the loop
    NotSupervised,
    /// Written by an earlier server process
    PredatesProcessStart,
    /// The process that wrote it has exited
    OwnerDead,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StaleReason::NotSupervised => "not supervised by this process",
            StaleReason::PredatesProcessStart => "started before this process",
            StaleReason::OwnerDead => "owning process is gone",
        };
        f.write_str(s)
    }
}

/// Result of reconciling one project's status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub status: LoopStatus,
    /// Set when a stale `running` record was reset to idle
    pub healed: Option<StaleReason>,
}

/// Self-heals stale `running` records on the read path
pub struct StatusReconciler<S: StatusStore> {
    store: Arc<S>,
    registry: Arc<LoopRegistry>,
    probe: Arc<dyn LivenessProbe>,
    process_started_at: DateTime<Utc>,
    owner_pid: u32,
}

impl<S: StatusStore> StatusReconciler<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<LoopRegistry>,
        probe: Arc<dyn LivenessProbe>,
        process_started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            store,
            registry,
            probe,
            process_started_at,
            owner_pid: std::process::id(),
        }
    }

    /// PID this reconciler treats as its own when judging ownership
    pub fn with_owner_pid(mut self, owner_pid: u32) -> Self {
        self.owner_pid = owner_pid;
        self
    }

    pub fn owner_pid(&self) -> u32 {
        self.owner_pid
    }

    pub fn process_started_at(&self) -> DateTime<Utc> {
        self.process_started_at
    }

    /// Decide whether a record is stale without touching anything.
    pub fn diagnose(&self, status: &LoopStatus, supervised: bool) -> Option<StaleReason> {
        if !status.is_running() {
            return None;
        }
        if let Some(pid) = status.owner_process_id
            && pid != self.owner_pid
        {
            // Another process's registry is out of reach; only its exit counts.
            return (!self.probe.is_alive(pid)).then_some(StaleReason::OwnerDead);
        }
        if !supervised {
            return Some(StaleReason::NotSupervised);
        }
        if status.started_at.is_some_and(|t| t < self.process_started_at) {
            return Some(StaleReason::PredatesProcessStart);
        }
        if status.owner_process_id.is_some_and(|pid| !self.probe.is_alive(pid)) {
            return Some(StaleReason::OwnerDead);
        }
        None
    }

    /// Load a project's status, healing it first if it is stale.
    pub fn reconcile(&self, project: &ProjectId) -> Result<Reconciliation> {
        // Sample the registry before loading: a runner persists its final
        // state before it unregisters, so an absent entry here means any
        // final write is already visible to the load below.
        let supervised = self.registry.is_running(project);
        let mut status = self.store.load(project)?;

        let Some(reason) = self.diagnose(&status, supervised) else {
            return Ok(Reconciliation { status, healed: None });
        };

        if reason != StaleReason::NotSupervised {
            if let Some(handle) = self.registry.unregister(project) {
                handle.cancel();
            }
        } else if self.registry.is_running(project) {
            // A loop registered since the sample above; its record is live.
            return Ok(Reconciliation {
                status: self.store.load(project)?,
                healed: None,
            });
        }

        tracing::warn!(
            project = %project,
            reason = %reason,
            iteration = status.current_iteration,
            owner_pid = ?status.owner_process_id,
            "Stale running status detected; resetting to idle"
        );
        status.mark_idle();
        self.store.save(&status)?;

        Ok(Reconciliation {
            status,
            healed: Some(reason),
        })
    }

    /// Reconcile every stored `running` record, returning those healed.
    pub fn reconcile_all(&self) -> Result<Vec<(ProjectId, StaleReason)>> {
        let running: Vec<ProjectId> = self
            .store
            .list()?
            .into_iter()
            .filter(LoopStatus::is_running)
            .map(|s| s.project_id)
            .collect();

        let mut healed = Vec::new();
        for project in running {
            if let Some(reason) = self.reconcile(&project)?.healed {
                healed.push((project, reason));
            }
        }
        if !healed.is_empty() {
            log::info!("Reset {} stale running loop(s) to idle", healed.len());
        }
        Ok(healed)
    }
}
