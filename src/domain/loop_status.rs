//! Persisted loop status
//!
//! `LoopStatus` is the durable, per-project projection of a build loop. It is
//! overwritten in place at start, at every iteration boundary and at
//! termination, and survives process restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ProjectId;
use crate::id::now_ms;

/// Persisted state of a project's loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    /// Nothing running; also the state after a budget runs out or a stop
    #[default]
    Idle,
    /// A loop claims to be iterating
    Running,
    /// The backlog was finished
    Completed,
    /// The step collaborator failed; a fresh start is required
    Error,
}

impl LoopState {
    /// States from which a new loop may be started
    pub fn can_start(&self) -> bool {
        !matches!(self, LoopState::Running)
    }
}

/// Durable status record, one per project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStatus {
    pub project_id: ProjectId,
    pub state: LoopState,
    pub max_iterations: u32,
    /// Number of iterations that have finished
    pub current_iteration: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub owner_process_id: Option<u32>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub updated_at: i64,
}

impl LoopStatus {
    /// The implicit status of a project that never ran a loop
    pub fn idle(project_id: ProjectId) -> Self {
        Self {
            project_id,
            state: LoopState::Idle,
            max_iterations: 0,
            current_iteration: 0,
            started_at: None,
            owner_process_id: None,
            last_error: None,
            updated_at: now_ms(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == LoopState::Running
    }

    /// Transition into `running` for a fresh loop owned by `owner_pid`
    pub fn begin(&mut self, max_iterations: u32, owner_pid: u32, started_at: DateTime<Utc>) {
        self.state = LoopState::Running;
        self.max_iterations = max_iterations;
        self.current_iteration = 0;
        self.started_at = Some(started_at);
        self.owner_process_id = Some(owner_pid);
        self.last_error = None;
        self.touch();
    }

    pub fn mark_idle(&mut self) {
        self.state = LoopState::Idle;
        self.touch();
    }

    pub fn mark_completed(&mut self) {
        self.state = LoopState::Completed;
        self.touch();
    }

    pub fn mark_error(&mut self, reason: impl Into<String>) {
        self.state = LoopState::Error;
        self.last_error = Some(reason.into());
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = now_ms();
    }
}
