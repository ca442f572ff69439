//! Domain types for speclooper
//!
//! - ProjectId / Project: what a loop runs for
//! - LoopStatus: the persisted per-project record
//! - Backlog: remaining work as seen by the controller
//! - IterationReport / LoopOutcome: results of one iteration and of a whole loop
//! - LoopEvent: lifecycle notifications published by the controller

pub mod backlog;
pub mod event;
pub mod loop_status;
pub mod outcome;
pub mod project;

pub use backlog::{Backlog, Story};
pub use event::LoopEvent;
pub use loop_status::{LoopState, LoopStatus};
pub use outcome::{IterationReport, LoopOutcome};
pub use project::{Project, ProjectId};
