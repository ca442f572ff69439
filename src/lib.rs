//! Speclooper - per-project build-loop controller
//!
//! Runs an agent against a project's backlog one iteration at a time, bounded
//! by an iteration budget sized from the remaining work. Loop status is
//! persisted so a restarted process can tell a live loop from a stale record.

pub mod agent;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod id;
pub mod limit;
pub mod liveness;
pub mod manager;
pub mod runner;
pub mod storage;

#[cfg(test)]
mod testing;

pub use error::{LoopError, Result};
