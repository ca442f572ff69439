//! Loop runner module - drives one project's iterations.
//!
//! - `IterationStep` / `BacklogSource`: the collaborator traits
//! - `LoopRunner`: the per-project task that checks cancellation and budget at
//!   every boundary, runs the step, and records progress

mod loop_runner;
mod step;

pub use loop_runner::LoopRunner;
pub use step::{BacklogSource, IterationStep};
