//! Loop management
//!
//! Registry of supervised loops, the status reconciler and the controller
//! that ties them to the runner.

mod controller;
mod reconciler;
mod registry;

pub use controller::{LoopController, LoopControllerConfig, StartOptions, StartResponse, StatusView, StopResponse};
pub use reconciler::{Reconciliation, StaleReason, StatusReconciler};
pub use registry::{LoopRegistry, RunningLoopHandle};
