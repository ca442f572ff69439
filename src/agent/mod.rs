//! Agent-driven iterations
//!
//! The production `IterationStep` and `BacklogSource`: a JSON backlog file in
//! the project root and an external agent command run once per iteration.

mod backlog;
mod step;
mod stream;

pub use backlog::{BacklogEntry, BacklogFile, JsonBacklog};
pub use step::AgentStep;
pub use stream::{StreamOutput, StreamParser, tool_detail};
