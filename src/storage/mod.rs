//! Storage layer for speclooper - durable per-project loop status.
//!
//! `StatusStore` is the persistence seam; `JsonlStatusStore` keeps statuses in a
//! single JSONL file under the data directory, shared safely between
//! processes, and `MemoryStatusStore` keeps them in process memory.

mod jsonl;
mod memory;
mod traits;

pub use jsonl::JsonlStatusStore;
pub use memory::MemoryStatusStore;
pub use traits::StatusStore;
