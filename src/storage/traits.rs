//! Status store trait definition.

use crate::domain::{LoopStatus, ProjectId};
use crate::error::Result;

/// Durable per-project persistence for `LoopStatus`.
///
/// Each project has exactly one record, overwritten in place. Implementations
/// must allow concurrent `load` calls while a `save` is in progress; readers
/// may observe the previous snapshot.
pub trait StatusStore: Send + Sync {
    /// Load a project's status, defaulting to idle if it was never saved.
    fn load(&self, project: &ProjectId) -> Result<LoopStatus>;

    /// Overwrite a project's status.
    fn save(&self, status: &LoopStatus) -> Result<()>;

    /// All saved statuses.
    fn list(&self) -> Result<Vec<LoopStatus>>;
}
