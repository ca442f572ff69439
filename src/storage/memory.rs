//! In-memory status store.

use std::collections::HashMap;
use std::sync::RwLock;

use super::traits::StatusStore;
use crate::domain::{LoopStatus, ProjectId};
use crate::error::{LoopError, Result};

/// Status store that lives only as long as the process
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    records: RwLock<HashMap<ProjectId, LoopStatus>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusStore for MemoryStatusStore {
    fn load(&self, project: &ProjectId) -> Result<LoopStatus> {
        let records = self.records.read().map_err(|e| LoopError::Storage(e.to_string()))?;
        Ok(records
            .get(project)
            .cloned()
            .unwrap_or_else(|| LoopStatus::idle(project.clone())))
    }

    fn save(&self, status: &LoopStatus) -> Result<()> {
        let mut records = self.records.write().map_err(|e| LoopError::Storage(e.to_string()))?;
        records.insert(status.project_id.clone(), status.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<LoopStatus>> {
        let records = self.records.read().map_err(|e| LoopError::Storage(e.to_string()))?;
        let mut all: Vec<LoopStatus> = records.values().cloned().collect();
        all.sort_by(|a, b| a.project_id.cmp(&b.project_id));
        Ok(all)
    }
}
