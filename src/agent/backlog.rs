//! JSON backlog file
//!
//! Projects track their stories in a file like:
//!
//! ```json
//! { "stories": [{ "id": "S-1", "title": "...", "passes": false, "depends_on": [] }] }
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{Backlog, Project, Story};
use crate::error::{LoopError, Result};
use crate::runner::BacklogSource;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogEntry {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub passes: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogFile {
    #[serde(default)]
    pub stories: Vec<BacklogEntry>,
}

impl BacklogFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| LoopError::Backlog(format!("cannot read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content).map_err(|e| LoopError::Backlog(format!("invalid {}: {}", path.display(), e)))
    }

    /// Summarize into incomplete count and stories whose dependencies pass.
    ///
    /// Unknown dependency ids count as not passing.
    pub fn summarize(&self) -> Backlog {
        let passing: HashSet<&str> = self
            .stories
            .iter()
            .filter(|s| s.passes)
            .map(|s| s.id.as_str())
            .collect();

        let incomplete: Vec<&BacklogEntry> = self.stories.iter().filter(|s| !s.passes).collect();
        let ready_stories = incomplete
            .iter()
            .filter(|s| s.depends_on.iter().all(|dep| passing.contains(dep.as_str())))
            .map(|s| Story {
                id: s.id.clone(),
                title: s.title.clone(),
            })
            .collect();

        Backlog {
            incomplete_count: u32::try_from(incomplete.len()).unwrap_or(u32::MAX),
            ready_stories,
        }
    }
}

/// Reads `<project root>/<file>` on every call
#[derive(Debug, Clone)]
pub struct JsonBacklog {
    file: PathBuf,
}

impl JsonBacklog {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self { file: file.into() }
    }

    pub fn path_for(&self, project: &Project) -> PathBuf {
        project.root.join(&self.file)
    }
}

impl BacklogSource for JsonBacklog {
    fn compute_backlog(&self, project: &Project) -> Result<Backlog> {
        let backlog = BacklogFile::load(&self.path_for(project))?.summarize();
        log::debug!(
            "Backlog for {}: {} incomplete, {} ready",
            project.id,
            backlog.incomplete_count,
            backlog.ready_stories.len()
        );
        Ok(backlog)
    }
}
