//! Backlog summary consumed by the loop controller.

use serde::{Deserialize, Serialize};

/// A unit of backlog work the agent can pick up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub title: String,
}

/// Remaining work for a project at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backlog {
    /// Stories not yet passing
    pub incomplete_count: u32,
    /// Incomplete stories whose dependencies all pass, in backlog order
    pub ready_stories: Vec<Story>,
}

impl Backlog {
    pub fn is_done(&self) -> bool {
        self.incomplete_count == 0
    }

    /// The story the next iteration should work on
    pub fn next_story(&self) -> Option<&Story> {
        self.ready_stories.first()
    }
}
