//! Board abstraction: the project-tracking system work items land on.

pub mod azure;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use crate::error::BoardError;
use crate::pipeline::types::{BoardTarget, WorkItemId, WorkItemType};

pub use azure::{AzureBoardsClient, BoardConfig};

/// Creation request for a new work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWorkItem {
    pub work_item_type: WorkItemType,
    pub state: String,
    pub tags: BTreeSet<String>,
    pub fields: BTreeMap<String, String>,
}

impl NewWorkItem {
    pub fn new(work_item_type: WorkItemType, target: BoardTarget) -> Self {
        Self {
            work_item_type,
            state: target.state,
            tags: target.tags,
            fields: target.fields,
        }
    }
}

/// Operations the sync engine needs from a board.
///
/// Implementations own authentication, timeouts and transport retries; the
/// engine treats each call as one atomic result.
#[async_trait]
pub trait Board: Send + Sync {
    /// Board name for logging.
    fn name(&self) -> &str;

    /// Create a work item and return its id.
    async fn create_work_item(&self, item: &NewWorkItem) -> Result<WorkItemId, BoardError>;

    /// Move an existing work item to a new state.
    async fn transition_work_item(&self, id: &WorkItemId, state: &str) -> Result<(), BoardError>;

    /// Whether the work item carries the given tag.
    async fn has_marker_tag(&self, id: &WorkItemId, marker: &str) -> Result<bool, BoardError>;
}

/// Whether a `;`-separated tag list carries `tag`.
///
/// Boards normalize tag case, so the comparison ignores it.
pub fn tag_list_contains(tags: &str, tag: &str) -> bool {
    let wanted = tag.trim();
    !wanted.is_empty()
        && tags
            .split(';')
            .any(|candidate| candidate.trim().eq_ignore_ascii_case(wanted))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_list_match_ignores_case_and_spacing() {
        assert!(tag_list_contains("Failure; auto-generated", "Auto-Generated"));
        assert!(tag_list_contains("Auto-Generated", "Auto-Generated"));
        assert!(!tag_list_contains("Failure; Manual", "Auto-Generated"));
        assert!(!tag_list_contains("Auto-Generated-Old", "Auto-Generated"));
        assert!(!tag_list_contains("", "Auto-Generated"));
        assert!(!tag_list_contains("; ;", ""));
    }
}
