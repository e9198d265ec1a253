//! Shared types for the sync pipeline.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

// ── Inbound email ───────────────────────────────────────────────────

/// A notification email as fetched from the mailbox.
///
/// Immutable once fetched. Owned by the poll loop for one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEmail {
    /// Mailbox-native handle (IMAP UID), used only to mark the email consumed.
    pub id: String,
    /// Sender address as reported by the mailbox.
    pub sender: String,
    /// Decoded subject line (may be empty).
    pub subject: String,
    /// Plain-text body (may be empty).
    pub body: String,
    /// When the email was received.
    pub received_at: DateTime<Utc>,
}

// ── Classification ──────────────────────────────────────────────────

/// Named CI system a sender belongs to (e.g. `azure-pipelines`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceSystem(String);

impl SourceSystem {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome category reported by a CI notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Warning,
    Unknown,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Warning => "warning",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Kind of work item created on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkItemType {
    Task,
    Issue,
}

impl WorkItemType {
    /// Fixed outcome → type table. Failures and warnings need attention.
    pub fn for_outcome(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Failure | Outcome::Warning => Self::Issue,
            Outcome::Success | Outcome::Unknown => Self::Task,
        }
    }

    /// Work item type name as the board knows it.
    pub fn board_name(&self) -> &'static str {
        match self {
            Self::Task => "Task",
            Self::Issue => "Issue",
        }
    }
}

/// Result of classifying one email. Recomputed per email, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedEvent {
    pub source_system: SourceSystem,
    pub outcome: Outcome,
    pub work_item_type: WorkItemType,
}

// ── Extraction ──────────────────────────────────────────────────────

/// Named fields pulled out of an email body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedDetails(BTreeMap<String, String>);

impl ExtractedDetails {
    /// Key holding the bounded body prefix when no template matched.
    pub const SUMMARY: &'static str = "summary";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ── Board target ────────────────────────────────────────────────────

/// Board column/state, tags and field values derived for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardTarget {
    pub state: String,
    pub tags: BTreeSet<String>,
    pub fields: BTreeMap<String, String>,
}

/// Opaque identifier assigned by the board on creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemId(String);

impl WorkItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Process result ──────────────────────────────────────────────────

/// Outcome of processing one email.
#[derive(Debug, Clone)]
pub enum ProcessResult {
    /// A work item was created; the email was marked consumed.
    Created { id: WorkItemId },
    /// No board mutation; the email was marked consumed. The reason is
    /// `UnrecognizedSender` or `UnclassifiedContent`.
    Skipped { reason: SyncError },
    /// Creation failed; the email stays unread and is retried next cycle.
    Failed { error: SyncError },
}

impl ProcessResult {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
        }
    }

    /// Terminal results are the ones that allow the email to be consumed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// Truncate to at most `max` characters, appending `...` when cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}
