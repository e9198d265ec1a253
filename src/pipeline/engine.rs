//! Synchronization engine: turns one notification email into at most one
//! work item.
//!
//! Flow per email:
//! 1. `SenderRegistry::resolve()`: unknown sender → skipped
//! 2. `EventClassifier::classify()` + `DetailExtractor::extract()`: unknown outcome → skipped
//! 3. `BoardStateMapper::map()` → board target
//! 4. `Board::create_work_item()`: exactly one attempt
//! 5. `Mailbox::mark_consumed()`: only after created or skipped
//!
//! **Delivery is at-least-once.** A creation fault leaves the email unread so
//! the next poll retries it; a duplicate work item is preferred over a lost
//! failure notification.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::board::{Board, NewWorkItem};
use crate::channels::mailbox::Mailbox;
use crate::config::RulesConfig;
use crate::error::SyncError;
use crate::pipeline::classifier::EventClassifier;
use crate::pipeline::extractor::DetailExtractor;
use crate::pipeline::mapper::BoardStateMapper;
use crate::pipeline::registry::SenderRegistry;
use crate::pipeline::types::{
    ClassifiedEvent, ExtractedDetails, Outcome, ProcessResult, RawEmail, WorkItemId,
    truncate_chars,
};

/// Subject bound for the `subject` template key.
const SUBJECT_MAX_CHARS: usize = 100;

/// Body bound for the `body` template key (board description limit).
const BODY_MAX_CHARS: usize = 4000;

/// Per-email orchestrator. Holds only read-only tables and collaborators.
pub struct SyncEngine {
    registry: SenderRegistry,
    classifier: EventClassifier,
    extractor: DetailExtractor,
    mapper: BoardStateMapper,
    board: Arc<dyn Board>,
    mailbox: Arc<dyn Mailbox>,
}

impl SyncEngine {
    pub fn new(
        registry: SenderRegistry,
        classifier: EventClassifier,
        extractor: DetailExtractor,
        mapper: BoardStateMapper,
        board: Arc<dyn Board>,
        mailbox: Arc<dyn Mailbox>,
    ) -> Self {
        Self {
            registry,
            classifier,
            extractor,
            mapper,
            board,
            mailbox,
        }
    }

    /// Build every component from one set of rule tables.
    ///
    /// Senders mapped to a source without a usable rule set are dropped, so
    /// they resolve as unknown.
    pub fn from_config(
        config: &RulesConfig,
        board: Arc<dyn Board>,
        mailbox: Arc<dyn Mailbox>,
    ) -> Self {
        let classifier = EventClassifier::from_config(config);
        let mut registry = SenderRegistry::from_config(config);
        registry.retain_sources(|source| {
            let usable = classifier.has_rules(source);
            if !usable {
                warn!(source = %source, "No usable rules for source, its senders are ignored");
            }
            usable
        });
        if registry.is_empty() {
            warn!("No usable sender mappings, every email will be skipped");
        }

        Self::new(
            registry,
            classifier,
            DetailExtractor::from_config(config),
            BoardStateMapper::from_config(config),
            board,
            mailbox,
        )
    }

    /// Process one email end to end. Never returns an error: every fault is
    /// captured in the `ProcessResult`.
    pub async fn process(&self, email: &RawEmail) -> ProcessResult {
        let result = self.sync(email).await;

        if result.is_terminal() {
            if let Err(e) = self.mailbox.mark_consumed(email).await {
                // Stays unread; the next cycle sees it again.
                warn!(
                    id = %email.id,
                    mailbox = self.mailbox.name(),
                    error = %e,
                    "Failed to mark email consumed"
                );
            }
        }

        debug!(id = %email.id, result = result.label(), "Email processed");
        result
    }

    /// Process emails in order. One email's failure never stops the rest.
    pub async fn process_batch(&self, emails: &[RawEmail]) -> Vec<ProcessResult> {
        let mut results = Vec::with_capacity(emails.len());
        for email in emails {
            results.push(self.process(email).await);
        }
        results
    }

    /// Move an existing work item to the state mapped for `outcome`.
    ///
    /// Items without the marker tag were not created by this service and
    /// are never touched.
    pub async fn transition(&self, id: &WorkItemId, outcome: Outcome) -> Result<(), SyncError> {
        let marker = self.mapper.marker_tag();
        let generated = self
            .board
            .has_marker_tag(id, marker)
            .await
            .map_err(SyncError::BoardTransitionFault)?;

        if !generated {
            let fault = SyncError::UnauthorizedTransition {
                id: id.to_string(),
                marker: marker.to_string(),
            };
            warn!(error = %fault, "Transition refused");
            return Err(fault);
        }

        let state = self.mapper.state_for(outcome);
        self.board
            .transition_work_item(id, state)
            .await
            .map_err(SyncError::BoardTransitionFault)
    }

    async fn sync(&self, email: &RawEmail) -> ProcessResult {
        let Some(source) = self.registry.resolve(&email.sender) else {
            return ProcessResult::Skipped {
                reason: SyncError::UnrecognizedSender {
                    sender: email.sender.clone(),
                },
            };
        };

        let event = self.classifier.classify(&source, &email.subject, &email.body);
        let mut details = self.extractor.extract(&source, &email.body);

        if event.outcome == Outcome::Unknown {
            return ProcessResult::Skipped {
                reason: SyncError::UnclassifiedContent {
                    source_system: source.to_string(),
                },
            };
        }

        add_email_context(&mut details, email, &event);
        let target = self.mapper.map(&event, &details);
        let item = NewWorkItem::new(event.work_item_type, target);

        match self.board.create_work_item(&item).await {
            Ok(id) => ProcessResult::Created { id },
            Err(e) => ProcessResult::Failed {
                error: SyncError::BoardCreationFault(e),
            },
        }
    }
}

/// Email-level keys available to field templates alongside extracted ones.
///
/// A key already set by an extraction template keeps the extracted value.
fn add_email_context(details: &mut ExtractedDetails, email: &RawEmail, event: &ClassifiedEvent) {
    let context = [
        ("subject", truncate_chars(email.subject.trim(), SUBJECT_MAX_CHARS)),
        ("sender", email.sender.trim().to_string()),
        ("source_system", event.source_system.to_string()),
        ("outcome", event.outcome.label().to_string()),
        ("received_at", email.received_at.to_rfc3339()),
        ("body", truncate_chars(email.body.trim(), BODY_MAX_CHARS)),
    ];
    for (key, value) in context {
        if details.contains_key(key) {
            debug!(key, "Extracted value shadows email context");
            continue;
        }
        details.insert(key, value);
    }
}
