//! Mailbox abstraction: where CI notification emails are read from.

use async_trait::async_trait;

use crate::error::MailboxError;
use crate::pipeline::types::RawEmail;

/// Source of unread notification emails.
///
/// `mark_consumed` is only called after a terminal (created or skipped)
/// result; anything left unread is fetched again on the next poll.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Mailbox name for logging.
    fn name(&self) -> &str;

    /// Fetch unread emails without changing their read state.
    async fn fetch_unread(&self) -> Result<Vec<RawEmail>, MailboxError>;

    /// Mark an email as read so it is not fetched again.
    async fn mark_consumed(&self, email: &RawEmail) -> Result<(), MailboxError>;
}
