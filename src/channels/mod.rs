//! Mailbox abstraction and the IMAP-backed poll loop.

pub mod email;
pub mod email_poller;
pub mod mailbox;

pub use email::{EmailConfig, ImapMailbox};
pub use email_poller::{PollSummary, SyncPoller, poll_once, spawn_sync_poller};
pub use mailbox::Mailbox;
