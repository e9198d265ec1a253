//! Poll loop: fetches unread notifications and feeds them to the engine.
//!
//! Each cycle:
//! 1. `Mailbox::fetch_unread()`
//! 2. `SyncEngine::process()` for every email, one at a time
//! 3. Log a per-cycle summary
//!
//! The shutdown flag is checked between emails, never inside one, so an
//! email whose work item was created is always marked consumed before the
//! loop stops. Anything not yet processed is picked up by the next run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::channels::mailbox::Mailbox;
use crate::pipeline::engine::SyncEngine;
use crate::pipeline::types::ProcessResult;

/// Counts for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub fetched: usize,
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Handle to a running poller.
pub struct SyncPoller {
    handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl SyncPoller {
    /// Ask the loop to stop after the email in flight. Wakes an idle loop.
    fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Request shutdown and wait up to `grace` for the loop to finish.
    ///
    /// Returns `false` when the loop did not stop in time and was aborted.
    pub async fn shutdown(mut self, grace: Duration) -> bool {
        self.request_shutdown();

        match tokio::time::timeout(grace, &mut self.handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("Sync poller task failed: {e}");
                true
            }
            Err(_) => {
                warn!(
                    grace_secs = grace.as_secs(),
                    "Sync poller did not stop in time, aborting"
                );
                self.handle.abort();
                let _ = self.handle.await;
                false
            }
        }
    }
}

/// Spawn a background task that polls the mailbox every `interval`.
pub fn spawn_sync_poller(
    engine: Arc<SyncEngine>,
    mailbox: Arc<dyn Mailbox>,
    interval: Duration,
) -> SyncPoller {
    let shutdown = Arc::new(AtomicBool::new(false));
    let wake = Arc::new(Notify::new());
    let shutdown_flag = Arc::clone(&shutdown);
    let wake_signal = Arc::clone(&wake);

    let handle = tokio::spawn(async move {
        info!(
            mailbox = mailbox.name(),
            interval_secs = interval.as_secs(),
            "Sync poller started"
        );

        let mut tick = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = wake.notified() => {}
            }

            if shutdown.load(Ordering::SeqCst) {
                info!("Sync poller shutting down");
                return;
            }

            let span = info_span!("poll_cycle", cycle = %Uuid::new_v4());
            poll_once(&engine, mailbox.as_ref(), &shutdown)
                .instrument(span)
                .await;
        }
    });

    SyncPoller {
        handle,
        shutdown: shutdown_flag,
        wake: wake_signal,
    }
}

/// Run a single poll cycle: fetch unread → process each → summarize.
pub async fn poll_once(
    engine: &SyncEngine,
    mailbox: &dyn Mailbox,
    shutdown: &AtomicBool,
) -> PollSummary {
    let emails = match mailbox.fetch_unread().await {
        Ok(emails) => emails,
        Err(e) => {
            error!("Mailbox fetch failed: {e}");
            return PollSummary::default();
        }
    };

    let mut summary = PollSummary {
        fetched: emails.len(),
        ..PollSummary::default()
    };

    if emails.is_empty() {
        debug!("No unread notifications");
        return summary;
    }

    info!(count = emails.len(), "Processing unread notifications");

    for email in &emails {
        if shutdown.load(Ordering::SeqCst) {
            info!("Shutdown requested, leaving remaining emails for the next run");
            break;
        }

        match engine.process(email).await {
            ProcessResult::Created { id } => {
                summary.created += 1;
                info!(
                    id = %id,
                    sender = %email.sender,
                    subject = %email.subject,
                    "Work item created"
                );
            }
            ProcessResult::Skipped { reason } => {
                summary.skipped += 1;
                info!(
                    sender = %email.sender,
                    subject = %email.subject,
                    reason = %reason,
                    "Email needs no board action"
                );
            }
            ProcessResult::Failed { error } => {
                summary.failed += 1;
                warn!(
                    sender = %email.sender,
                    subject = %email.subject,
                    error = %error,
                    "Email left unread, will retry next cycle"
                );
            }
        }
    }

    info!(
        created = summary.created,
        skipped = summary.skipped,
        failed = summary.failed,
        "Poll cycle complete"
    );
    summary
}
