use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use ci_board_sync::board::AzureBoardsClient;
use ci_board_sync::channels::{ImapMailbox, Mailbox, spawn_sync_poller};
use ci_board_sync::config::AppConfig;
use ci_board_sync::pipeline::engine::SyncEngine;

/// Time allowed for the email in flight to finish after Ctrl-C: the board's
/// type and state lookups, the creation request and the IMAP store, each at
/// its own timeout.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(150);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("Invalid configuration")?;
    let _log_guard = init_tracing(config.log_file.as_deref());

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        imap = %config.email.imap_host,
        project = %config.board.project,
        "Starting CI mail to board sync"
    );
    tracing::info!(
        senders = %config.email.monitored_senders.join(", "),
        "Monitored senders"
    );
    for (outcome, target) in &config.rules.board.outcomes {
        tracing::info!(outcome = %outcome, state = %target.state, tags = ?target.tags, "Board mapping");
    }

    let board = Arc::new(AzureBoardsClient::new(config.board.clone())?);
    let mailbox: Arc<dyn Mailbox> = Arc::new(ImapMailbox::new(config.email.clone()));
    let engine = Arc::new(SyncEngine::from_config(
        &config.rules,
        board,
        Arc::clone(&mailbox),
    ));

    let poller = spawn_sync_poller(engine, mailbox, config.poll_interval);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested, finishing the email in flight");

    // Unprocessed emails stay unread and are picked up on the next start.
    if poller.shutdown(SHUTDOWN_GRACE).await {
        tracing::info!("Sync poller stopped");
    }

    Ok(())
}

/// Console logging plus an optional plain-text log file.
fn init_tracing(log_file: Option<&Path>) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let name = path.file_name().unwrap_or(OsStr::new("ci-board-sync.log"));
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}
