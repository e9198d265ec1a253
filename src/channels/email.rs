//! IMAP mailbox: reads CI notifications over TLS, marks them `\Seen` on demand.
//!
//! Fetching uses `BODY.PEEK[]` so the read flag is only ever set by
//! `mark_consumed`. Messages are addressed by UID so a handle stays valid
//! when a stale session has to be replaced between fetch and mark.

use std::collections::BTreeSet;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::channels::mailbox::Mailbox;
use crate::config::{env_parse, env_required, split_list};
use crate::error::{ConfigError, MailboxError};
use crate::pipeline::types::RawEmail;

/// Socket read timeout for IMAP sessions.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

// ── Configuration ───────────────────────────────────────────────────

/// IMAP mailbox configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub username: String,
    pub password: SecretString,
    pub folder: String,
    /// Senders searched for; empty means every unseen message.
    pub monitored_senders: Vec<String>,
}

impl EmailConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let imap_host =
            std::env::var("IMAP_SERVER").unwrap_or_else(|_| "imap.gmail.com".to_string());
        let imap_port: u16 = env_parse("IMAP_PORT", 993)?;
        let username = env_required("IMAP_USER")?;
        let password = SecretString::from(env_required("IMAP_PASS")?);
        let folder = std::env::var("IMAP_FOLDER").unwrap_or_else(|_| "INBOX".to_string());

        let monitored_senders = split_list(
            &std::env::var("MONITORED_SENDERS")
                .unwrap_or_else(|_| "azuredevops@microsoft.com".to_string()),
        );

        Ok(Self {
            imap_host,
            imap_port,
            username,
            password,
            folder,
            monitored_senders,
        })
    }
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// IMAP-backed mailbox.
///
/// `fetch_unread` opens one session per poll cycle; the `mark_consumed`
/// calls that follow reuse it.
pub struct ImapMailbox {
    config: EmailConfig,
    session: Arc<SessionSlot<ImapSession>>,
}

impl ImapMailbox {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config,
            session: Arc::new(SessionSlot::default()),
        }
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    fn name(&self) -> &str {
        "imap"
    }

    async fn fetch_unread(&self) -> Result<Vec<RawEmail>, MailboxError> {
        let cfg = self.config.clone();
        let slot = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            if let Some(previous) = slot.take() {
                previous.logout();
            }
            slot.run(|| ImapSession::open(&cfg), |session| fetch_unseen(session, &cfg))
        })
        .await
        .map_err(|e| MailboxError::Task(e.to_string()))?
    }

    async fn mark_consumed(&self, email: &RawEmail) -> Result<(), MailboxError> {
        let uid = parse_uid(&email.id)?;
        let cfg = self.config.clone();
        let slot = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            slot.run(|| ImapSession::open(&cfg), |session| store_seen(session, &[uid]))
        })
        .await
        .map_err(|e| MailboxError::Task(e.to_string()))?
    }
}

/// Holds at most one open session between calls.
struct SessionSlot<S> {
    slot: Mutex<Option<S>>,
}

impl<S> Default for SessionSlot<S> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl<S> SessionSlot<S> {
    fn take(&self) -> Option<S> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn put(&self, session: S) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    /// Run `op` on the held session, or on a new one from `open`.
    ///
    /// A held session that fails is dropped and `op` runs once more on a new
    /// session. A session is only kept after `op` succeeded on it.
    fn run<T>(
        &self,
        open: impl Fn() -> Result<S, MailboxError>,
        mut op: impl FnMut(&mut S) -> Result<T, MailboxError>,
    ) -> Result<T, MailboxError> {
        if let Some(mut held) = self.take() {
            match op(&mut held) {
                Ok(value) => {
                    self.put(held);
                    return Ok(value);
                }
                Err(e) => debug!(error = %e, "IMAP session went stale, reconnecting"),
            }
        }

        let mut session = open()?;
        let value = op(&mut session)?;
        self.put(session);
        Ok(value)
    }
}

// ── IMAP session ────────────────────────────────────────────────────

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Untagged lines and literals collected for one tagged command.
#[derive(Debug, Default)]
struct Response {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
}

/// Minimal blocking IMAP4rev1 client over rustls.
struct ImapSession {
    stream: BufReader<TlsStream>,
    next_tag: u32,
    host: String,
}

impl ImapSession {
    fn open(config: &EmailConfig) -> Result<Self, MailboxError> {
        let connection_error = |reason: String| MailboxError::Connection {
            host: config.imap_host.clone(),
            reason,
        };

        let tcp = TcpStream::connect((config.imap_host.as_str(), config.imap_port))
            .map_err(|e| connection_error(e.to_string()))?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))
            .map_err(|e| connection_error(e.to_string()))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls::pki_types::ServerName::try_from(config.imap_host.clone())
            .map_err(|e| connection_error(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| connection_error(e.to_string()))?;

        let mut session = Self {
            stream: BufReader::new(rustls::StreamOwned::new(conn, tcp)),
            next_tag: 1,
            host: config.imap_host.clone(),
        };

        let greeting = session.read_line()?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(connection_error(format!("unexpected greeting: {}", greeting.trim())));
        }

        session
            .command(&format!(
                "LOGIN {} {}",
                quote(&config.username),
                quote(config.password.expose_secret())
            ))
            .map_err(|_| MailboxError::AuthFailed {
                user: config.username.clone(),
            })?;
        session.command(&format!("SELECT {}", quote(&config.folder)))?;

        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        let read = self
            .stream
            .read_until(b'\n', &mut buf)
            .map_err(|e| self.io_error(e))?;
        if read == 0 {
            return Err(MailboxError::Connection {
                host: self.host.clone(),
                reason: "IMAP connection closed".into(),
            });
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Send one tagged command and collect everything up to its tagged status.
    fn command(&mut self, cmd: &str) -> Result<Response, MailboxError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let full = format!("{tag} {cmd}\r\n");
        let stream = self.stream.get_mut();
        let written = stream.write_all(full.as_bytes()).and_then(|()| stream.flush());
        written.map_err(|e| self.io_error(e))?;

        let verb = cmd.split_whitespace().next().unwrap_or_default().to_string();
        let mut response = Response::default();
        loop {
            let line = self.read_line()?;
            if let Some(status) = line.strip_prefix(&format!("{tag} ")) {
                if status.starts_with("OK") {
                    return Ok(response);
                }
                return Err(MailboxError::Command {
                    command: verb,
                    reason: status.trim().to_string(),
                });
            }

            if let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.stream
                    .read_exact(&mut literal)
                    .map_err(|e| self.io_error(e))?;
                response.literals.push(literal);
            }
            response.lines.push(line);
        }
    }

    fn logout(mut self) {
        let _ = self.command("LOGOUT");
    }

    fn io_error(&self, e: std::io::Error) -> MailboxError {
        MailboxError::Connection {
            host: self.host.clone(),
            reason: e.to_string(),
        }
    }
}

/// Fetch unseen messages from the monitored senders without marking them read.
///
/// Messages that cannot be parsed are marked seen right away; they would
/// otherwise be downloaded again every cycle.
fn fetch_unseen(session: &mut ImapSession, config: &EmailConfig) -> Result<Vec<RawEmail>, MailboxError> {
    let criteria: Vec<String> = if config.monitored_senders.is_empty() {
        vec!["UNSEEN".to_string()]
    } else {
        config
            .monitored_senders
            .iter()
            .map(|sender| format!("UNSEEN FROM {}", quote(sender)))
            .collect()
    };

    let mut uids = BTreeSet::new();
    for criterion in &criteria {
        let response = session.command(&format!("UID SEARCH {criterion}"))?;
        uids.extend(parse_search_uids(&response.lines));
    }
    debug!(count = uids.len(), "Unseen messages found");

    let mut fetched = Vec::with_capacity(uids.len());
    for uid in uids {
        let response = session.command(&format!("UID FETCH {uid} BODY.PEEK[]"))?;
        fetched.push((uid, response.literals.into_iter().next()));
    }

    let (emails, unparseable) = parse_fetched(fetched);
    if !unparseable.is_empty() {
        warn!(uids = ?unparseable, "Marking unparseable messages seen");
        store_seen(session, &unparseable)?;
    }
    Ok(emails)
}

/// Set `\Seen` on messages by UID.
fn store_seen(session: &mut ImapSession, uids: &[u32]) -> Result<(), MailboxError> {
    if let Some(command) = store_seen_command(uids) {
        session.command(&command)?;
    }
    Ok(())
}

// ── Helpers (public for testing) ────────────────────────────────────

/// Quote an IMAP string argument.
pub fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Byte length of a literal announced at the end of a line (`... {123}\r\n`).
pub fn literal_len(line: &str) -> Option<usize> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let inner = trimmed.strip_suffix('}')?;
    let start = inner.rfind('{')?;
    inner[start + 1..].parse().ok()
}

/// UIDs from `* SEARCH` untagged responses.
pub fn parse_search_uids(lines: &[String]) -> Vec<u32> {
    lines
        .iter()
        .filter_map(|line| line.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().filter_map(|s| s.parse().ok()))
        .collect()
}

/// UID from a `RawEmail` id. Only plain decimal UIDs are accepted.
pub fn parse_uid(id: &str) -> Result<u32, MailboxError> {
    let invalid = || MailboxError::Command {
        command: "UID STORE".into(),
        reason: format!("invalid UID {id:?}"),
    };
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    id.parse().map_err(|_| invalid())
}

/// One `UID STORE` for a batch of messages, or `None` for an empty batch.
pub fn store_seen_command(uids: &[u32]) -> Option<String> {
    if uids.is_empty() {
        return None;
    }
    let set = uids.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
    Some(format!("UID STORE {set} +FLAGS.SILENT (\\Seen)"))
}

/// Split fetched messages into parsed emails and UIDs that yielded nothing usable.
pub fn parse_fetched(
    fetched: impl IntoIterator<Item = (u32, Option<Vec<u8>>)>,
) -> (Vec<RawEmail>, Vec<u32>) {
    let mut emails = Vec::new();
    let mut unparseable = Vec::new();
    for (uid, raw) in fetched {
        match raw.and_then(|raw| parse_email(&uid.to_string(), &raw)) {
            Some(email) => emails.push(email),
            None => unparseable.push(uid),
        }
    }
    (emails, unparseable)
}

/// Parse an RFC 822 message into a `RawEmail`.
pub fn parse_email(uid: &str, raw: &[u8]) -> Option<RawEmail> {
    let parsed = MessageParser::default().parse(raw)?;

    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .unwrap_or_default()
        .to_string();
    let subject = parsed.subject().unwrap_or_default().to_string();
    let body = extract_text(&parsed);
    let received_at = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);

    Some(RawEmail {
        id: uid.to_string(),
        sender,
        subject,
        body,
        received_at,
    })
}

/// Plain-text body, or stripped HTML when only HTML is present.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Tests ───────────────────────────────────────────────────────────
