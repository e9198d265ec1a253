//! Error types for the CI mail → board sync service.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mailbox transport errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MailboxError {
    #[error("Failed to connect to {host}: {reason}")]
    Connection { host: String, reason: String },

    #[error("Authentication failed for {user}")]
    AuthFailed { user: String },

    #[error("IMAP command {command} failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Mailbox task failed: {0}")]
    Task(String),
}

/// Board (work-item tracker) errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BoardError {
    #[error("Board request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Board rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid response from board: {reason}")]
    InvalidResponse { reason: String },

    #[error("Invalid board configuration: {0}")]
    InvalidConfig(String),
}

/// Per-email synchronization faults.
///
/// None of these are fatal to the poll loop; they are captured in a
/// `ProcessResult` and reported to the caller. `UnrecognizedSender` and
/// `UnclassifiedContent` are skip reasons: the email is consumed without a
/// board mutation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    #[error("Sender {sender} is not a recognized CI source")]
    UnrecognizedSender { sender: String },

    #[error("No classification rule matched for source {source_system}")]
    UnclassifiedContent { source_system: String },

    #[error("Work item creation failed: {0}")]
    BoardCreationFault(BoardError),

    #[error("Work item transition failed: {0}")]
    BoardTransitionFault(BoardError),

    #[error("Refusing to transition work item {id}: marker tag {marker} not present")]
    UnauthorizedTransition { id: String, marker: String },

    #[error("Malformed template for {field}: {reason}")]
    MalformedTemplate { field: String, reason: String },
}
