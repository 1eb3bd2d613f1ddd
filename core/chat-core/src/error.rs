//! Error types for chat-core operations.

use std::path::PathBuf;

// ═══════════════════════════════════════════════════════════════════════════════
// Store Failures
// ═══════════════════════════════════════════════════════════════════════════════

/// Uniform failure signal from the store client.
///
/// Every variant means "the command did not take effect as far as we know".
/// Callers decide whether to retry; the store client never does.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{command}: transport failure: {details}")]
    Transport { command: String, details: String },

    #[error("{command}: store returned HTTP {status}: {body}")]
    Status {
        command: String,
        status: u16,
        body: String,
    },

    #[error("{command}: store rejected command: {message}")]
    Rejected { command: String, message: String },

    #[error("{command}: malformed reply: {details}")]
    Malformed { command: String, details: String },
}

impl StoreError {
    pub fn command(&self) -> &str {
        match self {
            StoreError::Transport { command, .. }
            | StoreError::Status { command, .. }
            | StoreError::Rejected { command, .. }
            | StoreError::Malformed { command, .. } => command,
        }
    }

    pub(crate) fn malformed(command: &str, details: impl Into<String>) -> Self {
        StoreError::Malformed {
            command: command.to_string(),
            details: details.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid username: {0}")]
    InvalidIdentity(String),

    #[error("No username has been chosen yet")]
    NoIdentity,

    #[error("Message rejected: {0}")]
    InvalidMessage(String),

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Missing configuration value: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ChatError {
    /// Transport-class failures are expected in normal operation and never
    /// fatal; everything else points at local misuse or bad data.
    pub fn is_transport(&self) -> bool {
        matches!(self, ChatError::Store(_))
    }
}

/// Convenience type alias for Results using ChatError.
pub type Result<T> = std::result::Result<T, ChatError>;

impl From<ChatError> for String {
    fn from(err: ChatError) -> String {
        err.to_string()
    }
}
