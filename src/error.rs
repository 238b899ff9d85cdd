//! Error types for the AT session

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type AtResult<T> = Result<T, AtError>;

/// Errors raised by the AT session, the event worker and its collaborators.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AtError {
    /// Transport read/write failure. Fatal to the session.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The reader task has stopped; no further responses will arrive.
    #[error("connection closed")]
    ConnectionClosed,

    /// A command was issued after the session was stopped.
    #[error("not connected")]
    NotConnected,

    /// No terminator line arrived within the deadline.
    #[error("AT command timeout after {timeout_ms}ms ({command:?})")]
    CommandTimeout {
        /// Command line that was sent.
        command: String,
        /// Deadline that expired.
        timeout_ms: u64,
    },

    /// The modem answered with a final error result instead of the terminator.
    #[error("AT command {command:?} failed: {reply}")]
    CommandFailed {
        /// Command line that was sent.
        command: String,
        /// `ERROR`, `+CME ERROR: …` or `+CMS ERROR: …`
        reply: String,
    },

    /// A command line that cannot be sent as a single line.
    #[error("invalid command: {message}")]
    InvalidCommand {
        /// What was wrong with it.
        message: String,
    },

    /// An unsolicited line that failed structural parsing.
    #[error("malformed notification: {message}")]
    MalformedNotification {
        /// Parse failure detail.
        message: String,
    },

    /// SMS PDU could not be encoded or decoded.
    #[error("PDU error: {0}")]
    Pdu(#[from] crate::pdu::PduError),

    /// Playlist line that is not a `key value` pair.
    #[error("playlist line {line}: {message}")]
    Playlist {
        /// 1-based line number.
        line: usize,
        /// Parse failure detail.
        message: String,
    },

    /// The audio player could not be started.
    #[error("failed to start audio player for {path}: {source}")]
    Audio {
        /// Resource the player was asked to play.
        path: PathBuf,
        /// Spawn error.
        #[source]
        source: std::io::Error,
    },
}

impl AtError {
    /// Create a malformed-notification error
    pub fn malformed(message: impl Into<String>) -> Self {
        AtError::MalformedNotification {
            message: message.into(),
        }
    }

    /// Create an invalid-command error
    pub fn invalid_command(message: impl Into<String>) -> Self {
        AtError::InvalidCommand {
            message: message.into(),
        }
    }

    /// `true` for errors after which the session cannot issue commands anymore.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AtError::Io(_) | AtError::ConnectionClosed | AtError::NotConnected
        )
    }
}
