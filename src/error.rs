//! Error types for stream-bridge.
//!
//! Errors are split into three categories:
//! - **Control errors** ([`BridgeError`]): returned from every control-plane
//!   call (start an input, add an output, drive the player)
//! - **Delivery errors** ([`OutputError`]): raised by a single output while
//!   streaming and handled by the fan-out loop, never by the caller
//! - **Protocol errors** ([`ProtocolError`]): a malformed request on one
//!   protocol connection; that connection is closed, others are unaffected

use std::time::Duration;

/// Broad classification of a [`BridgeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller-supplied configuration was malformed or incomplete.
    Config,
    /// A device, network or OS resource failed.
    Backend,
    /// A protocol peer sent a malformed message.
    Protocol,
    /// No matching device was found before the deadline.
    DiscoveryTimeout,
}

/// Errors surfaced by bridge and playback operations.
///
/// Every variant maps to one [`ErrorKind`], so callers can tell a bad
/// payload from a failing device without string matching.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The configuration is structurally invalid. Never retried.
    #[error("invalid configuration: {reason}")]
    Config {
        /// What was wrong with it.
        reason: String,
    },

    /// A backend failed to start or stop.
    #[error("{backend} backend failed: {reason}")]
    Backend {
        /// Which backend failed (`"receiver"`, `"capture"`, ...).
        backend: &'static str,
        /// Why it failed.
        reason: String,
    },

    /// A protocol exchange failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Discovery gave up before any device matched the filter.
    #[error("no device matching {filter} found within {timeout:?}")]
    DiscoveryTimeout {
        /// Human-readable form of the filter that was used.
        filter: String,
        /// The bound that expired.
        timeout: Duration,
    },
}

impl BridgeError {
    /// Creates a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Creates a backend error for the named backend.
    pub fn backend(backend: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Backend {
            backend,
            reason: reason.to_string(),
        }
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::Config,
            Self::Backend { .. } => ErrorKind::Backend,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::DiscoveryTimeout { .. } => ErrorKind::DiscoveryTimeout,
        }
    }
}

/// Errors raised by an [`Output`](crate::Output) while consuming buffers.
///
/// These are recoverable: the fan-out loop counts consecutive failures and
/// only removes the output once the configured bound is reached.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// A write operation failed.
    #[error("write failed: {reason}")]
    WriteFailed {
        /// Description of what went wrong.
        reason: String,
    },

    /// The connection to the remote device was lost.
    #[error("connection lost: {0}")]
    ConnectionLost(#[source] std::io::Error),

    /// The receiving channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// The output has already been stopped.
    #[error("output stopped")]
    Stopped,

    /// Custom error for user-implemented outputs.
    #[error("{0}")]
    Custom(String),
}

impl OutputError {
    /// Creates a custom output error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates a write failed error with the given reason.
    pub fn write_failed(reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            reason: reason.into(),
        }
    }
}

/// Errors produced while reading or writing protocol messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The peer closed the connection cleanly between messages.
    #[error("connection closed by peer")]
    Eof,

    /// The first line was not `METHOD <target> <protocol>/<version>`.
    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),

    /// The first line was not `<protocol>/<version> <code> <reason>`.
    #[error("malformed status line: {0:?}")]
    MalformedStatusLine(String),

    /// A header line had no `:` separator.
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    /// `Content-Length` was not a valid length.
    #[error("invalid Content-Length: {0:?}")]
    InvalidContentLength(String),

    /// The message exceeded the size limit.
    #[error("message too large ({size} bytes, limit {limit})")]
    TooLarge {
        /// Size that was announced or read.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// The response did not carry the expected correlation header.
    #[error("response CSeq {got:?} does not match request CSeq {expected:?}")]
    CorrelationMismatch {
        /// CSeq sent with the request.
        expected: String,
        /// CSeq found in the response.
        got: Option<String>,
    },

    /// The peer answered with a non-success status.
    #[error("peer answered {code} {reason}")]
    Status {
        /// Numeric status code.
        code: u16,
        /// Reason phrase.
        reason: String,
    },

    /// The peer did not answer in time.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// Socket I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
