use std::{io, path::PathBuf};

use thiserror::Error;

/// Failure categories shared by the client and the server.
///
/// Each variant maps to one local decision: abort startup, drop a connection,
/// reject a message, or answer in-band.
#[derive(Debug, Error)]
pub enum Error {
    /// Certificate, key or trust file missing, unreadable or malformed. Fatal
    /// at startup.
    #[error("configuration error in {path:?}: {reason}")]
    Config { path: PathBuf, reason: String },

    /// Invalid process setting such as an unparsable port.
    #[error("invalid setting {name}: {reason}")]
    Setting { name: &'static str, reason: String },

    /// TLS negotiation failed or the peer presented no usable certificate.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Outgoing message rejected before any I/O.
    #[error("invalid message: {0}")]
    Validation(String),

    /// Socket-level failure; the connection it happened on is gone.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// Received bytes are not valid UTF-8.
    #[error("invalid UTF-8 encoding: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    /// Operation requires an established connection.
    #[error("not connected to server")]
    NotConnected,
}

impl Error {
    pub(crate) fn config(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Config {
            path:   path.into(),
            reason: reason.to_string(),
        }
    }

    /// Short label used in log lines so every category is distinguishable.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config { .. } | Error::Setting { .. } => "config",
            Error::Handshake(_) => "handshake",
            Error::Validation(_) => "validation",
            Error::Transport(_) => "transport",
            Error::Encoding(_) => "encoding",
            Error::NotConnected => "state",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
