//! Error types for pgtwixt

use std::io;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed connection string
    #[error("connection string syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    /// Inconsistent or invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Dialing the backend failed
    #[error("failed to connect to {address}: {source}")]
    Network {
        /// Address that was dialed
        address: String,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// TLS could not be negotiated with the required strength
    #[error("TLS negotiation failed: {0}")]
    TlsNegotiation(String),

    /// Server certificate or Unix peer identity was rejected
    #[error("verification failed: {0}")]
    Verification(String),

    /// Peer violated the wire protocol
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error on an established stream
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Peer closed the stream
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation exceeded its deadline
    #[error("timed out: {0}")]
    Timeout(String),

    /// Invalid state transition
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },
}

/// Connection string grammar failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    /// A key was not followed by `=`
    #[error("{}", expected_equals_message(.0))]
    ExpectedEquals(Option<char>),

    /// Input ended right after `=`
    #[error("expected value before end")]
    ExpectedValue,

    /// A quoted key or value was never closed
    #[error("expected matching quote before end")]
    UnterminatedQuote,
}

fn expected_equals_message(found: &Option<char>) -> String {
    match found {
        Some(c) => format!("expected '=', got {:?}", c),
        None => "expected '=' before end".to_string(),
    }
}

impl Error {
    /// True when the peer simply hung up between frames
    pub fn is_clean_close(&self) -> bool {
        matches!(self, Error::ConnectionClosed)
    }

    /// Short category label, used in logs
    pub fn category(&self) -> &'static str {
        match self {
            Error::Syntax(_) => "syntax",
            Error::Config(_) => "config",
            Error::Network { .. } => "network",
            Error::TlsNegotiation(_) => "tls_negotiation",
            Error::Verification(_) => "verification",
            Error::Protocol(_) => "protocol",
            Error::Io(_) => "io",
            Error::ConnectionClosed => "closed",
            Error::Timeout(_) => "timeout",
            Error::InvalidState { .. } => "state",
        }
    }
}
