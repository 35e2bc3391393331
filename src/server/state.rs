//! Frontend handshake state machine

use crate::{Error, Result};

/// Handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Waiting for the first frame (GSSENCRequest, SSLRequest, StartupMessage or CancelRequest)
    AwaitingFirst,

    /// SSLRequest received, answering it and possibly upgrading to TLS
    NegotiatingTls,

    /// SSL negotiation done, waiting for StartupMessage or CancelRequest
    AwaitingStartup,

    /// Handing the connection to the session or cancel handler
    Dispatching,

    /// Closed
    Closed,
}

impl HandshakeState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: HandshakeState) -> bool {
        use HandshakeState::*;

        matches!(
            (self, next),
            (AwaitingFirst, NegotiatingTls)
                | (AwaitingFirst, Dispatching)
                | (NegotiatingTls, AwaitingStartup)
                | (AwaitingStartup, Dispatching)
                | (_, Closed)
        )
    }

    /// Transition to new state
    pub fn transition(&mut self, next: HandshakeState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("valid transition from {}", self),
                actual: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

impl std::fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitingFirst => write!(f, "awaiting_first"),
            Self::NegotiatingTls => write!(f, "negotiating_tls"),
            Self::AwaitingStartup => write!(f, "awaiting_startup"),
            Self::Dispatching => write!(f, "dispatching"),
            Self::Closed => write!(f, "closed"),
        }
    }
}
