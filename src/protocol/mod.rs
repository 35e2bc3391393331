//! Postgres wire protocol framing
//!
//! pgtwixt never interprets message contents after startup; it only needs
//! to find frame boundaries and to recognize the handful of untyped control
//! messages that precede a session.

pub mod constants;
pub mod frame;
pub mod message;

pub use frame::{decode_frame, has_complete_frame, Frame, FrameKind};
pub use message::{CancelKey, StartupMessage, StartupParams};
