//! pgtwixt: a transparent intercepting proxy for the Postgres wire protocol.
//!
//! A [`server::Server`] accepts frontend connections and performs the
//! pre-startup handshake (SSLRequest, StartupMessage, CancelRequest). Sessions
//! are handed to a [`server::Handler`]; the stock handler, [`proxy::Gateway`],
//! dials the backend described by a libpq connection string and pumps frames
//! in both directions, logging each one as it passes.

#![warn(missing_docs)]

pub mod conninfo;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod proxy;
pub mod server;
pub mod stream;

pub use error::{Error, Result, SyntaxError};
