//! libpq connection strings
//!
//! * [`grammar`] tokenizes keyword/value text
//! * [`ConnectionString`] maps the pairs onto typed fields

mod connection_string;
pub mod grammar;

pub use connection_string::ConnectionString;
pub(crate) use connection_string::parse_seconds;
