//! Backend connections
//!
//! This module handles:
//! * Deriving dialers from a connection string
//! * TCP dialing with `sslmode` negotiation and keepalives
//! * Unix socket dialing with `requirepeer` checks
//! * TLS configuration for backend connections
//! * Sending startup and cancel requests to the backend

mod connector;
mod dialer;
mod tcp;
mod tls;
mod transport;
mod unix;

pub use connector::Connector;
pub use dialer::{derive_dialers, Dialer, DEFAULT_PORT, DEFAULT_SOCKET_DIR};
pub use tcp::{Keepalive, TcpDialer};
pub use tls::{server_name, SslMode, TlsConfig, TlsConfigBuilder};
pub use transport::{TcpVariant, Transport};
pub use unix::UnixDialer;

pub(crate) use tls::{crypto_provider, load_certs, load_private_key};
