//! Logged protocol streams
//!
//! [`Stream`] wraps a byte transport and speaks in whole frames. Frontend
//! streams run over a boxed transport (plain TCP or server-side TLS, decided
//! during the handshake); backend streams run over [`Transport`].

mod framed;

pub use framed::{Direction, Stream, StreamReader, StreamWriter};

use crate::connection::Transport;
use tokio::io::{AsyncRead, AsyncWrite};

/// Any bidirectional byte transport usable behind a stream
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Type-erased frontend transport
pub type BoxedIo = Box<dyn AsyncStream>;

/// Stream to a client
pub type FrontendStream = Stream<BoxedIo>;

/// Stream to a server
pub type BackendStream = Stream<Transport>;
