//! Frame-level stream with per-frame logging

use crate::protocol::constants::ssl_response;
use crate::protocol::{decode_frame, has_complete_frame, Frame};
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

/// Buffered output is written out once it grows past this size.
const WRITE_HIGH_WATER: usize = 64 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Which peer a stream talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client side of the proxy
    Frontend,
    /// Server side of the proxy
    Backend,
}

impl Direction {
    /// Log label for frames read from this peer
    pub fn inbound(self) -> &'static str {
        match self {
            Direction::Frontend => "F>",
            Direction::Backend => "<B",
        }
    }

    /// Log label for frames written to this peer
    pub fn outbound(self) -> &'static str {
        match self {
            Direction::Frontend => "F<",
            Direction::Backend => ">B",
        }
    }
}

#[derive(Debug)]
struct ReadState {
    buf: BytesMut,
    untyped: bool,
    direction: Direction,
}

impl ReadState {
    async fn next<R: AsyncRead + Unpin>(&mut self, io: &mut R) -> Result<Frame> {
        loop {
            match decode_frame(&mut self.buf, self.untyped) {
                Ok(Some(frame)) => {
                    if self.untyped && frame.is_startup_message() {
                        self.untyped = false;
                    }
                    tracing::debug!(
                        dir = self.direction.inbound(),
                        r#type = %frame.kind(),
                        size = frame.len(),
                        "frame"
                    );
                    return Ok(frame);
                }
                Ok(None) => {}
                Err(e) => return Err(Error::Protocol(e.to_string())),
            }

            if self.buf.capacity() - self.buf.len() < READ_CHUNK / 2 {
                self.buf.reserve(READ_CHUNK);
            }
            let n = io.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Err(Error::ConnectionClosed);
                }
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("connection closed with {} bytes of a partial frame", self.buf.len()),
                )));
            }
        }
    }

    fn has_next(&self) -> bool {
        has_complete_frame(&self.buf, self.untyped)
    }
}

#[derive(Debug)]
struct WriteState {
    buf: BytesMut,
    direction: Direction,
}

impl WriteState {
    async fn send<W: AsyncWrite + Unpin>(&mut self, io: &mut W, frame: &Frame) -> Result<()> {
        tracing::debug!(
            dir = self.direction.outbound(),
            r#type = %frame.kind(),
            size = frame.len(),
            "frame"
        );
        frame.encode(&mut self.buf);
        if self.buf.len() >= WRITE_HIGH_WATER {
            io.write_all_buf(&mut self.buf).await?;
        }
        Ok(())
    }

    async fn flush<W: AsyncWrite + Unpin>(&mut self, io: &mut W) -> Result<()> {
        if !self.buf.is_empty() {
            io.write_all_buf(&mut self.buf).await?;
        }
        io.flush().await?;
        Ok(())
    }

    async fn close<W: AsyncWrite + Unpin>(&mut self, io: &mut W) -> Result<()> {
        let flushed = self.flush(io).await;
        let shutdown = io.shutdown().await;
        flushed?;
        shutdown?;
        Ok(())
    }
}

/// Protocol stream over a byte transport.
///
/// Reading yields whole frames. Sending buffers frames until [`Stream::flush`]
/// (or until the buffer grows large). Every frame read or written is logged at
/// debug level with its direction, type and size.
///
/// A frontend stream expects untyped frames until it has read a
/// StartupMessage; a backend stream only ever reads typed frames.
#[derive(Debug)]
pub struct Stream<S> {
    io: S,
    reader: ReadState,
    writer: WriteState,
}

impl<S> Stream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Stream over a connection accepted from a client
    pub fn frontend(io: S) -> Self {
        Self::new(io, Direction::Frontend, true)
    }

    /// Stream over a connection dialed to a server
    pub fn backend(io: S) -> Self {
        Self::new(io, Direction::Backend, false)
    }

    fn new(io: S, direction: Direction, untyped: bool) -> Self {
        Self {
            io,
            reader: ReadState {
                buf: BytesMut::with_capacity(READ_CHUNK),
                untyped,
                direction,
            },
            writer: WriteState {
                buf: BytesMut::new(),
                direction,
            },
        }
    }

    /// Which peer this stream talks to
    pub fn direction(&self) -> Direction {
        self.reader.direction
    }

    /// Read the next frame.
    ///
    /// A peer that hangs up between frames yields [`Error::ConnectionClosed`].
    pub async fn next(&mut self) -> Result<Frame> {
        self.reader.next(&mut self.io).await
    }

    /// Whether a complete frame is already buffered, so that [`Stream::next`]
    /// will not wait on the transport
    pub fn has_next(&self) -> bool {
        self.reader.has_next()
    }

    /// Queue a frame for sending
    pub async fn send(&mut self, frame: &Frame) -> Result<()> {
        self.writer.send(&mut self.io, frame).await
    }

    /// Write out everything queued
    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush(&mut self.io).await
    }

    /// Answer an SSLRequest or GSSENCRequest with the one-byte reply
    pub async fn send_ssl_response(&mut self, accept: bool) -> Result<()> {
        let response = if accept {
            ssl_response::ACCEPT
        } else {
            ssl_response::REJECT
        };
        tracing::debug!(
            dir = self.writer.direction.outbound(),
            r#type = "SSL",
            size = 1,
            response = %(response as char),
            "frame"
        );
        self.writer.buf.put_u8(response);
        self.flush().await
    }

    /// Flush and shut the transport down.
    pub async fn close(mut self) -> Result<()> {
        self.writer.close(&mut self.io).await
    }

    /// Give the transport back, e.g. for a TLS upgrade.
    ///
    /// Fails if the peer has sent bytes that were not read yet: nothing may be
    /// pipelined across the plaintext/TLS boundary.
    pub fn into_inner(self) -> Result<S> {
        if !self.reader.buf.is_empty() {
            return Err(Error::Protocol(format!(
                "{} unexpected bytes received before TLS upgrade",
                self.reader.buf.len()
            )));
        }
        Ok(self.io)
    }

    /// Split into independently usable reading and writing halves.
    pub fn into_split(self) -> (StreamReader<ReadHalf<S>>, StreamWriter<WriteHalf<S>>) {
        let (read, write) = tokio::io::split(self.io);
        (
            StreamReader {
                io: read,
                state: self.reader,
            },
            StreamWriter {
                io: write,
                state: self.writer,
            },
        )
    }

    /// Borrow the transport
    pub fn get_ref(&self) -> &S {
        &self.io
    }
}

/// Reading half of a [`Stream`]
#[derive(Debug)]
pub struct StreamReader<R> {
    io: R,
    state: ReadState,
}

impl<R: AsyncRead + Unpin> StreamReader<R> {
    /// Read the next frame
    pub async fn next(&mut self) -> Result<Frame> {
        self.state.next(&mut self.io).await
    }

    /// Whether a complete frame is already buffered
    pub fn has_next(&self) -> bool {
        self.state.has_next()
    }
}

/// Writing half of a [`Stream`]
#[derive(Debug)]
pub struct StreamWriter<W> {
    io: W,
    state: WriteState,
}

impl<W: AsyncWrite + Unpin> StreamWriter<W> {
    /// Queue a frame for sending
    pub async fn send(&mut self, frame: &Frame) -> Result<()> {
        self.state.send(&mut self.io, frame).await
    }

    /// Write out everything queued
    pub async fn flush(&mut self) -> Result<()> {
        self.state.flush(&mut self.io).await
    }

    /// Flush and shut down the write side
    pub async fn close(mut self) -> Result<()> {
        self.state.close(&mut self.io).await
    }
}
