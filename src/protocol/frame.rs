//! Length-prefixed frame codec
//!
//! A typed frame is a one-byte tag followed by a big-endian `i32` length that
//! counts itself and the body. Untyped frames (everything a frontend sends
//! before its StartupMessage) omit the tag.

use super::constants::{
    CANCEL_REQUEST_CODE, GSSENC_REQUEST_CODE, MAX_MESSAGE_LENGTH, MAX_STARTUP_PACKET_LENGTH,
    PROTOCOL_VERSION, SSL_REQUEST_CODE,
};
use super::constants::tags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::io;

const LENGTH_SIZE: usize = 4;

/// A single protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Type tag, `None` for untyped control frames
    pub tag: Option<u8>,
    /// Payload following the length word
    pub body: Bytes,
}

/// Log classification of a frame
///
/// Untyped frames are labelled `SSL` or `Start`, with `GSS` and `Cancel`
/// split out of `Start` so handshake logs show which request arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Typed frame with its tag
    Typed(u8),
    /// SSLRequest
    Ssl,
    /// GSSENCRequest
    Gss,
    /// CancelRequest
    Cancel,
    /// StartupMessage or another untyped frame
    Startup,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKind::Typed(tag) if tag.is_ascii_graphic() => write!(f, "{}", *tag as char),
            FrameKind::Typed(tag) => write!(f, "0x{:02X}", tag),
            FrameKind::Ssl => f.write_str("SSL"),
            FrameKind::Gss => f.write_str("GSS"),
            FrameKind::Cancel => f.write_str("Cancel"),
            FrameKind::Startup => f.write_str("Start"),
        }
    }
}

impl Frame {
    /// Create a typed frame
    pub fn typed(tag: u8, body: impl Into<Bytes>) -> Self {
        Self {
            tag: Some(tag),
            body: body.into(),
        }
    }

    /// Create an untyped frame
    pub fn untyped(body: impl Into<Bytes>) -> Self {
        Self {
            tag: None,
            body: body.into(),
        }
    }

    /// Total encoded size in bytes
    pub fn len(&self) -> usize {
        self.tag.map_or(0, |_| 1) + LENGTH_SIZE + self.body.len()
    }

    /// Frames always carry at least a length word
    pub fn is_empty(&self) -> bool {
        false
    }

    /// First four body bytes of an untyped frame, which select its meaning
    pub fn code(&self) -> Option<i32> {
        if self.tag.is_some() || self.body.len() < 4 {
            return None;
        }
        Some(i32::from_be_bytes([
            self.body[0],
            self.body[1],
            self.body[2],
            self.body[3],
        ]))
    }

    /// Whether this is an SSLRequest
    pub fn is_ssl_request(&self) -> bool {
        self.body.len() == 4 && self.code() == Some(SSL_REQUEST_CODE)
    }

    /// Whether this is a GSSENCRequest
    pub fn is_gssenc_request(&self) -> bool {
        self.body.len() == 4 && self.code() == Some(GSSENC_REQUEST_CODE)
    }

    /// Whether this is a CancelRequest
    pub fn is_cancel_request(&self) -> bool {
        self.code() == Some(CANCEL_REQUEST_CODE)
    }

    /// Whether this is a StartupMessage (major protocol version 3)
    pub fn is_startup_message(&self) -> bool {
        matches!(self.code(), Some(code) if code >> 16 == PROTOCOL_VERSION >> 16)
    }

    /// Whether this is a Terminate message
    pub fn is_terminate(&self) -> bool {
        self.tag == Some(tags::TERMINATE)
    }

    /// Classification used in frame logs
    pub fn kind(&self) -> FrameKind {
        match self.tag {
            Some(tag) => FrameKind::Typed(tag),
            None if self.is_ssl_request() => FrameKind::Ssl,
            None if self.is_gssenc_request() => FrameKind::Gss,
            None if self.is_cancel_request() => FrameKind::Cancel,
            None => FrameKind::Startup,
        }
    }

    /// Append the wire encoding to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.len());
        if let Some(tag) = self.tag {
            buf.put_u8(tag);
        }
        buf.put_i32((LENGTH_SIZE + self.body.len()) as i32);
        buf.put_slice(&self.body);
    }

    /// Wire encoding as a fresh buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.len());
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Try to take one frame off the front of `buf`.
///
/// Returns `Ok(None)` when more input is needed; nothing is consumed in that
/// case. Length fields outside the permitted range are `InvalidData`.
pub fn decode_frame(buf: &mut BytesMut, untyped: bool) -> io::Result<Option<Frame>> {
    let Some(total) = frame_len(buf, untyped)? else {
        return Ok(None);
    };
    if buf.len() < total {
        return Ok(None);
    }

    let mut raw = buf.split_to(total);
    let tag = if untyped { None } else { Some(raw.get_u8()) };
    raw.advance(LENGTH_SIZE);
    Ok(Some(Frame {
        tag,
        body: raw.freeze(),
    }))
}

/// Whether `buf` holds at least one complete frame.
pub fn has_complete_frame(buf: &[u8], untyped: bool) -> bool {
    matches!(frame_len(buf, untyped), Ok(Some(total)) if buf.len() >= total)
}

/// Full encoded size of the frame at the front of `buf`, once its header is
/// available.
fn frame_len(buf: &[u8], untyped: bool) -> io::Result<Option<usize>> {
    let header = if untyped { LENGTH_SIZE } else { 1 + LENGTH_SIZE };
    if buf.len() < header {
        return Ok(None);
    }

    let at = header - LENGTH_SIZE;
    let len = i32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
    let limit = if untyped {
        MAX_STARTUP_PACKET_LENGTH
    } else {
        MAX_MESSAGE_LENGTH
    };

    if len < LENGTH_SIZE as i32 || len as usize > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid message length {} (allowed 4..={})", len, limit),
        ));
    }
    Ok(Some(at + len as usize))
}
