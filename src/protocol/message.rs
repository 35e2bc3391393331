//! Untyped control messages exchanged before startup

use super::constants::{CANCEL_REQUEST_CODE, GSSENC_REQUEST_CODE, PROTOCOL_VERSION, SSL_REQUEST_CODE};
use super::frame::Frame;
use bytes::{Buf, BufMut, BytesMut};
use std::collections::HashMap;
use std::io;

/// Startup parameters (`user`, `database`, `options`, ...)
pub type StartupParams = HashMap<String, String>;

/// Key identifying a backend session for cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CancelKey {
    /// Backend process ID
    pub process_id: u32,
    /// Secret key
    pub secret_key: u32,
}

/// StartupMessage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupMessage {
    /// Requested protocol version
    pub version: i32,
    /// Session parameters
    pub params: StartupParams,
}

impl StartupMessage {
    /// Protocol 3.0 startup with the given parameters
    pub fn new(params: StartupParams) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            params,
        }
    }

    /// Decode from an untyped frame
    pub fn decode(frame: &Frame) -> io::Result<Self> {
        if frame.tag.is_some() {
            return Err(invalid("startup message must be untyped"));
        }
        let mut data = &frame.body[..];
        if data.len() < 4 {
            return Err(invalid("startup message too short"));
        }
        let version = data.get_i32();

        let mut params = StartupParams::new();
        loop {
            let key = read_cstr(&mut data)?;
            if key.is_empty() {
                break;
            }
            let value = read_cstr(&mut data)?;
            params.insert(key, value);
        }
        if !data.is_empty() {
            return Err(invalid("trailing bytes after startup parameters"));
        }

        Ok(Self { version, params })
    }

    /// Encode as an untyped frame; parameters are written in key order
    pub fn to_frame(&self) -> Frame {
        let mut keys: Vec<_> = self.params.keys().collect();
        keys.sort();

        let mut body = BytesMut::new();
        body.put_i32(self.version);
        for key in keys {
            body.put(key.as_bytes());
            body.put_u8(0);
            body.put(self.params[key].as_bytes());
            body.put_u8(0);
        }
        body.put_u8(0);
        Frame::untyped(body.freeze())
    }
}

impl CancelKey {
    /// Decode a CancelRequest frame
    pub fn decode(frame: &Frame) -> io::Result<Self> {
        if !frame.is_cancel_request() {
            return Err(invalid("not a cancel request"));
        }
        if frame.body.len() != 12 {
            return Err(invalid("cancel request must be 16 bytes"));
        }
        let mut data = &frame.body[4..];
        Ok(Self {
            process_id: data.get_u32(),
            secret_key: data.get_u32(),
        })
    }

    /// Encode as a CancelRequest frame
    pub fn to_frame(&self) -> Frame {
        let mut body = BytesMut::with_capacity(12);
        body.put_i32(CANCEL_REQUEST_CODE);
        body.put_u32(self.process_id);
        body.put_u32(self.secret_key);
        Frame::untyped(body.freeze())
    }
}

/// SSLRequest frame
pub fn ssl_request() -> Frame {
    Frame::untyped(SSL_REQUEST_CODE.to_be_bytes().to_vec())
}

/// GSSENCRequest frame
pub fn gssenc_request() -> Frame {
    Frame::untyped(GSSENC_REQUEST_CODE.to_be_bytes().to_vec())
}

fn read_cstr(data: &mut &[u8]) -> io::Result<String> {
    let end = data
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| invalid("missing string terminator"))?;
    let s = String::from_utf8(data[..end].to_vec())
        .map_err(|_| invalid("startup parameter is not UTF-8"))?;
    *data = &data[end + 1..];
    Ok(s)
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}
