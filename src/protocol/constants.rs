//! Postgres protocol constants

/// Protocol version 3.0
pub const PROTOCOL_VERSION: i32 = 0x0003_0000;

/// SSLRequest code (80877103 = 1234 << 16 | 5679)
pub const SSL_REQUEST_CODE: i32 = 0x04D2_162F;

/// CancelRequest code (80877102 = 1234 << 16 | 5678)
pub const CANCEL_REQUEST_CODE: i32 = 0x04D2_162E;

/// GSSENCRequest code (80877104 = 1234 << 16 | 5680)
pub const GSSENC_REQUEST_CODE: i32 = 0x04D2_1630;

/// Maximum typed message length (1 GB), matching PostgreSQL's `PQ_LARGE_MESSAGE_LIMIT`
pub const MAX_MESSAGE_LENGTH: usize = 1_073_741_824;

/// Maximum untyped (pre-startup) packet length, matching PostgreSQL's `MAX_STARTUP_PACKET_LENGTH`
pub const MAX_STARTUP_PACKET_LENGTH: usize = 10_000;

/// Replies to SSLRequest and GSSENCRequest
pub mod ssl_response {
    /// Server will upgrade to TLS
    pub const ACCEPT: u8 = b'S';

    /// Server stays in plaintext
    pub const REJECT: u8 = b'N';

    /// Pre-7.0 servers answer with an ErrorResponse
    pub const ERROR: u8 = b'E';
}

/// Message type tags
pub mod tags {
    /// Terminate (frontend)
    pub const TERMINATE: u8 = b'X';

    /// Query (frontend)
    pub const QUERY: u8 = b'Q';

    /// Error response (backend)
    pub const ERROR_RESPONSE: u8 = b'E';

    /// Ready for query (backend)
    pub const READY_FOR_QUERY: u8 = b'Z';
}
