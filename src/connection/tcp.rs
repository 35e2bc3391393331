//! TCP dialer with `sslmode` negotiation

use super::tls::{server_name, SslMode, TlsConfig};
use super::transport::{TcpVariant, Transport};
use crate::conninfo::{parse_seconds, ConnectionString};
use crate::protocol::constants::ssl_response;
use crate::protocol::message::ssl_request;
use crate::{Error, Result};
use socket2::{SockRef, TcpKeepalive};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

/// TCP keepalive settings (`keepalives*` keywords)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    /// Whether keepalive probes are sent at all
    pub enabled: bool,
    /// Idle time before the first probe
    pub idle: Option<Duration>,
    /// Time between probes
    pub interval: Option<Duration>,
    /// Unanswered probes before the connection is considered dead
    pub retries: Option<u32>,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            enabled: true,
            idle: None,
            interval: None,
            retries: None,
        }
    }
}

impl Keepalive {
    /// Read the keepalive keywords of a connection string
    pub fn from_connection_string(cs: &ConnectionString) -> Result<Self> {
        let enabled = match cs.keepalives.trim() {
            "" => true,
            value => value.parse::<i64>().map_err(|_| {
                Error::Config(format!("invalid keepalives '{}': expected 0 or 1", value))
            })? != 0,
        };
        let retries = match cs.keepalives_count.trim() {
            "" => None,
            value => Some(value.parse::<u32>().map_err(|_| {
                Error::Config(format!(
                    "invalid keepalives_count '{}': expected a whole number",
                    value
                ))
            })?),
        };

        Ok(Self {
            enabled,
            idle: parse_seconds("keepalives_idle", &cs.keepalives_idle)?,
            interval: parse_seconds("keepalives_interval", &cs.keepalives_interval)?,
            retries,
        })
    }

    fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        let sock = SockRef::from(stream);
        if !self.enabled {
            return sock.set_keepalive(false);
        }

        let mut keepalive = TcpKeepalive::new();
        if let Some(idle) = self.idle {
            keepalive = keepalive.with_time(idle);
        }
        #[cfg(any(target_os = "linux", target_os = "macos", target_os = "freebsd"))]
        {
            if let Some(interval) = self.interval {
                keepalive = keepalive.with_interval(interval);
            }
            if let Some(retries) = self.retries {
                keepalive = keepalive.with_retries(retries);
            }
        }
        sock.set_tcp_keepalive(&keepalive)
    }
}

/// Dials a backend over TCP.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    /// `host:port` to connect to; IPv6 literals are bracketed
    pub address: String,
    /// Host name expected in the server certificate; empty when only a
    /// `hostaddr` was given
    pub server_name: String,
    /// TLS policy
    pub ssl_mode: SslMode,
    /// TLS client configuration, present whenever `ssl_mode` attempts TLS
    pub tls: Option<TlsConfig>,
    /// Bound on connection establishment, including TLS
    pub connect_timeout: Option<Duration>,
    /// Keepalive settings
    pub keepalive: Keepalive,
}

impl TcpDialer {
    /// Connect, then negotiate TLS as `ssl_mode` demands.
    pub async fn dial(&self) -> Result<Transport> {
        match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, self.establish())
                .await
                .map_err(|_| {
                    Error::Timeout(format!(
                        "connecting to {} took longer than {:?}",
                        self.address, limit
                    ))
                })?,
            None => self.establish().await,
        }
    }

    async fn establish(&self) -> Result<Transport> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|source| self.network_error(source))?;

        stream
            .set_nodelay(true)
            .map_err(|source| self.network_error(source))?;
        self.keepalive
            .apply(&stream)
            .map_err(|source| self.network_error(source))?;

        tracing::debug!(address = %self.address, sslmode = %self.ssl_mode, "backend connected");
        self.negotiate_tls(stream).await
    }

    async fn negotiate_tls(&self, mut stream: TcpStream) -> Result<Transport> {
        if !self.ssl_mode.attempts_tls() {
            return Ok(Transport::Tcp(TcpVariant::Plain(stream)));
        }
        let tls = self.tls.as_ref().ok_or_else(|| {
            Error::Config(format!(
                "sslmode={} requires a TLS configuration but none was provided",
                self.ssl_mode
            ))
        })?;

        match self.request_ssl(&mut stream).await? {
            ssl_response::ACCEPT => {
                let name = server_name(&self.server_name, &self.address)?;
                let tls_stream = TlsConnector::from(tls.client_config())
                    .connect(name, stream)
                    .await
                    .map_err(classify_handshake_error)?;
                tracing::debug!(address = %self.address, "TLS connection established");
                Ok(Transport::Tcp(TcpVariant::Tls(tls_stream)))
            }
            ssl_response::REJECT if !self.ssl_mode.requires_tls() => {
                tracing::debug!(address = %self.address, "server rejected TLS, continuing in plaintext");
                Ok(Transport::Tcp(TcpVariant::Plain(stream)))
            }
            ssl_response::REJECT => Err(Error::TlsNegotiation(format!(
                "server does not support TLS (sslmode={})",
                self.ssl_mode
            ))),
            ssl_response::ERROR => Err(Error::TlsNegotiation(
                "server answered SSLRequest with an error".to_string(),
            )),
            other => Err(Error::Protocol(format!(
                "unexpected SSLRequest response byte: 0x{:02X}",
                other
            ))),
        }
    }

    /// Send an SSLRequest and return the one-byte answer.
    async fn request_ssl<S>(&self, stream: &mut S) -> Result<u8>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request = ssl_request();
        tracing::debug!(dir = ">B", r#type = "SSL", size = request.len(), "frame");
        stream
            .write_all(&request.to_bytes())
            .await
            .map_err(|source| self.network_error(source))?;

        // Read exactly one byte so nothing sent after it is consumed in plaintext.
        let mut response = [0u8; 1];
        stream.read_exact(&mut response).await.map_err(|e| {
            Error::TlsNegotiation(format!("no response to SSLRequest: {}", e))
        })?;
        tracing::debug!(
            dir = "<B",
            r#type = "SSL",
            size = 1,
            response = %(response[0] as char),
            "frame"
        );
        Ok(response[0])
    }

    fn network_error(&self, source: io::Error) -> Error {
        Error::Network {
            address: self.address.clone(),
            source,
        }
    }
}

/// Certificate rejections are verification failures; everything else that
/// goes wrong in the handshake is a negotiation failure.
fn classify_handshake_error(err: io::Error) -> Error {
    let rejected = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .is_some_and(|e| matches!(e, rustls::Error::InvalidCertificate(_)));
    if rejected {
        Error::Verification(err.to_string())
    } else {
        Error::TlsNegotiation(format!("TLS handshake failed: {}", err))
    }
}
