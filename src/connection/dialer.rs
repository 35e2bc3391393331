//! Turning a connection string into backend dialers
//!
//! Each index `i` of the multi-host keywords yields one dialer:
//! * a TCP dialer when `hostaddr[i]` is set, or `host[i]` is set and is not
//!   an absolute path
//! * otherwise a Unix socket dialer in directory `host[i]` (default `/tmp`)
//!
//! `port` may list one port per host or a single port shared by all of them.

use super::tcp::{Keepalive, TcpDialer};
use super::tls::{SslMode, TlsConfig};
use super::transport::Transport;
use super::unix::UnixDialer;
use crate::conninfo::ConnectionString;
use crate::stream::BackendStream;
use crate::{Error, Result};
use std::path::PathBuf;

/// Port used when none is configured
pub const DEFAULT_PORT: &str = "5432";

/// Socket directory used when no host is configured
pub const DEFAULT_SOCKET_DIR: &str = "/tmp";

/// One way of reaching the backend
#[derive(Debug, Clone)]
pub enum Dialer {
    /// TCP, optionally upgraded to TLS
    Tcp(TcpDialer),
    /// Unix domain socket
    Unix(UnixDialer),
}

impl Dialer {
    /// Open a fresh connection and wrap it in a logged stream.
    pub async fn dial(&self) -> Result<BackendStream> {
        let transport = self.dial_transport().await?;
        Ok(BackendStream::backend(transport))
    }

    async fn dial_transport(&self) -> Result<Transport> {
        match self {
            Dialer::Tcp(dialer) => dialer.dial().await,
            Dialer::Unix(dialer) => dialer.dial().await,
        }
    }

    /// Human-readable target (`host:port` or socket path)
    pub fn address(&self) -> String {
        match self {
            Dialer::Tcp(dialer) => dialer.address.clone(),
            Dialer::Unix(dialer) => dialer.path.display().to_string(),
        }
    }
}

/// Derive the ordered list of dialers described by `cs`.
///
/// # Errors
///
/// [`Error::Config`] when the host, hostaddr and port lists cannot be paired
/// up, or when a port, timeout, keepalive or TLS setting is malformed.
pub fn derive_dialers(cs: &ConnectionString) -> Result<Vec<Dialer>> {
    let hosts = cs.host.len();
    let addrs = cs.hostaddr.len();
    let ports = cs.port.len();

    if hosts > 0 && addrs > 0 && hosts != addrs {
        return Err(Error::Config(format!(
            "could not match {} host names to {} hostaddr values",
            hosts, addrs
        )));
    }
    let count = hosts.max(addrs).max(1);
    // Ports are only paired with hosts when some host is configured.
    if (hosts > 0 || addrs > 0) && ports > 1 && ports != count {
        return Err(Error::Config(format!(
            "could not match {} port numbers to {} hosts",
            ports, count
        )));
    }

    let ssl_mode = ssl_mode(cs)?;
    let connect_timeout = cs.connect_timeout()?;
    let keepalive = Keepalive::from_connection_string(cs)?;
    let require_peer = Some(cs.requirepeer.clone()).filter(|peer| !peer.is_empty());
    let mut tls = None;

    let mut dialers = Vec::with_capacity(count);
    for i in 0..count {
        let host = entry(&cs.host, i);
        let hostaddr = entry(&cs.hostaddr, i);
        let port = match cs.port.get(i).or_else(|| cs.port.first()) {
            Some(port) if !port.is_empty() => port.as_str(),
            _ => DEFAULT_PORT,
        };
        if port.parse::<u16>().is_err() {
            return Err(Error::Config(format!("invalid port number: {:?}", port)));
        }

        if !hostaddr.is_empty() || (!host.is_empty() && !host.starts_with('/')) {
            if ssl_mode.attempts_tls() && tls.is_none() {
                tls = Some(tls_config(cs, ssl_mode)?);
            }
            let target = if hostaddr.is_empty() { host } else { hostaddr };
            dialers.push(Dialer::Tcp(TcpDialer {
                address: join_host_port(target, port),
                server_name: host.to_string(),
                ssl_mode,
                tls: tls.clone(),
                connect_timeout,
                keepalive,
            }));
        } else {
            let dir = if host.is_empty() { DEFAULT_SOCKET_DIR } else { host };
            dialers.push(Dialer::Unix(UnixDialer {
                path: socket_path(dir, port),
                require_peer: require_peer.clone(),
                connect_timeout,
            }));
        }
    }
    Ok(dialers)
}

fn entry(list: &[String], i: usize) -> &str {
    list.get(i).map(String::as_str).unwrap_or("")
}

fn ssl_mode(cs: &ConnectionString) -> Result<SslMode> {
    if cs.sslmode.is_empty() && cs.requiressl.trim() == "1" {
        return Ok(SslMode::Require);
    }
    cs.sslmode.parse()
}

fn tls_config(cs: &ConnectionString, mode: SslMode) -> Result<TlsConfig> {
    let mut builder = TlsConfig::builder().mode(mode);
    if !cs.sslrootcert.is_empty() {
        builder = builder.ca_cert_path(cs.sslrootcert.as_str());
    }
    if !cs.sslcrl.is_empty() {
        builder = builder.crl_path(cs.sslcrl.as_str());
    }
    match (cs.sslcert.is_empty(), cs.sslkey.is_empty()) {
        (false, false) => builder = builder.client_cert(cs.sslcert.as_str(), cs.sslkey.as_str()),
        (true, true) => {}
        _ => {
            return Err(Error::Config(
                "sslcert and sslkey must be given together".to_string(),
            ))
        }
    }
    builder.build()
}

/// `host:port`, bracketing IPv6 literals
fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Construct the full Unix socket path
fn socket_path(socket_dir: &str, port: &str) -> PathBuf {
    PathBuf::from(format!("{}/.s.PGSQL.{}", socket_dir, port))
}
