//! Typed view of a libpq connection string
//!
//! Supports the keyword/value format:
//! * `host=db1,db2 port=5432 dbname=app sslmode=verify-full`
//! * `host=/var/run/postgresql user=postgres`
//!
//! Known keywords land in named fields; anything else is kept in
//! [`ConnectionString::remainder`]. Multi-host keywords (`host`, `hostaddr`,
//! `port`) are split on commas. Numeric values are only interpreted when a
//! dialer is derived from the connection string.

use super::grammar;
use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Parsed connection string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionString {
    /// Host names or socket directories
    pub host: Vec<String>,
    /// Numeric host addresses
    pub hostaddr: Vec<String>,
    /// Ports, one per host or a single shared one
    pub port: Vec<String>,
    /// Database name
    pub dbname: String,
    /// User name
    pub user: String,
    /// Password
    pub password: String,
    /// Password file
    pub passfile: String,
    /// Connect timeout in seconds
    pub connect_timeout: String,
    /// Client encoding
    pub client_encoding: String,
    /// Command-line options sent to the server
    pub options: String,
    /// Application name
    pub application_name: String,
    /// Fallback application name
    pub fallback_application_name: String,
    /// Whether TCP keepalives are enabled (`0` disables)
    pub keepalives: String,
    /// Idle seconds before the first keepalive probe
    pub keepalives_idle: String,
    /// Seconds between keepalive probes
    pub keepalives_interval: String,
    /// Unanswered probes before the connection is dropped
    pub keepalives_count: String,
    /// TLS mode
    pub sslmode: String,
    /// Legacy TLS switch (`1` means `sslmode=require`)
    pub requiressl: String,
    /// TLS compression
    pub sslcompression: String,
    /// Client certificate file
    pub sslcert: String,
    /// Client private key file
    pub sslkey: String,
    /// Trusted root certificate file
    pub sslrootcert: String,
    /// Certificate revocation list file
    pub sslcrl: String,
    /// Required user name of a Unix socket peer
    pub requirepeer: String,
    /// Service name
    pub service: String,
    /// Keywords without a dedicated field
    pub remainder: HashMap<String, String>,
}

impl ConnectionString {
    /// Parse a connection string.
    ///
    /// Later occurrences of a keyword override earlier ones.
    pub fn parse(s: &str) -> Result<Self> {
        let mut cs = ConnectionString::default();
        grammar::parse(s, |key, value| cs.set(key, value))?;
        Ok(cs)
    }

    /// Assign a single keyword.
    pub fn set(&mut self, key: String, value: String) {
        let field = match key.as_str() {
            "host" => {
                self.host = split_list(&value);
                return;
            }
            "hostaddr" => {
                self.hostaddr = split_list(&value);
                return;
            }
            "port" => {
                self.port = split_list(&value);
                return;
            }
            "dbname" => &mut self.dbname,
            "user" => &mut self.user,
            "password" => &mut self.password,
            "passfile" => &mut self.passfile,
            "connect_timeout" => &mut self.connect_timeout,
            "client_encoding" => &mut self.client_encoding,
            "options" => &mut self.options,
            "application_name" => &mut self.application_name,
            "fallback_application_name" => &mut self.fallback_application_name,
            "keepalives" => &mut self.keepalives,
            "keepalives_idle" => &mut self.keepalives_idle,
            "keepalives_interval" => &mut self.keepalives_interval,
            "keepalives_count" => &mut self.keepalives_count,
            "sslmode" => &mut self.sslmode,
            "requiressl" => &mut self.requiressl,
            "sslcompression" => &mut self.sslcompression,
            "sslcert" => &mut self.sslcert,
            "sslkey" => &mut self.sslkey,
            "sslrootcert" => &mut self.sslrootcert,
            "sslcrl" => &mut self.sslcrl,
            "requirepeer" => &mut self.requirepeer,
            "service" => &mut self.service,
            _ => {
                self.remainder.insert(key, value);
                return;
            }
        };
        *field = value;
    }

    /// The connect timeout, or `None` when unset or non-positive.
    pub fn connect_timeout(&self) -> Result<Option<Duration>> {
        parse_seconds("connect_timeout", &self.connect_timeout)
    }

    fn named_pairs(&self) -> Vec<(&'static str, String)> {
        let scalars: [(&'static str, &String); 22] = [
            ("dbname", &self.dbname),
            ("user", &self.user),
            ("password", &self.password),
            ("passfile", &self.passfile),
            ("connect_timeout", &self.connect_timeout),
            ("client_encoding", &self.client_encoding),
            ("options", &self.options),
            ("application_name", &self.application_name),
            ("fallback_application_name", &self.fallback_application_name),
            ("keepalives", &self.keepalives),
            ("keepalives_idle", &self.keepalives_idle),
            ("keepalives_interval", &self.keepalives_interval),
            ("keepalives_count", &self.keepalives_count),
            ("sslmode", &self.sslmode),
            ("requiressl", &self.requiressl),
            ("sslcompression", &self.sslcompression),
            ("sslcert", &self.sslcert),
            ("sslkey", &self.sslkey),
            ("sslrootcert", &self.sslrootcert),
            ("sslcrl", &self.sslcrl),
            ("requirepeer", &self.requirepeer),
            ("service", &self.service),
        ];

        let lists = [
            ("host", &self.host),
            ("hostaddr", &self.hostaddr),
            ("port", &self.port),
        ];

        let mut pairs = Vec::new();
        for (key, list) in lists {
            if !list.is_empty() {
                pairs.push((key, list.join(",")));
            }
        }
        for (key, value) in scalars {
            if !value.is_empty() {
                pairs.push((key, value.clone()));
            }
        }
        pairs
    }
}

impl std::str::FromStr for ConnectionString {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Renders the connection string back to keyword/value form with the
/// password masked.
impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut remainder: Vec<_> = self.remainder.iter().collect();
        remainder.sort();

        let named = self.named_pairs();
        let mut pairs: Vec<(&str, &str)> = named.iter().map(|(k, v)| (*k, v.as_str())).collect();
        pairs.extend(remainder.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        for (i, (key, value)) in pairs.into_iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            let value = if key == "password" { "********" } else { value };
            write!(f, "{}={}", grammar::quote(key), grammar::quote(value))?;
        }
        Ok(())
    }
}

fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(str::to_string).collect()
}

/// Parse a whole number of seconds; empty, zero and negative mean "none".
pub(crate) fn parse_seconds(key: &str, value: &str) -> Result<Option<Duration>> {
    if value.is_empty() {
        return Ok(None);
    }
    let secs: i64 = value.trim().parse().map_err(|_| {
        Error::Config(format!(
            "invalid {} '{}': expected a whole number of seconds",
            key, value
        ))
    })?;
    if secs <= 0 {
        return Ok(None);
    }
    Ok(Some(Duration::from_secs(secs as u64)))
}
