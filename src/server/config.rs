//! Server configuration

use super::tls::acceptor_from_pem_files;
use crate::Result;
use std::time::Duration;
use tokio_rustls::TlsAcceptor;

/// Delay policy for transient accept failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failure
    Fixed(Duration),
    /// Doubling delay, starting at `initial` and capped at `max`
    Exponential {
        /// Delay after the first failure
        initial: Duration,
        /// Upper bound
        max: Duration,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed(Duration::from_millis(5))
    }
}

impl Backoff {
    /// Delay after `failures` consecutive failures (0 for the first one)
    pub fn delay(&self, failures: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => {
                let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Server configuration
#[derive(Clone, Default)]
pub struct ServerConfig {
    /// TLS acceptor offered to clients that send an SSLRequest; `None`
    /// rejects TLS
    pub tls: Option<TlsAcceptor>,
    /// Delay policy for transient accept failures
    pub backoff: Backoff,
}

impl ServerConfig {
    /// Create a new configuration builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("tls", &self.tls.as_ref().map(|_| "<TlsAcceptor>"))
            .field("backoff", &self.backoff)
            .finish()
    }
}

/// Builder for server configuration
#[derive(Default)]
pub struct ServerConfigBuilder {
    tls: Option<TlsAcceptor>,
    backoff: Backoff,
}

impl ServerConfigBuilder {
    /// Offer TLS to clients with this acceptor
    pub fn tls_acceptor(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    /// Offer TLS using a PEM certificate chain and private key
    pub fn tls_pem_files(self, cert_path: &str, key_path: &str) -> Result<Self> {
        Ok(self.tls_acceptor(acceptor_from_pem_files(cert_path, key_path)?))
    }

    /// Set the accept backoff policy
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            tls: self.tls,
            backoff: self.backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backoff_is_fixed() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(0), Duration::from_millis(5));
        assert_eq!(backoff.delay(10), Duration::from_millis(5));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_millis(5),
            max: Duration::from_secs(1),
        };
        assert_eq!(backoff.delay(0), Duration::from_millis(5));
        assert_eq!(backoff.delay(1), Duration::from_millis(10));
        assert_eq!(backoff.delay(3), Duration::from_millis(40));
        assert_eq!(backoff.delay(20), Duration::from_secs(1));
        assert_eq!(backoff.delay(200), Duration::from_secs(1));
    }

    #[test]
    fn test_builder_defaults() {
        let config = ServerConfig::builder().build();
        assert!(config.tls.is_none());
        assert_eq!(config.backoff, Backoff::default());
        assert!(format!("{:?}", config).contains("ServerConfig"));
    }

    #[test]
    fn test_missing_pem_files_fail() {
        assert!(ServerConfig::builder()
            .tls_pem_files("/nonexistent/server.crt", "/nonexistent/server.key")
            .is_err());
    }
}
