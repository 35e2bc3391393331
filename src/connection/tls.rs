//! TLS configuration for backend connections.
//!
//! The `sslmode` of a connection string decides both whether TLS is attempted
//! and how much of the server certificate is checked:
//!
//! | mode          | TLS                   | certificate check        |
//! |---------------|-----------------------|--------------------------|
//! | `disable`     | never                 | -                        |
//! | `allow`       | attempted, optional   | none                     |
//! | `prefer`      | attempted, optional   | none                     |
//! | `require`     | mandatory             | none                     |
//! | `verify-ca`   | mandatory             | chain to a trusted root  |
//! | `verify-full` | mandatory             | chain and host name      |

use crate::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pemfile::Item;
use rustls_pki_types::{
    CertificateDer, CertificateRevocationListDer, PrivateKeyDer, ServerName, UnixTime,
};
use std::fs;
use std::io::BufReader;
use std::net::IpAddr;
use std::sync::Arc;

/// SSL/TLS connection mode matching PostgreSQL `sslmode` parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SslMode {
    /// No TLS (plaintext connection). An empty `sslmode` means this.
    #[default]
    Disable,
    /// TLS attempted, plaintext accepted if the server declines
    Allow,
    /// TLS attempted, plaintext accepted if the server declines
    Prefer,
    /// TLS required, server certificate is not verified
    Require,
    /// TLS required, server certificate must chain to a trusted root
    VerifyCa,
    /// TLS required, server certificate must chain to a trusted root and match the host name
    VerifyFull,
}

impl SslMode {
    /// Whether an SSLRequest is sent at all
    pub fn attempts_tls(&self) -> bool {
        !matches!(self, Self::Disable)
    }

    /// Whether a server that declines TLS is an error
    pub fn requires_tls(&self) -> bool {
        matches!(self, Self::Require | Self::VerifyCa | Self::VerifyFull)
    }

    /// Whether this mode requires certificate verification (CA or full)
    pub fn requires_verification(&self) -> bool {
        matches!(self, Self::VerifyCa | Self::VerifyFull)
    }
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disable => write!(f, "disable"),
            Self::Allow => write!(f, "allow"),
            Self::Prefer => write!(f, "prefer"),
            Self::Require => write!(f, "require"),
            Self::VerifyCa => write!(f, "verify-ca"),
            Self::VerifyFull => write!(f, "verify-full"),
        }
    }
}

impl std::str::FromStr for SslMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "" | "disable" => Ok(Self::Disable),
            "allow" => Ok(Self::Allow),
            "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-full" => Ok(Self::VerifyFull),
            _ => Err(Error::Config(format!(
                "invalid sslmode '{}': expected disable, allow, prefer, require, verify-ca, or verify-full",
                s
            ))),
        }
    }
}

/// TLS configuration for backend connections.
///
/// Holds the compiled rustls [`ClientConfig`] for one `sslmode`, including
/// the trust roots, revocation lists and client certificate that mode needs.
///
/// # Examples
///
/// ```ignore
/// use pgtwixt::connection::{SslMode, TlsConfig};
///
/// let tls = TlsConfig::builder()
///     .mode(SslMode::VerifyFull)
///     .ca_cert_path("/etc/pgtwixt/root.crt")
///     .build()?;
/// ```
#[derive(Clone)]
pub struct TlsConfig {
    mode: SslMode,
    ca_cert_path: Option<String>,
    client_cert_path: Option<String>,
    crl_path: Option<String>,
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Create a new TLS configuration builder.
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// Get the rustls ClientConfig for this TLS configuration.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }

    /// The mode this configuration was built for
    pub fn mode(&self) -> SslMode {
        self.mode
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("mode", &self.mode)
            .field("ca_cert_path", &self.ca_cert_path)
            .field("client_cert_path", &self.client_cert_path)
            .field("crl_path", &self.crl_path)
            .field("client_config", &"<ClientConfig>")
            .finish()
    }
}

/// Builder for TLS configuration.
#[derive(Debug, Default)]
pub struct TlsConfigBuilder {
    mode: SslMode,
    ca_cert_path: Option<String>,
    client_cert_path: Option<String>,
    client_key_path: Option<String>,
    crl_path: Option<String>,
}

impl TlsConfigBuilder {
    /// Set the `sslmode` the configuration is for.
    pub fn mode(mut self, mode: SslMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the path to the trusted root certificates (PEM format).
    ///
    /// If not set, system root certificates are used, falling back to the
    /// bundled Mozilla roots when the system has none.
    pub fn ca_cert_path(mut self, path: impl Into<String>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Present a client certificate (PEM chain and private key).
    pub fn client_cert(mut self, cert_path: impl Into<String>, key_path: impl Into<String>) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self
    }

    /// Check server certificates against a revocation list (PEM format).
    pub fn crl_path(mut self, path: impl Into<String>) -> Self {
        self.crl_path = Some(path.into());
        self
    }

    /// Build the TLS configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a certificate, key or CRL file cannot be
    /// read or parsed.
    pub fn build(self) -> Result<TlsConfig> {
        let provider = crypto_provider();

        let verifier: Arc<dyn ServerCertVerifier> = if self.mode.requires_verification() {
            let roots = match &self.ca_cert_path {
                Some(path) => load_custom_ca(path)?,
                None => system_roots(),
            };
            let mut builder = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone());
            if let Some(path) = &self.crl_path {
                builder = builder.with_crls(load_crls(path)?);
            }
            let webpki = builder
                .build()
                .map_err(|e| Error::Config(format!("failed to build certificate verifier: {}", e)))?;

            if self.mode == SslMode::VerifyFull {
                webpki as Arc<dyn ServerCertVerifier>
            } else {
                Arc::new(IgnoreHostName { inner: webpki }) as Arc<dyn ServerCertVerifier>
            }
        } else {
            Arc::new(AcceptAnyCertificate {
                provider: provider.clone(),
            }) as Arc<dyn ServerCertVerifier>
        };

        let builder = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Config(format!("unsupported TLS protocol versions: {}", e)))?
            .dangerous()
            .with_custom_certificate_verifier(verifier);

        let client_config = match (&self.client_cert_path, &self.client_key_path) {
            (Some(cert_path), Some(key_path)) => builder
                .with_client_auth_cert(load_certs(cert_path)?, load_private_key(key_path)?)
                .map_err(|e| Error::Config(format!("invalid client certificate: {}", e)))?,
            _ => builder.with_no_client_auth(),
        };

        Ok(TlsConfig {
            mode: self.mode,
            ca_cert_path: self.ca_cert_path,
            client_cert_path: self.client_cert_path,
            crl_path: self.crl_path,
            client_config: Arc::new(client_config),
        })
    }
}

/// The process-wide rustls provider, or aws-lc-rs if none was installed.
pub(crate) fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

fn system_roots() -> RootCertStore {
    let result = rustls_native_certs::load_native_certs();

    let mut store = RootCertStore::empty();
    for cert in result.certs {
        let _ = store.add_parsable_certificates(std::iter::once(cert));
    }

    if store.is_empty() {
        tracing::debug!(
            errors = result.errors.len(),
            "no system root certificates, using bundled roots"
        );
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    store
}

/// Load trusted root certificates from a PEM file.
fn load_custom_ca(ca_path: &str) -> Result<RootCertStore> {
    let ca_cert_data = fs::read(ca_path).map_err(|e| {
        Error::Config(format!(
            "failed to read root certificate file '{}': {}",
            ca_path, e
        ))
    })?;

    let mut reader = std::io::Cursor::new(&ca_cert_data);
    let mut root_store = RootCertStore::empty();
    let mut found_certs = 0;

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(Item::X509Certificate(cert))) => {
                let _ = root_store.add_parsable_certificates(std::iter::once(cert));
                found_certs += 1;
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(_) => {
                return Err(Error::Config(format!(
                    "failed to parse root certificate from '{}'",
                    ca_path
                )));
            }
        }
    }

    if found_certs == 0 {
        return Err(Error::Config(format!(
            "no valid certificates found in '{}'",
            ca_path
        )));
    }

    Ok(root_store)
}

fn open_pem(path: &str, what: &str) -> Result<BufReader<fs::File>> {
    let file = fs::File::open(path)
        .map_err(|e| Error::Config(format!("failed to open {} '{}': {}", what, path, e)))?;
    Ok(BufReader::new(file))
}

/// Load a PEM certificate chain.
pub(crate) fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open_pem(path, "certificate file")?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("failed to parse certificates in '{}': {}", path, e)))?;
    if certs.is_empty() {
        return Err(Error::Config(format!("no certificates found in '{}'", path)));
    }
    Ok(certs)
}

/// Load the first private key in a PEM file.
pub(crate) fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open_pem(path, "private key file")?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::Config(format!("failed to parse private key in '{}': {}", path, e)))?
        .ok_or_else(|| Error::Config(format!("no private key found in '{}'", path)))
}

fn load_crls(path: &str) -> Result<Vec<CertificateRevocationListDer<'static>>> {
    let mut reader = open_pem(path, "CRL file")?;
    rustls_pemfile::crls(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("failed to parse CRLs in '{}': {}", path, e)))
}

/// Server name presented for SNI and checked by `verify-full`.
///
/// Falls back to the IP address being dialed when no host name was
/// configured.
pub fn server_name(host: &str, address: &str) -> Result<ServerName<'static>> {
    let host = host.trim_end_matches('.');
    if !host.is_empty() {
        return ServerName::try_from(host.to_string())
            .map_err(|_| Error::Config(format!("invalid host name for TLS: '{}'", host)));
    }

    let ip = address
        .rsplit_once(':')
        .map(|(ip, _port)| ip.trim_start_matches('[').trim_end_matches(']'))
        .unwrap_or(address);
    let ip: IpAddr = ip
        .parse()
        .map_err(|_| Error::Config(format!("no server name available for '{}'", address)))?;
    Ok(ServerName::IpAddress(ip.into()))
}

/// Completes the handshake whatever certificate is presented, while still
/// checking that the server owns the key it presented.
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// `verify-ca`: the full WebPKI check minus the host name comparison.
#[derive(Debug)]
struct IgnoreHostName {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for IgnoreHostName {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        // The chain is validated before the name, so a name error implies a
        // trusted chain.
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(rustls::Error::InvalidCertificate(CertificateError::NotValidForName))
            | Err(rustls::Error::InvalidCertificate(CertificateError::NotValidForNameContext {
                ..
            })) => Ok(ServerCertVerified::assertion()),
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
