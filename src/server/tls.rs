//! TLS for frontend connections

use crate::connection::{crypto_provider, load_certs, load_private_key};
use crate::{Error, Result};
use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Build an acceptor from a PEM certificate chain file and private key file.
pub fn acceptor_from_pem_files(cert_path: &str, key_path: &str) -> Result<TlsAcceptor> {
    acceptor(load_certs(cert_path)?, load_private_key(key_path)?)
}

/// Build an acceptor from DER-encoded certificates and key.
pub fn acceptor(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<TlsAcceptor> {
    let config = ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Config(format!("unsupported TLS protocol versions: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Config(format!("invalid server certificate or key: {}", e)))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use rcgen::{generate_simple_self_signed, CertifiedKey};
    use rustls_pki_types::PrivatePkcs8KeyDer;

    #[test]
    fn test_acceptor_from_generated_cert() {
        let CertifiedKey { cert, key_pair } =
            generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
        assert!(acceptor(vec![cert.der().clone()], key).is_ok());
    }

    #[test]
    fn test_acceptor_from_pem_files() {
        let CertifiedKey { cert, key_pair } =
            generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let dir = tempdir().unwrap();
        let cert_path = dir.path().join("server.crt");
        let key_path = dir.path().join("server.key");
        std::fs::write(&cert_path, cert.pem()).unwrap();
        std::fs::write(&key_path, key_pair.serialize_pem()).unwrap();

        assert!(acceptor_from_pem_files(cert_path.as_str(), key_path.as_str()).is_ok());
    }

    #[test]
    fn test_key_file_without_key_fails() {
        let CertifiedKey { cert, .. } =
            generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let dir = tempdir().unwrap();
        let cert_path = dir.path().join("server.crt");
        std::fs::write(&cert_path, cert.pem()).unwrap();

        let err = match acceptor_from_pem_files(cert_path.as_str(), cert_path.as_str()) {
            Ok(_) => panic!("a certificate file is not a private key"),
            Err(e) => e,
        };
        assert!(matches!(err, Error::Config(_)), "{:?}", err);
        assert!(err.to_string().contains("no private key"));
    }
}
