//! TLS setup for PostgreSQL connections.

use std::sync::Arc;

use rustls::ClientConfig;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{info, warn};

use crate::core::Database;

/// Certificate checking applied when `encrypt` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// Verify the server certificate and hostname against the webpki roots.
    #[default]
    Verify,
    /// Encrypt without verifying the server certificate.
    Insecure,
}

impl TlsMode {
    /// Mode for a descriptor; `trust_server_cert` skips verification.
    pub fn for_database(db: &Database) -> Self {
        if db.trust_server_cert {
            TlsMode::Insecure
        } else {
            TlsMode::Verify
        }
    }
}

/// Build a rustls connector for `mode`.
pub fn connector(mode: TlsMode) -> MakeRustlsConnect {
    MakeRustlsConnect::new(client_config(mode))
}

fn client_config(mode: TlsMode) -> ClientConfig {
    match mode {
        TlsMode::Verify => {
            let mut root_store = rustls::RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            info!("PostgreSQL TLS: certificate and hostname verification enabled");
            ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth()
        }
        TlsMode::Insecure => {
            warn!(
                "PostgreSQL TLS is enabled without server certificate verification. \
                 This is vulnerable to man-in-the-middle attacks."
            );
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
                .with_no_client_auth()
        }
    }
}

/// Accepts any server certificate.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_follows_trust_flag() {
        let mut db = Database::new("postgres");
        assert_eq!(TlsMode::for_database(&db), TlsMode::Verify);
        db.trust_server_cert = true;
        assert_eq!(TlsMode::for_database(&db), TlsMode::Insecure);
    }

    #[test]
    fn test_connectors_build() {
        let _ = connector(TlsMode::Verify);
        let _ = connector(TlsMode::Insecure);
    }
}
