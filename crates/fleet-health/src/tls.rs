//! TLS client configuration for relay management APIs.
//!
//! Relays serve their management API with a self-signed certificate whose
//! SHA-256 fingerprint is recorded when the server is added. When a
//! fingerprint is known the leaf certificate is pinned to it; otherwise the
//! Mozilla root store is used.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, Error, SignatureScheme};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// A certificate fingerprint that cannot be used for pinning.
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("fingerprint is not hex: {0}")]
    NotHex(#[from] hex::FromHexError),

    #[error("fingerprint must be 32 bytes, got {0}")]
    Length(usize),

    #[error("tls config: {0}")]
    Tls(#[from] Error),
}

/// Parse a hex SHA-256 fingerprint. Case, `:` separators and whitespace are ignored.
pub fn parse_fingerprint(fingerprint: &str) -> Result<[u8; 32], FingerprintError> {
    let cleaned: String = fingerprint
        .chars()
        .filter(|c| *c != ':' && !c.is_whitespace())
        .collect();
    let bytes = hex::decode(cleaned)?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| FingerprintError::Length(len))
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Client config trusting the Mozilla root store.
pub fn webpki_config() -> Result<Arc<ClientConfig>, Error> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Client config accepting only a leaf certificate with the given fingerprint.
pub fn pinned_config(fingerprint: &str) -> Result<Arc<ClientConfig>, FingerprintError> {
    let verifier = PinnedCertVerifier::new(parse_fingerprint(fingerprint)?);
    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Accepts exactly one leaf certificate, identified by its SHA-256 digest.
///
/// Chain and hostname are not checked; handshake signatures still are.
#[derive(Debug)]
pub struct PinnedCertVerifier {
    expected: [u8; 32],
    provider: Arc<CryptoProvider>,
}

impl PinnedCertVerifier {
    pub fn new(expected: [u8; 32]) -> Self {
        Self {
            expected,
            provider: provider(),
        }
    }
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        let digest = Sha256::digest(end_entity.as_ref());
        if digest.as_slice() == self.expected.as_slice() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
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
    ) -> Result<HandshakeSignatureValid, Error> {
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
