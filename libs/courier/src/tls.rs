//! TLS client configurations for each [`Verify`](crate::Verify) mode.
//!
//! Native root certificates are loaded once per process and cached, since
//! OS certificate store lookups can be slow on some platforms.

use crate::error::HttpError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::{DigitallySignedStruct, SignatureScheme};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// Cached native root certificates (empty when none were found).
static NATIVE_ROOTS_CACHE: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

#[cfg(test)]
static LOAD_COUNT: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

fn load_native_certs_inner() -> Vec<CertificateDer<'static>> {
    #[cfg(test)]
    LOAD_COUNT.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

    let result = rustls_native_certs::load_native_certs();
    for err in &result.errors {
        tracing::warn!(error = %err, "error loading native root certificate");
    }

    if result.certs.is_empty() {
        tracing::warn!("no native root CA certificates found");
    } else {
        tracing::debug!(count = result.certs.len(), "loaded native root certificates");
    }

    result.certs
}

/// Native root certificates, loaded on first use.
pub fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS_CACHE
        .get_or_init(load_native_certs_inner)
        .as_slice()
}

/// The globally installed crypto provider, or aws-lc-rs without installing it.
pub fn get_crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

fn client_config_with_roots(
    roots: rustls::RootCertStore,
) -> Result<rustls::ClientConfig, HttpError> {
    Ok(
        rustls::ClientConfig::builder_with_provider(get_crypto_provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| HttpError::Tls(Box::new(e)))?
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

fn root_store_from(
    certs: impl IntoIterator<Item = CertificateDer<'static>>,
    origin: &str,
) -> Result<rustls::RootCertStore, HttpError> {
    let mut root_store = rustls::RootCertStore::empty();
    let (added, ignored) = root_store.add_parsable_certificates(certs);

    if ignored > 0 {
        tracing::warn!(added, ignored, origin, "some root certificates could not be parsed");
    }
    if added == 0 {
        return Err(HttpError::Tls(
            format!("no valid root CA certificates in {origin}").into(),
        ));
    }
    Ok(root_store)
}

/// Client config trusting the cached OS root certificates.
///
/// # Errors
/// Returns [`HttpError::Tls`] if the OS store holds no usable certificates.
pub fn native_roots_client_config() -> Result<rustls::ClientConfig, HttpError> {
    let roots = root_store_from(native_root_certs().iter().cloned(), "OS certificate store")?;
    client_config_with_roots(roots)
}

/// Client config trusting only the PEM certificates in `path`.
///
/// # Errors
/// Returns [`HttpError::Tls`] if the file cannot be read or holds no certificates.
pub fn ca_bundle_client_config(path: &Path) -> Result<rustls::ClientConfig, HttpError> {
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|e| HttpError::Tls(Box::new(e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| HttpError::Tls(Box::new(e)))?;

    let roots = root_store_from(certs, &path.display().to_string())?;
    client_config_with_roots(roots)
}

/// Client config that accepts any server certificate.
///
/// Handshake signatures are still checked so the connection is at least
/// bound to the presented key.
///
/// # Errors
/// Returns [`HttpError::Tls`] if the crypto provider rejects the protocol versions.
pub fn insecure_client_config() -> Result<rustls::ClientConfig, HttpError> {
    let provider = get_crypto_provider();
    Ok(
        rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| HttpError::Tls(Box::new(e)))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
            .with_no_client_auth(),
    )
}

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
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
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
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
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

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    /// The loader runs at most once, however many tests touch the cache.
    #[test]
    fn test_native_roots_cached() {
        let initial_count = LOAD_COUNT.load(Ordering::SeqCst);

        let first = native_root_certs();
        let second = native_root_certs();

        let final_count = LOAD_COUNT.load(Ordering::SeqCst);
        assert!(final_count <= initial_count + 1);
        assert!(std::ptr::eq(first, second), "should return same slice");
    }

    #[test]
    fn test_native_roots_client_config_does_not_panic() {
        // Minimal containers have no OS certificates; both results are acceptable.
        if let Err(e) = native_roots_client_config() {
            assert!(matches!(e, HttpError::Tls(_)));
        }
    }

    #[test]
    fn test_missing_ca_bundle_is_tls_error() {
        let err = ca_bundle_client_config(Path::new("/definitely/not/here.pem")).unwrap_err();
        assert!(matches!(err, HttpError::Tls(_)));
    }

    #[test]
    fn test_ca_bundle_without_certificates_is_rejected() {
        let dir = std::env::temp_dir().join(format!("courier-tls-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("empty.pem");
        std::fs::write(&path, "not a certificate\n").unwrap();

        let err = ca_bundle_client_config(&path).unwrap_err();
        assert!(err.to_string().contains("no valid root CA certificates"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_insecure_config_builds() {
        let config = insecure_client_config().unwrap();
        assert!(config.alpn_protocols.is_empty());
    }
}
