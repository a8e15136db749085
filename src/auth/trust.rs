//! Server certificate verification for outbound connections

use super::{AuthError, TrustContext};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, Error as TlsError, RootCertStore, SignatureScheme};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of evaluating a presented certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustOutcome {
    /// Byte-identical to the pinned certificate
    Pinned,
    /// Accepted by the system trust store
    SystemTrusted,
    /// Neither; the handshake must be cancelled
    Rejected(String),
}

impl TrustOutcome {
    pub fn is_trusted(&self) -> bool {
        !matches!(self, TrustOutcome::Rejected(_))
    }
}

/// Pinned-certificate check with a trust-store fallback
#[derive(Debug)]
pub struct TrustVerifier {
    context: TrustContext,
    provider: Arc<CryptoProvider>,
    fallback: Option<Arc<WebPkiServerVerifier>>,
}

impl TrustVerifier {
    /// Verifier backed by the bundled web PKI roots
    pub fn new(context: TrustContext) -> Self {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        Self::with_roots(context, roots)
    }

    /// Verifier over an explicit root store
    pub fn with_roots(context: TrustContext, mut roots: RootCertStore) -> Self {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        // The pinned certificate also anchors chains it has issued
        if let Err(e) = roots.add(context.certificate().clone()) {
            debug!("Pinned certificate is not usable as a trust anchor: {}", e);
        }

        let fallback = if roots.is_empty() {
            None
        } else {
            WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
                .build()
                .map_err(|e| warn!("System trust evaluation unavailable: {}", e))
                .ok()
        };

        Self {
            context,
            provider,
            fallback,
        }
    }

    pub fn context(&self) -> &TrustContext {
        &self.context
    }

    /// Decide whether a presented certificate chain is acceptable
    pub fn evaluate(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> TrustOutcome {
        if self.context.matches(end_entity) {
            return TrustOutcome::Pinned;
        }

        let Some(fallback) = &self.fallback else {
            return TrustOutcome::Rejected("no trust store available".to_string());
        };

        match fallback.verify_server_cert(end_entity, intermediates, server_name, &[], now) {
            Ok(_) => TrustOutcome::SystemTrusted,
            Err(e) => TrustOutcome::Rejected(e.to_string()),
        }
    }

    /// Client TLS configuration that verifies servers with this verifier
    pub fn client_config(self: &Arc<Self>) -> Result<ClientConfig, AuthError> {
        let config = ClientConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(self.clone())
            .with_no_client_auth();
        Ok(config)
    }
}

impl ServerCertVerifier for TrustVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        match self.evaluate(end_entity, intermediates, server_name, now) {
            TrustOutcome::Pinned => {
                debug!("Server presented the pinned certificate");
                Ok(ServerCertVerified::assertion())
            }
            TrustOutcome::SystemTrusted => {
                debug!("Server certificate trusted by system policy");
                Ok(ServerCertVerified::assertion())
            }
            TrustOutcome::Rejected(reason) => {
                warn!("Rejecting server certificate: {}", reason);
                Err(TlsError::General(reason))
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
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
    ) -> Result<HandshakeSignatureValid, TlsError> {
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
mod tests {
    use super::*;
    use crate::auth::TlsIdentity;

    fn server_name() -> ServerName<'static> {
        ServerName::try_from("remotestash.local").unwrap()
    }

    #[test]
    fn test_pinned_accepted_without_roots() {
        let identity = TlsIdentity::generate().unwrap().identity;
        let verifier = TrustVerifier::with_roots(identity.trust_context(), RootCertStore::empty());

        let outcome = verifier.evaluate(
            identity.certificate(),
            &[],
            &server_name(),
            UnixTime::now(),
        );
        assert_eq!(outcome, TrustOutcome::Pinned);
    }

    #[test]
    fn test_pinned_accepted_with_system_roots() {
        let identity = TlsIdentity::generate().unwrap().identity;
        let verifier = TrustVerifier::new(identity.trust_context());

        let outcome = verifier.evaluate(
            identity.certificate(),
            &[],
            &server_name(),
            UnixTime::now(),
        );
        assert_eq!(outcome, TrustOutcome::Pinned);
    }

    #[test]
    fn test_other_self_signed_rejected() {
        let pinned = TlsIdentity::generate().unwrap().identity;
        let stranger = TlsIdentity::generate().unwrap().identity;
        let verifier = TrustVerifier::new(pinned.trust_context());

        let outcome = verifier.evaluate(
            stranger.certificate(),
            &[],
            &server_name(),
            UnixTime::now(),
        );
        assert!(!outcome.is_trusted());
    }

    #[test]
    fn test_verify_server_cert_maps_outcome() {
        let pinned = TlsIdentity::generate().unwrap().identity;
        let stranger = TlsIdentity::generate().unwrap().identity;
        let verifier = TrustVerifier::new(pinned.trust_context());

        assert!(verifier
            .verify_server_cert(pinned.certificate(), &[], &server_name(), &[], UnixTime::now())
            .is_ok());
        assert!(verifier
            .verify_server_cert(stranger.certificate(), &[], &server_name(), &[], UnixTime::now())
            .is_err());
    }

    #[test]
    fn test_client_config_builds() {
        let identity = TlsIdentity::generate().unwrap().identity;
        let verifier = Arc::new(TrustVerifier::new(identity.trust_context()));
        assert!(verifier.client_config().is_ok());
        assert!(!verifier.supported_verify_schemes().is_empty());
    }
}
