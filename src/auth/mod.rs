//! Transport trust for RemoteStash
//!
//! Every device shares one self-issued certificate. Servers present it during
//! the TLS handshake and clients pin it, falling back to the system trust
//! store for anything else.

use rustls::pki_types::CertificateDer;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod identity;
pub mod trust;

pub use identity::{fingerprint, GeneratedIdentity, TlsIdentity};
pub use trust::{TrustOutcome, TrustVerifier};

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No certificate found in a PEM file
    #[error("No certificate found in {0}")]
    NoCertificate(PathBuf),

    /// No private key found in a PEM file
    #[error("No private key found in {0}")]
    NoPrivateKey(PathBuf),

    /// Refusing to overwrite an existing identity
    #[error("{0} already exists")]
    AlreadyExists(PathBuf),

    /// Certificate generation failed
    #[error("Certificate generation failed: {0}")]
    Generate(String),

    /// TLS configuration error
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
}

/// The certificate every peer is expected to present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustContext {
    pinned: CertificateDer<'static>,
}

impl TrustContext {
    pub fn new(pinned: CertificateDer<'static>) -> Self {
        Self { pinned }
    }

    pub fn from_der(der: impl Into<Vec<u8>>) -> Self {
        Self::new(CertificateDer::from(der.into()))
    }

    /// Load the pinned certificate from a PEM or DER file.
    ///
    /// For PEM input the first certificate in the file is pinned.
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let bytes = std::fs::read(path)?;

        if bytes.starts_with(b"-----BEGIN") {
            let certificate = identity::read_certificates(&bytes, path)?
                .into_iter()
                .next()
                .ok_or_else(|| AuthError::NoCertificate(path.to_path_buf()))?;
            Ok(Self::new(certificate))
        } else if bytes.is_empty() {
            Err(AuthError::NoCertificate(path.to_path_buf()))
        } else {
            Ok(Self::from_der(bytes))
        }
    }

    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.pinned
    }

    /// Byte-identical comparison against the pinned certificate
    pub fn matches(&self, presented: &CertificateDer<'_>) -> bool {
        self.pinned.as_ref() == presented.as_ref()
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(self.pinned.as_ref())
    }
}
