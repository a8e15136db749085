//! The shared self-issued TLS identity

use super::{AuthError, TrustContext};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Names the generated certificate is valid for
const SUBJECT_ALT_NAMES: [&str; 2] = ["remotestash.local", "localhost"];

/// Certificate chain and private key presented by the exchange server
#[derive(Debug)]
pub struct TlsIdentity {
    certificates: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
}

/// A freshly generated identity together with its PEM encoding
#[derive(Debug)]
pub struct GeneratedIdentity {
    pub cert_pem: String,
    pub key_pem: String,
    pub identity: TlsIdentity,
}

impl Clone for TlsIdentity {
    fn clone(&self) -> Self {
        Self {
            certificates: self.certificates.clone(),
            private_key: self.private_key.clone_key(),
        }
    }
}

impl TlsIdentity {
    /// Load the identity from PEM files
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, AuthError> {
        let cert_pem = fs::read(cert_path)?;
        let key_pem = fs::read(key_path)?;

        let certificates = read_certificates(&cert_pem, cert_path)?;
        let mut reader = BufReader::new(key_pem.as_slice());
        let private_key = rustls_pemfile::private_key(&mut reader)?
            .ok_or_else(|| AuthError::NoPrivateKey(key_path.to_path_buf()))?;

        debug!("Loaded TLS identity from {}", cert_path.display());
        Ok(Self {
            certificates,
            private_key,
        })
    }

    /// Generate a new self-signed identity
    pub fn generate() -> Result<GeneratedIdentity, AuthError> {
        let names: Vec<String> = SUBJECT_ALT_NAMES.iter().map(|s| s.to_string()).collect();
        let certified = rcgen::generate_simple_self_signed(names)
            .map_err(|e| AuthError::Generate(e.to_string()))?;

        let cert_pem = certified.cert.pem();
        let key_pem = certified.signing_key.serialize_pem();
        let private_key =
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.signing_key.serialize_der()));

        Ok(GeneratedIdentity {
            cert_pem,
            key_pem,
            identity: TlsIdentity {
                certificates: vec![certified.cert.der().clone()],
                private_key,
            },
        })
    }

    /// Generate an identity and write it to disk; existing files are kept
    /// unless `force` is set
    pub fn generate_to(
        cert_path: &Path,
        key_path: &Path,
        force: bool,
    ) -> Result<GeneratedIdentity, AuthError> {
        for path in [cert_path, key_path] {
            if path.exists() && !force {
                return Err(AuthError::AlreadyExists(path.to_path_buf()));
            }
        }

        let generated = Self::generate()?;

        for path in [cert_path, key_path] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(cert_path, &generated.cert_pem)?;
        fs::write(key_path, &generated.key_pem)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(key_path, fs::Permissions::from_mode(0o600))?;
        }

        info!(
            "Wrote certificate {} ({})",
            cert_path.display(),
            generated.identity.fingerprint()
        );
        Ok(generated)
    }

    /// Leaf certificate
    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.certificates[0]
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(self.certificate().as_ref())
    }

    /// Pin our own certificate
    pub fn trust_context(&self) -> TrustContext {
        TrustContext::new(self.certificate().clone())
    }

    /// TLS server configuration presenting this identity
    pub fn server_config(&self) -> Result<ServerConfig, AuthError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(self.certificates.clone(), self.private_key.clone_key())?;
        Ok(config)
    }
}

/// Parse every certificate in a PEM buffer
pub(crate) fn read_certificates(
    pem: &[u8],
    source: &Path,
) -> Result<Vec<CertificateDer<'static>>, AuthError> {
    let mut reader = BufReader::new(pem);
    let certificates = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    if certificates.is_empty() {
        return Err(AuthError::NoCertificate(source.to_path_buf()));
    }
    Ok(certificates)
}

/// SHA-256 fingerprint as colon-separated uppercase hex
pub fn fingerprint(der: &[u8]) -> String {
    let digest = Sha256::digest(der);
    hex::encode_upper(digest)
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generate_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let cert_path = temp_dir.path().join("tls/cert.pem");
        let key_path = temp_dir.path().join("tls/key.pem");

        let generated = TlsIdentity::generate_to(&cert_path, &key_path, false).unwrap();
        let loaded = TlsIdentity::load(&cert_path, &key_path).unwrap();

        assert_eq!(loaded.certificate(), generated.identity.certificate());
        assert_eq!(loaded.fingerprint(), generated.identity.fingerprint());
        assert!(loaded.server_config().is_ok());
    }

    #[test]
    fn test_generate_refuses_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let cert_path = temp_dir.path().join("cert.pem");
        let key_path = temp_dir.path().join("key.pem");

        TlsIdentity::generate_to(&cert_path, &key_path, false).unwrap();
        let again = TlsIdentity::generate_to(&cert_path, &key_path, false);
        assert!(matches!(again, Err(AuthError::AlreadyExists(_))));

        assert!(TlsIdentity::generate_to(&cert_path, &key_path, true).is_ok());
    }

    #[test]
    fn test_fingerprint_format() {
        let fp = fingerprint(b"remotestash");
        assert_eq!(fp.len(), 32 * 3 - 1);
        assert!(fp.split(':').all(|byte| byte.len() == 2));
        assert_eq!(fp, fp.to_uppercase());
    }

    #[test]
    fn test_missing_key_reports_path() {
        let temp_dir = TempDir::new().unwrap();
        let generated = TlsIdentity::generate().unwrap();
        let cert_path = temp_dir.path().join("cert.pem");
        let key_path = temp_dir.path().join("key.pem");
        fs::write(&cert_path, &generated.cert_pem).unwrap();
        fs::write(&key_path, &generated.cert_pem).unwrap();

        assert!(matches!(
            TlsIdentity::load(&cert_path, &key_path),
            Err(AuthError::NoPrivateKey(_))
        ));
    }
}
