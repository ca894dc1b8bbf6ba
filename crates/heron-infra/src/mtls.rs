//! mTLS configuration for gRPC connections to agents
//!
//! The server is the client side of every agent connection. It trusts only
//! the supplied root CA, presents its own identity, and verifies that the
//! agent's certificate matches the host or IP it dialed.

use std::path::Path;

use thiserror::Error;
use tonic::transport::{Certificate, ClientTlsConfig, Identity};
use zeroize::Zeroizing;

use crate::pki::{check_private_key_pem, CertificateInfo};

/// mTLS configuration errors
#[derive(Debug, Error)]
pub enum MtlsError {
    /// Certificate parsing error
    #[error("certificate parsing error: {0}")]
    CertificateParseError(String),

    /// Key parsing error
    #[error("key parsing error: {0}")]
    KeyParseError(String),

    /// Identity certificate is outside its validity window
    #[error("certificate {common_name} is not valid now (valid until {not_after})")]
    CertificateNotValid {
        /// Subject CN of the certificate
        common_name: String,
        /// Expiry as Unix timestamp
        not_after: i64,
    },

    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    TlsConfigError(String),

    /// Missing certificate
    #[error("missing certificate")]
    MissingCertificate,

    /// Reading PEM material from disk failed
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that could not be read
        path: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },
}

/// Client-side mTLS material used for every agent connection
#[derive(Clone)]
pub struct ClientMtlsConfig {
    /// Server certificate PEM presented to agents
    pub client_cert_pem: String,
    /// Server private key PEM (zeroized on drop)
    pub client_key_pem: Zeroizing<String>,
    /// Root CA certificate PEM used to verify agents
    pub ca_cert_pem: String,
}

impl std::fmt::Debug for ClientMtlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientMtlsConfig")
            .field("client_cert_pem", &"<pem>")
            .field("client_key_pem", &"<redacted>")
            .field("ca_cert_pem", &"<pem>")
            .finish()
    }
}

impl ClientMtlsConfig {
    /// Create a new client mTLS config
    pub fn new(
        client_cert_pem: String,
        client_key_pem: Zeroizing<String>,
        ca_cert_pem: String,
    ) -> Self {
        Self {
            client_cert_pem,
            client_key_pem,
            ca_cert_pem,
        }
    }

    /// Load PEM material from files
    pub fn from_files(
        client_cert_path: impl AsRef<Path>,
        client_key_path: impl AsRef<Path>,
        ca_cert_path: impl AsRef<Path>,
    ) -> Result<Self, MtlsError> {
        let client_cert_pem = read_pem(client_cert_path.as_ref())?;
        let client_key_pem = Zeroizing::new(read_pem(client_key_path.as_ref())?);
        let ca_cert_pem = read_pem(ca_cert_path.as_ref())?;
        Ok(Self::new(client_cert_pem, client_key_pem, ca_cert_pem))
    }

    /// Check that the material is usable.
    ///
    /// The CA and the identity must each hold a parseable X.509 certificate,
    /// the identity must be inside its validity window, and the key must be
    /// an unencrypted PEM private key.
    pub fn validate(&self) -> Result<(), MtlsError> {
        if self.ca_cert_pem.trim().is_empty() || self.client_cert_pem.trim().is_empty() {
            return Err(MtlsError::MissingCertificate);
        }

        CertificateInfo::from_pem(&self.ca_cert_pem)
            .map_err(|e| MtlsError::CertificateParseError(format!("root CA: {}", e)))?;

        let identity = CertificateInfo::from_pem(&self.client_cert_pem)
            .map_err(|e| MtlsError::CertificateParseError(format!("identity: {}", e)))?;
        if identity.is_expired() || identity.is_not_yet_valid() {
            return Err(MtlsError::CertificateNotValid {
                common_name: identity.common_name,
                not_after: identity.not_after,
            });
        }

        check_private_key_pem(&self.client_key_pem)
            .map_err(|e| MtlsError::KeyParseError(e.to_string()))?;

        Ok(())
    }

    /// Build a tonic ClientTlsConfig for an agent reachable under `domain`
    ///
    /// `domain` is the host part of the agent address (DNS name or IP
    /// literal) and is what the agent certificate must be issued for.
    pub fn to_tonic_config(&self, domain: &str) -> Result<ClientTlsConfig, MtlsError> {
        self.validate()?;

        let identity = Identity::from_pem(&self.client_cert_pem, self.client_key_pem.as_bytes());
        let ca_cert = Certificate::from_pem(&self.ca_cert_pem);

        Ok(ClientTlsConfig::new()
            .identity(identity)
            .ca_certificate(ca_cert)
            .domain_name(domain))
    }
}

fn read_pem(path: &Path) -> Result<String, MtlsError> {
    std::fs::read_to_string(path).map_err(|source| MtlsError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, KeyPair};

    fn self_signed(not_after_year: Option<i32>) -> (String, Zeroizing<String>) {
        let mut params = CertificateParams::new(vec!["localhost".to_string()])
            .expect("params should be valid");
        if let Some(year) = not_after_year {
            params.not_before = rcgen::date_time_ymd(year - 1, 1, 1);
            params.not_after = rcgen::date_time_ymd(year, 1, 1);
        }
        let key_pair = KeyPair::generate().expect("key pair generation should succeed");
        let cert = params
            .self_signed(&key_pair)
            .expect("self-signed cert creation should succeed");
        (cert.pem(), Zeroizing::new(key_pair.serialize_pem()))
    }

    fn test_config() -> ClientMtlsConfig {
        let (ca_pem, _) = self_signed(None);
        let (cert_pem, key_pem) = self_signed(None);
        ClientMtlsConfig::new(cert_pem, key_pem, ca_pem)
    }

    #[test]
    fn test_client_tls_config() {
        let config = test_config();
        assert!(config.validate().is_ok());
        assert!(config.to_tonic_config("agent.example.org").is_ok());
        assert!(config.to_tonic_config("192.0.2.1").is_ok());
    }

    #[test]
    fn test_missing_certificate() {
        let mut config = test_config();
        config.ca_cert_pem = String::new();
        assert!(matches!(
            config.to_tonic_config("localhost"),
            Err(MtlsError::MissingCertificate)
        ));
    }

    #[test]
    fn test_garbage_ca_rejected() {
        let mut config = test_config();
        config.ca_cert_pem = "not a certificate".to_string();
        let err = config.validate().expect_err("garbage CA must fail");
        assert!(matches!(err, MtlsError::CertificateParseError(_)));
        assert!(err.to_string().contains("root CA"));
    }

    #[test]
    fn test_expired_identity_rejected() {
        let (ca_pem, _) = self_signed(None);
        let (cert_pem, key_pem) = self_signed(Some(2001));
        let config = ClientMtlsConfig::new(cert_pem, key_pem, ca_pem);
        assert!(matches!(
            config.validate(),
            Err(MtlsError::CertificateNotValid { .. })
        ));
    }

    #[test]
    fn test_certificate_as_key_rejected() {
        let mut config = test_config();
        config.client_key_pem = Zeroizing::new(config.client_cert_pem.clone());
        assert!(matches!(
            config.validate(),
            Err(MtlsError::KeyParseError(_))
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = test_config();
        let debug = format!("{:?}", config);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("PRIVATE KEY"));
    }

    #[test]
    fn test_from_missing_files() {
        let err = ClientMtlsConfig::from_files(
            "/nonexistent/cert.pem",
            "/nonexistent/key.pem",
            "/nonexistent/ca.pem",
        )
        .expect_err("missing files must fail");
        assert!(matches!(err, MtlsError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/cert.pem"));
    }
}
