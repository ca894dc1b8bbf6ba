//! PEM and X.509 inspection for mTLS material
//!
//! The server never generates or stores keys here; certificates and keys are
//! handed over by the key/cert store. This module only checks that what was
//! handed over is usable before it is given to the TLS stack, so that a bad
//! certificate surfaces as a readable error instead of an opaque handshake
//! failure.

use chrono::Utc;
use thiserror::Error;
use x509_parser::prelude::*;

/// PEM tag of an X.509 certificate
pub const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// Certificate or key parsing error
    #[error("certificate parsing error: {0}")]
    ParseError(String),

    /// PEM block has an unexpected tag
    #[error("unexpected PEM block: expected {expected}, found {found}")]
    UnexpectedTag {
        /// Tag that was expected (e.g. "CERTIFICATE")
        expected: String,
        /// Tag that was found
        found: String,
    },
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

/// Information about a certificate's validity
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    /// When the certificate becomes valid (Unix timestamp)
    pub not_before: i64,
    /// When the certificate expires (Unix timestamp)
    pub not_after: i64,
    /// Subject common name
    pub common_name: String,
}

impl CertificateInfo {
    /// Parse certificate info from PEM-encoded certificate
    pub fn from_pem(pem_data: &str) -> Result<Self> {
        let block = parse_pem_block(pem_data)?;
        if block.tag() != CERTIFICATE_TAG {
            return Err(PkiError::UnexpectedTag {
                expected: CERTIFICATE_TAG.to_string(),
                found: block.tag().to_string(),
            });
        }
        Self::from_der(block.contents())
    }

    /// Parse certificate info from DER-encoded certificate
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;

        let not_before = cert.validity().not_before.timestamp();
        let not_after = cert.validity().not_after.timestamp();

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("")
            .to_string();

        Ok(Self {
            not_before,
            not_after,
            common_name,
        })
    }

    /// Seconds remaining until certificate expires
    pub fn remaining_secs(&self) -> i64 {
        self.not_after - Utc::now().timestamp()
    }

    /// Check if certificate has expired
    pub fn is_expired(&self) -> bool {
        self.remaining_secs() <= 0
    }

    /// Check if the certificate's validity window has not started yet
    pub fn is_not_yet_valid(&self) -> bool {
        Utc::now().timestamp() < self.not_before
    }
}

/// Parse PEM-encoded data and return the DER bytes
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    Ok(parse_pem_block(pem_data)?.contents().to_vec())
}

/// Parse the first PEM block
pub fn parse_pem_block(pem_data: &str) -> Result<::pem::Pem> {
    ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {}", e)))
}

/// Check that the PEM data holds a private key.
///
/// Accepts PKCS#8 (`PRIVATE KEY`), SEC1 (`EC PRIVATE KEY`) and PKCS#1
/// (`RSA PRIVATE KEY`) blocks. Encrypted keys are rejected since the TLS
/// stack cannot use them without a passphrase.
pub fn check_private_key_pem(pem_data: &str) -> Result<()> {
    let block = parse_pem_block(pem_data)?;
    let tag = block.tag();
    if tag.ends_with("PRIVATE KEY") && !tag.starts_with("ENCRYPTED") {
        Ok(())
    } else {
        Err(PkiError::UnexpectedTag {
            expected: "PRIVATE KEY".to_string(),
            found: tag.to_string(),
        })
    }
}
