//! Infrastructure components for Heron
//!
//! This crate provides the Credential Factory used for every agent
//! connection:
//!
//! - **PKI**: PEM parsing and X.509 validity inspection
//! - **mTLS**: client TLS configuration for dialing agents
//!
//! Keys and certificates are generated and stored elsewhere; this crate only
//! checks and assembles them.
//!
//! # Public API
//!
//! ## PKI
//! - [`pki::CertificateInfo`]: Validity window and subject of a certificate
//! - [`pki::PkiError`]: Error type for PKI operations
//!
//! ## mTLS
//! - [`mtls::ClientMtlsConfig`]: TLS configuration for gRPC agent connections
//! - [`mtls::MtlsError`]: Error type for mTLS operations

pub mod mtls;
pub mod pki;

pub use mtls::{ClientMtlsConfig, MtlsError};
