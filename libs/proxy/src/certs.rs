//! Certificate store interface.
//!
//! The store mints leaf certificates on demand, keyed by the host name plus
//! the SAN set the interception layer derived for the connection. Lookups
//! must be safe to call concurrently; issuance is serialized inside the
//! store.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

/// PEM-encoded certificate material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePem(pub String);

/// PEM-encoded private key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKeyPem(pub String);

impl PrivateKeyPem {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrivateKeyPem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Opaque Diffie-Hellman parameters handed through to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhParams(pub Vec<u8>);

/// A forged leaf plus its key and optional intermediate chain file.
#[derive(Debug, Clone)]
pub struct CertBundle {
    pub cert: CertificatePem,
    pub key: PrivateKeyPem,
    pub chain_file: Option<PathBuf>,
}

/// Errors from certificate issuance.
#[derive(Debug, Error)]
pub enum CertStoreError {
    #[error("cannot issue certificate for {host}: {message}")]
    Issue { host: String, message: String },
}

/// On-demand issuer of forged leaf certificates.
#[async_trait]
pub trait CertStore: Send + Sync {
    /// Return a leaf certificate for `host` covering `sans`.
    async fn get_cert(&self, host: &str, sans: &[String]) -> Result<CertBundle, CertStoreError>;

    /// DH parameters shared by all issued certificates, if the store
    /// carries any.
    fn dhparams(&self) -> Option<DhParams> {
        None
    }
}
