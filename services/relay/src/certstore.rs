//! Forging certificate store.
//!
//! Issues leaf certificates on demand, signed by a per-process CA, keyed by
//! the (host, SAN set) the interception layer derived for the connection.
//! Lookups hit a cache; issuance is serialized by the cache lock. The leaf
//! PEM carries the CA certificate appended so engines get a complete chain
//! without a separate chain file.

use std::collections::HashMap;

use async_trait::async_trait;
use rcgen::{BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair};
use tokio::sync::Mutex;
use tracing::debug;

use veil_proxy::{CertBundle, CertStore, CertStoreError, CertificatePem, PrivateKeyPem};

/// Common name on the generated proxy CA.
const CA_COMMON_NAME: &str = "veil relay CA";

pub struct ForgingCertStore {
    ca_cert: Certificate,
    ca_key: KeyPair,
    ca_pem: String,
    cache: Mutex<HashMap<(String, Vec<String>), CertBundle>>,
}

impl ForgingCertStore {
    /// Generate a fresh CA and an empty leaf cache.
    pub fn new() -> Result<Self, rcgen::Error> {
        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::CommonName, CA_COMMON_NAME);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

        let ca_key = KeyPair::generate()?;
        let ca_cert = params.self_signed(&ca_key)?;
        let ca_pem = ca_cert.pem();

        Ok(Self {
            ca_cert,
            ca_key,
            ca_pem,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// PEM of the CA certificate clients must trust.
    pub fn ca_pem(&self) -> &str {
        &self.ca_pem
    }

    fn issue(&self, host: &str, sans: &[String]) -> Result<CertBundle, rcgen::Error> {
        let mut names: Vec<String> = vec![host.to_string()];
        names.extend(sans.iter().filter(|s| s.as_str() != host).cloned());

        let mut params = CertificateParams::new(names)?;
        params.distinguished_name.push(DnType::CommonName, host);

        let leaf_key = KeyPair::generate()?;
        let leaf = params.signed_by(&leaf_key, &self.ca_cert, &self.ca_key)?;

        Ok(CertBundle {
            cert: CertificatePem(format!("{}{}", leaf.pem(), self.ca_pem)),
            key: PrivateKeyPem(leaf_key.serialize_pem()),
            chain_file: None,
        })
    }
}

#[async_trait]
impl CertStore for ForgingCertStore {
    async fn get_cert(&self, host: &str, sans: &[String]) -> Result<CertBundle, CertStoreError> {
        let key = (host.to_string(), sans.to_vec());
        let mut cache = self.cache.lock().await;
        if let Some(bundle) = cache.get(&key) {
            return Ok(bundle.clone());
        }

        debug!(host, sans = sans.len(), "forging leaf certificate");
        let bundle = self
            .issue(host, sans)
            .map_err(|e| CertStoreError::Issue {
                host: host.to_string(),
                message: e.to_string(),
            })?;
        cache.insert(key, bundle.clone());
        Ok(bundle)
    }
}
