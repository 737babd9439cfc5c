//! Interception configuration.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::engine::{EngineOptions, TlsMethod, VerificationMode};

/// The options the TLS layer recognizes.
///
/// The engine tokens (`method_*`, `options_*`) cannot be expressed in the
/// environment; they keep their defaults unless set programmatically.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Forge client-facing certificates without contacting the upstream.
    pub no_upstream_cert: bool,

    /// Whether `h2` may be offered upstream.
    pub http2: bool,

    /// Version token for the client-facing handshake.
    pub method_client: TlsMethod,

    /// Version token for the server-facing handshake.
    pub method_server: TlsMethod,

    /// Engine option bits for the client-facing handshake.
    pub options_client: EngineOptions,

    /// Engine option bits for the server-facing handshake.
    pub options_server: EngineOptions,

    /// Cipher list offered to the client (OpenSSL syntax).
    pub ciphers_client: Option<String>,

    /// Cipher list offered upstream; when unset, rebuilt from the client's
    /// offer through the cipher-id table.
    pub ciphers_server: Option<String>,

    /// Client certificate material for upstream mutual TLS.
    pub client_certs: Option<PathBuf>,

    /// Upstream chain verification mode.
    pub verification_mode_server: VerificationMode,

    /// Trusted CA directory for upstream verification.
    pub trusted_ca_dir_server: Option<PathBuf>,

    /// Trusted CA bundle file for upstream verification.
    pub trusted_ca_file_server: Option<PathBuf>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            no_upstream_cert: false,
            http2: true,
            method_client: TlsMethod::default(),
            method_server: TlsMethod::default(),
            options_client: EngineOptions::default(),
            options_server: EngineOptions::default(),
            ciphers_client: None,
            ciphers_server: None,
            client_certs: None,
            verification_mode_server: VerificationMode::None,
            trusted_ca_dir_server: None,
            trusted_ca_file_server: None,
        }
    }
}

impl ProxyConfig {
    /// Load the env-expressible options from `VEIL_*` variables.
    pub fn from_env() -> Result<Self> {
        let no_upstream_cert = env_bool("VEIL_NO_UPSTREAM_CERT", false)?;
        let http2 = env_bool("VEIL_HTTP2", true)?;

        let ciphers_client = env_nonempty("VEIL_CIPHERS_CLIENT");
        let ciphers_server = env_nonempty("VEIL_CIPHERS_SERVER");
        let client_certs = env_nonempty("VEIL_CLIENT_CERTS").map(PathBuf::from);

        let verification_mode_server = match std::env::var("VEIL_VERIFY_UPSTREAM").ok().as_deref()
        {
            None | Some("none") => VerificationMode::None,
            Some("peer") => VerificationMode::Peer,
            Some(other) => {
                anyhow::bail!("VEIL_VERIFY_UPSTREAM must be `none` or `peer`, got `{other}`")
            }
        };

        let trusted_ca_dir_server = env_nonempty("VEIL_CA_DIR").map(PathBuf::from);
        let trusted_ca_file_server = env_nonempty("VEIL_CA_FILE").map(PathBuf::from);

        Ok(Self {
            no_upstream_cert,
            http2,
            ciphers_client,
            ciphers_server,
            client_certs,
            verification_mode_server,
            trusted_ca_dir_server,
            trusted_ca_file_server,
            ..Self::default()
        })
    }
}

fn env_bool(name: &str, default: bool) -> Result<bool> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(v) => match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(anyhow::anyhow!("not a boolean: `{v}`"))
                .with_context(|| format!("{name} must be a boolean")),
        },
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_permissive() {
        let config = ProxyConfig::default();
        assert!(!config.no_upstream_cert);
        assert!(config.http2);
        assert_eq!(config.verification_mode_server, VerificationMode::None);
        assert_eq!(config.method_client, TlsMethod::Flexible);
        assert!(config.ciphers_server.is_none());
    }
}
