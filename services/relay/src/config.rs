//! Relay service configuration (env-driven).

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

use veil_proxy::{ProxyConfig, UpstreamAddr};

/// Configuration for the relay binary.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,

    /// Upstream endpoint every connection is relayed to.
    pub upstream: UpstreamAddr,

    /// Terminate TLS on the client side.
    pub client_tls: bool,

    /// Terminate TLS on the upstream side.
    pub server_tls: bool,

    /// Maximum concurrent connections.
    pub max_connections: usize,

    /// Where to write the generated CA certificate, so clients can trust it.
    pub ca_out: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Interception options shared with the TLS layer.
    pub proxy: ProxyConfig,
}

impl RelayConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let listen_addr: SocketAddr = std::env::var("VEIL_LISTEN")
            .unwrap_or_else(|_| "[::]:8443".to_string())
            .parse()
            .context("VEIL_LISTEN must be an address:port pair")?;

        let upstream = std::env::var("VEIL_UPSTREAM")
            .context("Missing upstream. Set VEIL_UPSTREAM (e.g. 'example.com:443').")?;
        let upstream = parse_upstream(&upstream)?;

        let client_tls = env_bool("VEIL_CLIENT_TLS", true)?;
        let server_tls = env_bool("VEIL_SERVER_TLS", true)?;

        let max_connections: usize = std::env::var("VEIL_MAX_CONNECTIONS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("VEIL_MAX_CONNECTIONS must be an integer")?
            .unwrap_or(10000);

        let ca_out = std::env::var("VEIL_CA_OUT").ok().map(PathBuf::from);

        let log_level = std::env::var("VEIL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            listen_addr,
            upstream,
            client_tls,
            server_tls,
            max_connections,
            ca_out,
            log_level,
            proxy: ProxyConfig::from_env()?,
        })
    }
}

/// Parse a `host:port` pair, tolerating bracketed IPv6 literals.
pub fn parse_upstream(s: &str) -> Result<UpstreamAddr> {
    let (host, port) = s
        .rsplit_once(':')
        .with_context(|| format!("Invalid upstream address: {s}"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let port: u16 = port
        .parse()
        .with_context(|| format!("Invalid upstream port in: {s}"))?;
    anyhow::ensure!(!host.is_empty(), "Empty upstream host in: {s}");
    Ok(UpstreamAddr::new(host, port))
}

fn env_bool(name: &str, default: bool) -> Result<bool> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(v) => match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            other => anyhow::bail!("{name} must be a boolean, got `{other}`"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_port() {
        let addr = parse_upstream("example.com:443").unwrap();
        assert_eq!(addr.host, "example.com");
        assert_eq!(addr.port, 443);
    }

    #[test]
    fn parses_bracketed_ipv6() {
        let addr = parse_upstream("[::1]:8443").unwrap();
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.port, 8443);
    }

    #[test]
    fn rejects_missing_port() {
        assert!(parse_upstream("example.com").is_err());
        assert!(parse_upstream("example.com:http").is_err());
    }
}
