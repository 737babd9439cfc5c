//! Runnable MITM TLS relay built on the veil interception layer.
//!
//! Supplies the concrete collaborators the layer is written against: a
//! rustls-backed TLS engine for both sides, an rcgen-backed forging
//! certificate store, and a passthrough layer that moves the decrypted
//! bytes.

pub mod certstore;
pub mod config;
pub mod engine;
pub mod relay;

pub use certstore::ForgingCertStore;
pub use config::RelayConfig;
pub use engine::{init_crypto_provider, RustlsClientConnection, RustlsServerConnection};
pub use relay::{serve_connection, RelayLayer};
