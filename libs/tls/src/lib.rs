//! Wire-level TLS handling for the veil interception relay.
//!
//! This crate carries no proxy policy. It knows how to:
//! - recognize the TLS handshake record magic,
//! - reassemble a complete initial ClientHello from one or more records
//!   without consuming it from the transport ([`record::read_client_hello`]),
//! - decode the fields the relay acts on: cipher suites, SNI and ALPN
//!   ([`client_hello::ClientHello`]),
//! - map numeric cipher-suite ids to OpenSSL names
//!   ([`ciphers::openssl_cipher_name`]).

pub mod ciphers;
pub mod client_hello;
pub mod error;
pub mod record;

#[cfg(any(test, feature = "test-util"))]
pub mod test_support;

pub use ciphers::openssl_cipher_name;
pub use client_hello::ClientHello;
pub use error::WireError;
pub use record::{is_tls_record_magic, read_client_hello, Peek};
