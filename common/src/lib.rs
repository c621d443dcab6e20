//! mTLS Echo Common Library
//!
//! This crate provides the pieces shared by the mtls-echo client and server:
//!
//! - Endpoint identity (certificate, key, trusted peer) and process settings
//! - The TLS session context builder, restricted to the two ECDHE AES-256-GCM
//!   suites with mandatory peer certificates in both directions
//! - A blocking TLS stream wrapper over `TcpStream`
//! - The error taxonomy both sides report failures with
//! - Logging initialisation for the binaries
//!
//! # Wire protocol
//!
//! There is no length prefix. Each exchange is exactly one write and one read
//! of at most [`MAX_MESSAGE_SIZE`] bytes of UTF-8 text; the reply is the
//! request trimmed and upper-cased, or one of the literal error strings in
//! [`protocol`].

/// Endpoint identity and client/server settings
pub mod config;

/// Error taxonomy shared by both endpoints
pub mod error;

/// Subscriber setup for the binaries
pub mod logging;

/// Peer certificate inspection
pub mod peer;

/// Literal replies of the echo protocol
pub mod protocol;

/// rustls configuration builders
pub mod tls_context;

/// TLS stream wrapper for encrypted TCP communication
pub mod tls_stream;

/// Generated certificates for tests
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types for convenience
pub use config::{ClientSettings, EndpointIdentity, ServerSettings, MAX_MESSAGE_SIZE};
pub use error::{Error, Result};
pub use peer::PeerCertificate;
pub use tls_stream::TlsStream;
