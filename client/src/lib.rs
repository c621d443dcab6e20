//! mTLS Echo Client Library
//!
//! A blocking client for the mtls-echo server. It opens one TLS 1.2
//! connection with mutual certificate verification and performs strictly
//! sequential request/response exchanges over it.
//!
//! # Example
//!
//! ```no_run
//! use mtls_echo_client::TlsClient;
//!
//! # fn main() -> mtls_echo_common::Result<()> {
//! let mut client = TlsClient::with_defaults()?;
//! if client.connect() {
//!     if let Some(reply) = client.send("hello world") {
//!         println!("Server response: {reply}");
//!     }
//!     client.close();
//! }
//! # Ok(())
//! # }
//! ```

mod client;

pub use client::*;
// Re-export important types from mtls-echo-common for convenience
pub use mtls_echo_common::{ClientSettings, EndpointIdentity, Error, MAX_MESSAGE_SIZE};
