use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::{Error, Result};

/// Largest message, in encoded bytes, either side puts on the wire.
pub const MAX_MESSAGE_SIZE: usize = 1024;

/// Pending-connection queue length of the listening socket.
pub const LISTEN_BACKLOG: i32 = 5;

const HOST_ENV: &str = "HOST";
const PORT_ENV: &str = "SCKT_PORT";
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5000;

const DEFAULT_AUTH_DIR: &str = "auth";
const CLIENTS_SUBDIR: &str = "clients";

/// Certificate, key and trust anchor of one endpoint.
///
/// Both sides trust exactly one counterpart certificate: the server trusts
/// `auth/clients/client.crt`, the client trusts `auth/server.crt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointIdentity {
    /// Path to the local certificate chain
    pub cert_path:    PathBuf,
    /// Path to the local private key
    pub key_path:     PathBuf,
    /// Path to the single trusted peer certificate
    pub trusted_path: PathBuf,
}

impl EndpointIdentity {
    /// Builds an identity from explicit paths.
    pub fn new(
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        trusted_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cert_path:    cert_path.into(),
            key_path:     key_path.into(),
            trusted_path: trusted_path.into(),
        }
    }

    /// Server identity under the default `auth` directory.
    pub fn server() -> Self {
        Self::server_in(DEFAULT_AUTH_DIR)
    }

    /// Server identity rooted at `base` instead of `auth`.
    pub fn server_in(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self::new(
            base.join("server.crt"),
            base.join("server.key"),
            base.join(CLIENTS_SUBDIR).join("client.crt"),
        )
    }

    /// Client identity under the default `auth` directory.
    pub fn client() -> Self {
        Self::client_in(DEFAULT_AUTH_DIR)
    }

    /// Client identity rooted at `base` instead of `auth`.
    pub fn client_in(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        let clients = base.join(CLIENTS_SUBDIR);
        Self::new(
            clients.join("client.crt"),
            clients.join("client.key"),
            base.join("server.crt"),
        )
    }
}

/// Host and port taken from `HOST` / `SCKT_PORT`.
fn endpoint_from_env() -> Result<(String, u16)> {
    let host = env::var(HOST_ENV).unwrap_or_else(|_| DEFAULT_HOST.to_string());
    let port = match env::var(PORT_ENV) {
        Ok(raw) => parse_port(&raw)?,
        Err(_) => DEFAULT_PORT,
    };
    Ok((host, port))
}

fn parse_port(raw: &str) -> Result<u16> {
    raw.trim().parse().map_err(|e| Error::Setting {
        name:   PORT_ENV,
        reason: format!("{raw:?}: {e}"),
    })
}

/// Settings for the listening side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Address to bind
    pub host:       String,
    /// Port to bind; 0 picks an ephemeral port
    pub port:       u16,
    /// Read/write deadline applied to every accepted socket. `None` blocks
    /// indefinitely.
    pub io_timeout: Option<Duration>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host:       DEFAULT_HOST.to_string(),
            port:       DEFAULT_PORT,
            io_timeout: None,
        }
    }
}

impl ServerSettings {
    /// Reads `HOST` and `SCKT_PORT`, falling back to `localhost:5000`.
    pub fn from_env() -> Result<Self> {
        let (host, port) = endpoint_from_env()?;
        Ok(Self {
            host,
            port,
            ..Self::default()
        })
    }

    /// Set the bind host
    pub fn with_host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = host.into();
        self
    }

    /// Set the bind port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set a read/write deadline on accepted connections
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }
}

/// Settings for the connecting side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Server host; also the name verified against the server certificate
    pub host:       String,
    /// Server port
    pub port:       u16,
    /// Read/write deadline on the connection. `None` blocks indefinitely.
    pub io_timeout: Option<Duration>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host:       DEFAULT_HOST.to_string(),
            port:       DEFAULT_PORT,
            io_timeout: None,
        }
    }
}

impl ClientSettings {
    /// Reads `HOST` and `SCKT_PORT`, falling back to `localhost:5000`.
    pub fn from_env() -> Result<Self> {
        let (host, port) = endpoint_from_env()?;
        Ok(Self {
            host,
            port,
            ..Self::default()
        })
    }

    /// Set the server host
    pub fn with_host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the operation timeout
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_identity_layout() {
        let server = EndpointIdentity::server();
        assert_eq!(server.cert_path, Path::new("auth/server.crt"));
        assert_eq!(server.key_path, Path::new("auth/server.key"));
        assert_eq!(server.trusted_path, Path::new("auth/clients/client.crt"));

        let client = EndpointIdentity::client();
        assert_eq!(client.cert_path, Path::new("auth/clients/client.crt"));
        assert_eq!(client.key_path, Path::new("auth/clients/client.key"));
        assert_eq!(client.trusted_path, Path::new("auth/server.crt"));
    }

    #[test]
    fn settings_default_to_localhost_5000() {
        let server = ServerSettings::default();
        assert_eq!((server.host.as_str(), server.port), ("localhost", 5000));
        assert_eq!(server.io_timeout, None);

        let client = ClientSettings::default().with_port(6000);
        assert_eq!((client.host.as_str(), client.port), ("localhost", 6000));
    }

    #[test]
    fn port_parsing() {
        assert_eq!(parse_port(" 7000 ").unwrap(), 7000);
        assert!(matches!(parse_port("http"), Err(Error::Setting { .. })));
        assert!(parse_port("70000").is_err());
    }
}
