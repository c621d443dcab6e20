use std::{
    io::{self, Read, Write},
    net::TcpStream,
    sync::Arc,
};

use mtls_echo_common::{
    tls_context, ClientSettings, EndpointIdentity, Error, PeerCertificate, Result, TlsStream,
    MAX_MESSAGE_SIZE,
};
use rustls::{pki_types::ServerName, ClientConfig, ClientConnection};

/// Lifecycle of the single outbound connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

/// Synchronous mTLS client: one connection, one request in flight.
///
/// `connect`/`send` report failure as `false`/`None` after logging it; the
/// `try_` variants return the typed [`Error`] instead.
pub struct TlsClient {
    tls_config:         Arc<ClientConfig>,
    settings:           ClientSettings,
    state:              ConnectionState,
    connection:         Option<TlsStream>,
    server_certificate: Option<PeerCertificate>,
}

impl TlsClient {
    /// Creates a client; the TLS session context is built once here and
    /// reused by every connection attempt.
    pub fn new(settings: ClientSettings, identity: &EndpointIdentity) -> Result<Self> {
        let tls_config = tls_context::client_config(identity)?;
        Ok(Self {
            tls_config,
            settings,
            state: ConnectionState::Disconnected,
            connection: None,
            server_certificate: None,
        })
    }

    /// Creates a client from `HOST`/`SCKT_PORT` and the default `auth/`
    /// layout
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientSettings::from_env()?, &EndpointIdentity::client())
    }

    /// Connect, logging any failure. Returns whether the client is now
    /// connected.
    pub fn connect(&mut self) -> bool {
        match self.try_connect() {
            Ok(()) => true,
            Err(e) => {
                match &e {
                    Error::Handshake(_) => tracing::error!("SSL error: {}", e),
                    Error::Transport(_) => tracing::error!("Connection error: {}", e),
                    _ => tracing::error!("Unexpected error: {}", e),
                }
                false
            }
        }
    }

    /// Connect to the configured server, verifying its certificate and
    /// name. On failure the client is back in `Disconnected`.
    pub fn try_connect(&mut self) -> Result<()> {
        if self.state == ConnectionState::Connected {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        match self.establish() {
            Ok((stream, certificate)) => {
                tracing::info!(
                    "Connected to server {} with certificate: {} (sha256 {})",
                    stream.peer_addr(),
                    certificate.subject,
                    certificate.fingerprint
                );
                self.connection = Some(stream);
                self.server_certificate = Some(certificate);
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    fn establish(&self) -> Result<(TlsStream, PeerCertificate)> {
        let host = self.settings.host.as_str();
        let socket = TcpStream::connect((host, self.settings.port))?;
        socket.set_read_timeout(self.settings.io_timeout)?;
        socket.set_write_timeout(self.settings.io_timeout)?;

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| Error::Handshake(format!("invalid server name {host:?}: {e}")))?;
        let tls = ClientConnection::new(Arc::clone(&self.tls_config), server_name)
            .map_err(|e| Error::Handshake(e.to_string()))?;

        let mut stream = TlsStream::from_client(socket, tls)?;
        match stream.peer_certificate() {
            Ok(certificate) => Ok((stream, certificate)),
            Err(e) => {
                stream.close();
                Err(e)
            }
        }
    }

    /// Send one message and wait for the reply, logging any failure.
    pub fn send(&mut self, message: &str) -> Option<String> {
        match self.try_send(message) {
            Ok(reply) => Some(reply),
            Err(e) => {
                match &e {
                    Error::NotConnected => tracing::error!("Not connected to server"),
                    Error::Validation(_) => tracing::error!("Error sending message: {}", e),
                    Error::Encoding(_) => tracing::error!("Invalid server response: {}", e),
                    Error::Transport(_) => tracing::error!("Communication error: {}", e),
                    _ => tracing::error!("Unexpected error: {}", e),
                }
                None
            }
        }
    }

    /// One request/response exchange: a single write of the whole message,
    /// then a single read of up to [`MAX_MESSAGE_SIZE`] bytes.
    ///
    /// Invalid messages are rejected before anything touches the socket. A
    /// transport failure closes the connection for good.
    pub fn try_send(&mut self, message: &str) -> Result<String> {
        if self.state != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }
        validate(message)?;

        let stream = self.connection.as_mut().ok_or(Error::NotConnected)?;
        match exchange(stream, message) {
            Err(Error::Transport(e)) => {
                self.close();
                Err(Error::Transport(e))
            }
            result => result,
        }
    }

    /// Close the connection if open. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.connection.take() {
            stream.close();
            tracing::info!("Connection closed");
        }
        self.server_certificate = None;
        self.state = ConnectionState::Closed;
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Certificate the server authenticated with, while connected
    pub fn server_certificate(&self) -> Option<&PeerCertificate> {
        self.server_certificate.as_ref()
    }
}

impl Drop for TlsClient {
    fn drop(&mut self) {
        if self.connection.is_some() {
            self.close();
        }
    }
}

/// Messages must fit one read on the server and must put at least one byte
/// of content on the wire; a blank message would leave both sides waiting.
fn validate(message: &str) -> Result<()> {
    let len = message.len();
    if len > MAX_MESSAGE_SIZE {
        return Err(Error::Validation(format!(
            "message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"
        )));
    }
    if message.trim().is_empty() {
        return Err(Error::Validation("message is empty".into()));
    }
    Ok(())
}

fn exchange(stream: &mut TlsStream, message: &str) -> Result<String> {
    stream.write_all(message.as_bytes())?;
    stream.flush()?;

    let mut buf = [0u8; MAX_MESSAGE_SIZE];
    let n = loop {
        match stream.read(&mut buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => break other?,
        }
    };
    if n == 0 {
        return Err(Error::Transport(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "server closed the connection",
        )));
    }

    // A reply longer than one read must not leak into the next exchange.
    let discarded = stream.discard_buffered();
    if discarded == 0 {
        return Ok(std::str::from_utf8(&buf[..n])?.to_string());
    }

    tracing::warn!(
        "Server response exceeded {} bytes; dropped {} trailing bytes",
        MAX_MESSAGE_SIZE,
        discarded
    );
    let reply = match std::str::from_utf8(&buf[..n]) {
        Ok(reply) => reply,
        // The cut landed inside a multi-byte character
        Err(e) if e.error_len().is_none() => std::str::from_utf8(&buf[..e.valid_up_to()])?,
        Err(e) => return Err(e.into()),
    };
    Ok(reply.to_string())
}

#[cfg(test)]
mod tests {
    use std::{
        net::TcpListener,
        sync::mpsc,
        thread::{self, JoinHandle},
    };

    use mtls_echo_common::testing::TestPki;
    use rustls::ServerConnection;

    use super::*;

    /// One-shot TLS peer on an ephemeral port running `script` on the first
    /// connection that completes a handshake.
    fn spawn_peer<F>(identity: EndpointIdentity, script: F) -> (u16, JoinHandle<()>)
    where
        F: FnOnce(TlsStream) + Send + 'static,
    {
        let config = tls_context::server_config(&identity).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            let tls = ServerConnection::new(config).unwrap();
            if let Ok(stream) = TlsStream::from_server(socket, tls) {
                script(stream);
            }
        });
        (port, handle)
    }

    fn client_for(pki: &TestPki, port: u16) -> TlsClient {
        let settings = ClientSettings::default().with_port(port);
        TlsClient::new(settings, &pki.client_identity()).unwrap()
    }

    fn read_request(stream: &mut TlsStream) -> Vec<u8> {
        let mut buf = [0u8; 2048];
        let n = stream.read(&mut buf).unwrap();
        buf[..n].to_vec()
    }

    #[test]
    fn connect_records_server_certificate() {
        let pki = TestPki::generate();
        let (port, peer) = spawn_peer(pki.server_identity(), |mut stream| {
            let request = read_request(&mut stream);
            stream.write_all(&request.to_ascii_uppercase()).unwrap();
            stream.flush().unwrap();
        });

        let mut client = client_for(&pki, port);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.connect());
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(
            client.server_certificate().map(|c| c.subject.as_str()),
            Some("CN=mtls-echo-server")
        );

        assert_eq!(client.send("ping").as_deref(), Some("PING"));
        client.close();
        peer.join().unwrap();
    }

    #[test]
    fn connection_refused_leaves_client_disconnected() {
        let pki = TestPki::generate();
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut client = client_for(&pki, port);
        assert!(matches!(client.try_connect(), Err(Error::Transport(_))));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.connect());
    }

    #[test]
    fn untrusted_server_fails_handshake() {
        let pki = TestPki::generate();
        let (port, peer) = spawn_peer(pki.untrusted_server_identity(), |_| {});

        let mut client = client_for(&pki, port);
        assert!(matches!(client.try_connect(), Err(Error::Handshake(_))));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        peer.join().unwrap();
    }

    #[test]
    fn send_requires_connection() {
        let pki = TestPki::generate();
        let mut client = client_for(&pki, 1);

        assert!(matches!(client.try_send("hello"), Err(Error::NotConnected)));
        assert_eq!(client.send("hello"), None);
    }

    #[test]
    fn oversized_message_never_reaches_the_wire() {
        let pki = TestPki::generate();
        let (tx, rx) = mpsc::channel();
        let (port, peer) = spawn_peer(pki.server_identity(), move |mut stream| {
            let first = read_request(&mut stream);
            tx.send(first).unwrap();
            stream.write_all(b"OK").unwrap();
            stream.flush().unwrap();
        });

        let mut client = client_for(&pki, port);
        assert!(client.connect());

        let oversized = "x".repeat(MAX_MESSAGE_SIZE + 1);
        assert!(matches!(client.try_send(&oversized), Err(Error::Validation(_))));
        assert_eq!(client.send(&oversized), None);
        assert!(client.is_connected());

        // The first bytes the peer ever sees belong to the next valid message
        assert_eq!(client.send("after").as_deref(), Some("OK"));
        assert_eq!(rx.recv().unwrap(), b"after");
        peer.join().unwrap();
    }

    #[test]
    fn multibyte_length_is_measured_in_bytes() {
        // 342 three-byte characters: 342 chars, 1026 bytes
        let message = "€".repeat(342);
        assert!(matches!(validate(&message), Err(Error::Validation(_))));
        assert!(validate(&"€".repeat(341)).is_ok());
    }

    #[test]
    fn blank_messages_are_rejected() {
        assert!(matches!(validate(""), Err(Error::Validation(_))));
        assert!(matches!(validate(" \t\n"), Err(Error::Validation(_))));
    }

    #[test]
    fn undecodable_reply_keeps_connection_open() {
        let pki = TestPki::generate();
        let (port, peer) = spawn_peer(pki.server_identity(), |mut stream| {
            read_request(&mut stream);
            stream.write_all(&[0xff, 0xfe, 0xfd]).unwrap();
            stream.flush().unwrap();
            read_request(&mut stream);
            stream.write_all(b"FINE").unwrap();
            stream.flush().unwrap();
        });

        let mut client = client_for(&pki, port);
        assert!(client.connect());
        assert!(matches!(client.try_send("one"), Err(Error::Encoding(_))));
        assert!(client.is_connected());
        assert_eq!(client.send("two").as_deref(), Some("FINE"));
        peer.join().unwrap();
    }

    #[test]
    fn long_reply_is_cut_on_a_character_boundary_and_not_replayed() {
        let pki = TestPki::generate();
        let (port, peer) = spawn_peer(pki.server_identity(), |mut stream| {
            read_request(&mut stream);
            // 1200 bytes; byte 1024 falls inside the 342nd character
            stream.write_all("€".repeat(400).as_bytes()).unwrap();
            stream.flush().unwrap();
            let request = read_request(&mut stream);
            stream.write_all(&request.to_ascii_uppercase()).unwrap();
            stream.flush().unwrap();
        });

        let mut client = client_for(&pki, port);
        assert!(client.connect());
        assert_eq!(client.try_send("grow").unwrap(), "€".repeat(341));
        assert_eq!(client.try_send("next").unwrap(), "NEXT");
        peer.join().unwrap();
    }

    #[test]
    fn peer_hangup_closes_the_session() {
        let pki = TestPki::generate();
        let (port, peer) = spawn_peer(pki.server_identity(), |mut stream| {
            read_request(&mut stream);
            stream.close();
        });

        let mut client = client_for(&pki, port);
        assert!(client.connect());
        assert_eq!(client.send("anyone there"), None);
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(matches!(client.try_send("again"), Err(Error::NotConnected)));
        peer.join().unwrap();
    }

    #[test]
    fn close_is_idempotent() {
        let pki = TestPki::generate();
        let mut client = client_for(&pki, 1);

        client.close();
        client.close();
        assert_eq!(client.state(), ConnectionState::Closed);
    }
}
