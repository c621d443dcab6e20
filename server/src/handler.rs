use std::{
    io::{self, Read, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use mtls_echo_common::{protocol, Error, Result, TlsStream, MAX_MESSAGE_SIZE};
use uuid::Uuid;

use crate::registry::ClientRegistry;

/// Response to one request read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Trimmed, upper-cased request text
    Echo(String),
    /// Request longer than [`MAX_MESSAGE_SIZE`]
    TooLarge,
    /// Request bytes are not UTF-8
    InvalidUtf8,
}

impl Reply {
    /// Decide the reply for `data`. Oversized input is checked first even
    /// though reads are capped at [`MAX_MESSAGE_SIZE`].
    pub fn for_request(data: &[u8]) -> Self {
        if data.len() > MAX_MESSAGE_SIZE {
            return Reply::TooLarge;
        }
        match std::str::from_utf8(data) {
            Ok(text) => Reply::Echo(protocol::transform(text)),
            Err(_) => Reply::InvalidUtf8,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Reply::Echo(text) => text,
            Reply::TooLarge => protocol::MESSAGE_TOO_LARGE,
            Reply::InvalidUtf8 => protocol::INVALID_UTF8,
        }
    }
}

/// State a handler shares with the listener.
#[derive(Clone)]
pub(crate) struct HandlerContext {
    pub running:  Arc<AtomicBool>,
    pub registry: Arc<ClientRegistry>,
}

/// Body of a handler thread. Never returns an error: whatever goes wrong
/// with this client is logged and ends in teardown of this connection only.
pub(crate) fn handle_client(mut stream: TlsStream, client_id: String, ctx: HandlerContext) {
    let session = Uuid::new_v4();
    let span = tracing::info_span!("client", id = %client_id, %session);
    let _entered = span.enter();

    let registration = match stream.try_clone_socket() {
        Ok(socket) => ctx.registry.register(client_id.clone(), session, socket),
        Err(e) => {
            tracing::error!("Failed to register client {}: {}", client_id, e);
            stream.close();
            return;
        }
    };
    tracing::info!("Client connected: {}", client_id);

    if let Err(e) = serve_client(&mut stream, &client_id, &ctx.running) {
        tracing::error!(category = e.category(), "Error with client {}: {}", client_id, e);
    }

    stream.close();
    drop(registration);
    tracing::info!("Client disconnected: {}", client_id);
}

/// Message loop for one authenticated connection.
fn serve_client(stream: &mut TlsStream, client_id: &str, running: &AtomicBool) -> Result<()> {
    let peer = stream.peer_certificate()?;
    tracing::info!(
        "Client certificate subject: {} (sha256 {})",
        peer.subject,
        peer.fingerprint
    );

    let mut buf = [0u8; MAX_MESSAGE_SIZE];
    while running.load(Ordering::SeqCst) {
        let n = match stream.read(&mut buf) {
            Ok(0) => {
                tracing::debug!("Peer {} closed the connection", client_id);
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Transport(e)),
        };

        let reply = Reply::for_request(&buf[..n]);
        match &reply {
            Reply::Echo(message) => tracing::info!("Received from {}: {}", client_id, message),
            Reply::TooLarge => tracing::warn!("Oversized message from {} ({} bytes)", client_id, n),
            Reply::InvalidUtf8 => tracing::warn!("Invalid UTF-8 data from {}", client_id),
        }

        stream.write_all(reply.as_str().as_bytes())?;
        stream.flush()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echoes_trimmed_uppercase() {
        assert_eq!(
            Reply::for_request(b"  hello world \n"),
            Reply::Echo("HELLO WORLD".into())
        );
    }

    #[test]
    fn invalid_utf8_gets_literal_error() {
        let reply = Reply::for_request(&[0x66, 0x6f, 0xff, 0xfe]);
        assert_eq!(reply, Reply::InvalidUtf8);
        assert_eq!(reply.as_str(), "ERROR: Invalid UTF-8 encoding");
    }

    #[test]
    fn oversized_request_gets_literal_error() {
        let exactly_max = vec![b'a'; MAX_MESSAGE_SIZE];
        assert_eq!(
            Reply::for_request(&exactly_max),
            Reply::Echo("A".repeat(MAX_MESSAGE_SIZE))
        );

        let reply = Reply::for_request(&vec![b'a'; MAX_MESSAGE_SIZE + 1]);
        assert_eq!(reply, Reply::TooLarge);
        assert_eq!(reply.as_str(), "ERROR: Message too large");
    }

    #[test]
    fn oversized_wins_over_encoding() {
        assert_eq!(Reply::for_request(&vec![0xff; MAX_MESSAGE_SIZE + 1]), Reply::TooLarge);
    }
}
