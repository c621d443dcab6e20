//! mTLS echo server.
//!
//! One listener thread accepts connections and performs the TLS handshake
//! inline; every authenticated connection then gets its own OS thread that
//! echoes trimmed, upper-cased text back until the peer leaves. There is no
//! admission control: a connection storm grows the thread count without
//! bound.

use std::{
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use mtls_echo_common::{
    config::LISTEN_BACKLOG, tls_context, EndpointIdentity, Result, ServerSettings, TlsStream,
};
use rustls::{ServerConfig, ServerConnection};

pub mod handler;
pub mod listener;
pub mod registry;

use handler::HandlerContext;
use registry::ClientRegistry;

/// How long the accept loop sleeps when no connection is pending before it
/// checks the running flag again.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A mutually authenticated echo server.
///
/// Cloning is cheap and every clone controls the same listener, so a clone
/// handed to a signal handler can [`stop`](Self::stop) a server blocked in
/// [`start`](Self::start).
#[derive(Clone)]
pub struct TlsServer {
    tls_config: Arc<ServerConfig>,
    settings:   ServerSettings,
    running:    Arc<AtomicBool>,
    registry:   Arc<ClientRegistry>,
}

impl TlsServer {
    /// Builds the TLS session context from `identity`. Missing or malformed
    /// files fail here, before anything is bound.
    pub fn new(settings: ServerSettings, identity: &EndpointIdentity) -> Result<Self> {
        let tls_config = tls_context::server_config(identity)?;
        Ok(Self {
            tls_config,
            settings,
            running: Arc::new(AtomicBool::new(false)),
            registry: Arc::new(ClientRegistry::new()),
        })
    }

    /// Bind and serve until [`stop`](Self::stop) is called.
    pub fn start(&self) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener)
    }

    /// Bind the configured address with backlog 5. Split from
    /// [`serve`](Self::serve) so callers binding port 0 can learn the port.
    pub fn bind(&self) -> Result<TcpListener> {
        let listener = listener::bind(&self.settings.host, self.settings.port, LISTEN_BACKLOG)?;
        Ok(listener)
    }

    /// Run the accept loop on `listener` until the running flag drops, then
    /// close every remaining client and the listener itself.
    pub fn serve(&self, listener: TcpListener) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        let local_addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        tracing::info!("Server started on {}", local_addr);

        while self.is_running() {
            match listener.accept() {
                Ok((socket, addr)) => self.accept_connection(socket, addr),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::error!(category = "transport", "Accept failed: {}", e);
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }

        drop(listener);
        self.stop();
        tracing::info!("Listener on {} closed", local_addr);
        Ok(())
    }

    /// Handshake on the accepting thread, then hand the connection to its
    /// own handler thread. Failures only cost this one connection.
    fn accept_connection(&self, socket: TcpStream, addr: SocketAddr) {
        let client_id = format!("{}:{}", addr.ip(), addr.port());

        if let Err(e) = self.prepare_socket(&socket) {
            tracing::error!(
                category = "transport",
                "Failed to configure socket for {}: {}",
                client_id,
                e
            );
            return;
        }

        let tls = match ServerConnection::new(Arc::clone(&self.tls_config)) {
            Ok(tls) => tls,
            Err(e) => {
                tracing::error!(
                    category = "handshake",
                    "TLS session setup failed for {}: {}",
                    client_id,
                    e
                );
                return;
            }
        };

        let stream = match TlsStream::from_server(socket, tls) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(
                    category = e.category(),
                    "SSL handshake failed with {}: {}",
                    client_id,
                    e
                );
                return;
            }
        };

        let ctx = HandlerContext {
            running:  Arc::clone(&self.running),
            registry: Arc::clone(&self.registry),
        };
        let spawned = thread::Builder::new()
            .name(format!("client-{client_id}"))
            .spawn(move || handler::handle_client(stream, client_id, ctx));
        if let Err(e) = spawned {
            tracing::error!("Failed to spawn handler thread for {}: {}", addr, e);
        }
    }

    // Accepted sockets may inherit the listener's non-blocking mode.
    fn prepare_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        socket.set_nonblocking(false)?;
        socket.set_read_timeout(self.settings.io_timeout)?;
        socket.set_write_timeout(self.settings.io_timeout)
    }

    /// Stop accepting and force-close every registered client. Safe to call
    /// from any thread, any number of times.
    pub fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        let closed = self.registry.close_all();
        if was_running || closed > 0 {
            tracing::info!("Server stopped ({} client connections closed)", closed);
        }
    }

    /// Whether the accept loop is (or should keep) running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// `ip:port` of every client currently being handled
    pub fn active_clients(&self) -> Vec<String> {
        self.registry.client_ids()
    }
}
