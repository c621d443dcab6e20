use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    time::Duration,
};

use rustls::{ClientConnection, Connection, ServerConnection};

use crate::{
    error::{Error, Result},
    peer::PeerCertificate,
};

/// Synchronous TLS wrapper over a blocking TCP socket
pub struct TlsStream {
    socket:    TcpStream,
    tls:       Connection,
    peer_addr: SocketAddr,
}

impl TlsStream {
    /// Create a new TLS stream from a server connection and complete the
    /// handshake
    pub fn from_server(socket: TcpStream, tls: ServerConnection) -> Result<Self> {
        Self::establish(socket, Connection::Server(tls))
    }

    /// Create a new TLS stream from a client connection and complete the
    /// handshake
    pub fn from_client(socket: TcpStream, tls: ClientConnection) -> Result<Self> {
        Self::establish(socket, Connection::Client(tls))
    }

    fn establish(socket: TcpStream, tls: Connection) -> Result<Self> {
        let peer_addr = socket.peer_addr()?;
        let mut stream = Self {
            socket,
            tls,
            peer_addr,
        };
        stream.complete_handshake()?;
        Ok(stream)
    }

    /// Complete the TLS handshake
    fn complete_handshake(&mut self) -> Result<()> {
        while self.tls.is_handshaking() {
            if self.tls.wants_write() {
                self.tls.write_tls(&mut self.socket)?;
                continue;
            }
            if self.tls.wants_read() {
                if self.tls.read_tls(&mut self.socket)? == 0 {
                    return Err(Error::Handshake("peer closed the connection mid-handshake".into()));
                }
                if let Err(e) = self.tls.process_new_packets() {
                    // Let the peer see the alert before we drop the socket.
                    let _ = self.tls.write_tls(&mut self.socket);
                    return Err(Error::Handshake(e.to_string()));
                }
            }
        }
        // The final flight of a TLS 1.2 handshake is queued after the state
        // flips to connected.
        self.flush_tls()?;
        Ok(())
    }

    fn flush_tls(&mut self) -> io::Result<()> {
        while self.tls.wants_write() {
            match self.tls.write_tls(&mut self.socket) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Leaf certificate the peer authenticated with. Missing or empty
    /// subjects are handshake failures.
    pub fn peer_certificate(&self) -> Result<PeerCertificate> {
        let role = match self.tls {
            Connection::Client(_) => "server",
            Connection::Server(_) => "client",
        };
        let leaf = self
            .tls
            .peer_certificates()
            .and_then(|chain| chain.first())
            .ok_or_else(|| Error::Handshake(format!("no {role} certificate provided")))?;
        PeerCertificate::from_der(leaf.as_ref())
    }

    /// Remote address of the underlying socket
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Second handle to the raw socket, used to shut the connection down
    /// from another thread.
    pub fn try_clone_socket(&self) -> io::Result<TcpStream> {
        self.socket.try_clone()
    }

    /// Apply (or clear) read and write deadlines on the socket
    pub fn set_io_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(timeout)?;
        self.socket.set_write_timeout(timeout)
    }

    /// Drop plaintext that is already decrypted but was not read. Never
    /// touches the socket. Returns the number of bytes dropped.
    pub fn discard_buffered(&mut self) -> usize {
        let mut scratch = [0u8; 512];
        let mut discarded = 0;
        loop {
            match self.tls.reader().read(&mut scratch) {
                Ok(0) => return discarded,
                Ok(n) => discarded += n,
                // WouldBlock means the buffer is empty
                Err(_) => return discarded,
            }
        }
    }

    /// Send close_notify and shut the socket down. Errors are ignored; the
    /// peer may already be gone.
    pub fn close(&mut self) {
        self.tls.send_close_notify();
        let _ = self.flush_tls();
        let _ = self.socket.shutdown(Shutdown::Both);
    }
}

impl Read for TlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            // Try to read buffered plaintext first
            match self.tls.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            // Clean shutdown of the transport without close_notify
            if self.tls.read_tls(&mut self.socket)? == 0 {
                return Ok(0);
            }

            if let Err(e) = self.tls.process_new_packets() {
                let _ = self.tls.write_tls(&mut self.socket);
                return Err(io::Error::new(io::ErrorKind::InvalidData, e));
            }
            // Records such as alerts or renegotiation refusals may need a reply
            self.flush_tls()?;
        }
    }
}

impl Write for TlsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.tls.writer().write(buf)?;
        self.flush_tls()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        // Ensure any buffered plaintext is passed to the TLS session
        self.tls.writer().flush()?;
        self.flush_tls()?;
        // Finally, flush the underlying socket
        self.socket.flush()
    }
}
