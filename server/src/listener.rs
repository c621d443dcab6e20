use std::{
    io,
    net::{SocketAddr, TcpListener, ToSocketAddrs},
};

/// Binds the first address `host:port` resolves to that accepts a listener
/// with `SO_REUSEADDR` and the given backlog.
pub fn bind(host: &str, port: u16, backlog: i32) -> io::Result<TcpListener> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match bind_addr(&addr, backlog) {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                tracing::debug!("Bind to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{host}:{port} did not resolve to any address"),
        )
    }))
}

/// Builds the listening socket by hand so the backlog is ours rather than
/// the standard library's fixed 128.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn bind_addr(addr: &SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    use std::{mem, os::fd::FromRawFd};

    let domain = match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };

    unsafe {
        // 1. Create a raw socket file descriptor.
        let fd = libc::socket(domain, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // Owned from here on so every early return closes it.
        let listener = TcpListener::from_raw_fd(fd);

        // 2. Allow rebinding while old connections sit in TIME_WAIT.
        let one: libc::c_int = 1;
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        ) < 0
        {
            return Err(io::Error::last_os_error());
        }

        // 3. Bind the socket to the address.
        let (storage, len) = raw_socket_addr(addr);
        if libc::bind(fd, &storage as *const _ as *const libc::sockaddr, len) < 0 {
            return Err(io::Error::last_os_error());
        }

        // 4. Put the socket into listening mode.
        if libc::listen(fd, backlog) < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(listener)
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn raw_socket_addr(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    use std::mem;

    // SAFETY: sockaddr_storage is plain old data and large enough for both
    // sockaddr_in and sockaddr_in6; the casts below stay within it.
    unsafe {
        let mut storage: libc::sockaddr_storage = mem::zeroed();
        let len = match addr {
            SocketAddr::V4(v4) => {
                let sin = &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in);
                sin.sin_family = libc::AF_INET as libc::sa_family_t;
                sin.sin_port = v4.port().to_be();
                sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
                mem::size_of::<libc::sockaddr_in>()
            }
            SocketAddr::V6(v6) => {
                let sin6 = &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in6);
                sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                sin6.sin6_port = v6.port().to_be();
                sin6.sin6_flowinfo = v6.flowinfo();
                sin6.sin6_addr.s6_addr = v6.ip().octets();
                sin6.sin6_scope_id = v6.scope_id();
                mem::size_of::<libc::sockaddr_in6>()
            }
        };
        (storage, len as libc::socklen_t)
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn bind_addr(addr: &SocketAddr, _backlog: i32) -> io::Result<TcpListener> {
    TcpListener::bind(addr)
}

#[cfg(test)]
mod tests {
    use std::net::TcpStream;

    use super::*;

    #[test]
    fn binds_ephemeral_port_and_accepts() {
        let listener = bind("127.0.0.1", 0, 5).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let _client = TcpStream::connect(addr).unwrap();
        let (_, peer) = listener.accept().unwrap();
        assert_eq!(peer.ip(), addr.ip());
    }

    #[test]
    fn rebinding_a_port_in_use_fails() {
        let first = bind("127.0.0.1", 0, 5).unwrap();
        let port = first.local_addr().unwrap().port();

        assert!(bind("127.0.0.1", port, 5).is_err());
    }
}
