//! UDP socket wrapper
//!
//! Sockets are created and tuned through `socket2` (buffer sizes, address
//! reuse) and then used as a blocking std `UdpSocket` with a read timeout, so
//! background receive loops can notice shutdown requests.

use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Socket errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid socket address")]
    InvalidAddress,
}

impl SocketError {
    /// Whether this is a read timeout rather than a real failure
    pub fn is_timeout(&self) -> bool {
        match self {
            SocketError::Io(e) => {
                matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
            }
            _ => false,
        }
    }

    /// Errors a receive loop should skip rather than stop on
    pub fn is_transient(&self) -> bool {
        match self {
            SocketError::Io(e) => matches!(
                e.kind(),
                ErrorKind::WouldBlock
                    | ErrorKind::TimedOut
                    | ErrorKind::Interrupted
                    | ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }
}

/// Socket tuning applied at bind time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    /// Send and receive buffer size in bytes
    pub buffer_size: usize,
    /// Read timeout for `recv_from`; `None` blocks forever
    pub read_timeout: Option<Duration>,
    pub reuse_address: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        SocketOptions {
            buffer_size: 1024 * 1024,
            read_timeout: Some(Duration::from_millis(100)),
            reuse_address: false,
        }
    }
}

/// UDP socket used by clients and servers
#[derive(Debug)]
pub struct NetSocket {
    inner: UdpSocket,
}

impl NetSocket {
    /// Bind a socket to `addr`
    pub fn bind(addr: SocketAddr, options: &SocketOptions) -> Result<Self, SocketError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        if options.reuse_address {
            socket.set_reuse_address(true)?;
        }

        // Buffer sizes are a hint; the OS may clamp them
        if let Err(e) = socket.set_send_buffer_size(options.buffer_size) {
            debug!("failed to set send buffer size: {}", e);
        }
        if let Err(e) = socket.set_recv_buffer_size(options.buffer_size) {
            debug!("failed to set receive buffer size: {}", e);
        }

        socket.bind(&addr.into())?;

        let inner: UdpSocket = socket.into();
        inner.set_read_timeout(options.read_timeout)?;

        Ok(NetSocket { inner })
    }

    /// Bind to an ephemeral port on the wildcard address matching `remote`'s family
    pub fn bind_for(remote: SocketAddr, options: &SocketOptions) -> Result<Self, SocketError> {
        let local = if remote.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        Self::bind(local, options)
    }

    /// Get the local address this socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        Ok(self.inner.local_addr()?)
    }

    /// Send a datagram to `target`
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        Ok(self.inner.send_to(buf, target)?)
    }

    /// Receive one datagram.
    ///
    /// Returns a timeout error (see [`SocketError::is_timeout`]) when nothing
    /// arrived within the read timeout.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError> {
        Ok(self.inner.recv_from(buf)?)
    }

    pub fn send_buffer_size(&self) -> Result<usize, SocketError> {
        Ok(socket2::SockRef::from(&self.inner).send_buffer_size()?)
    }

    pub fn recv_buffer_size(&self) -> Result<usize, SocketError> {
        Ok(socket2::SockRef::from(&self.inner).recv_buffer_size()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_bind_and_local_addr() {
        let socket = NetSocket::bind(loopback(), &SocketOptions::default()).unwrap();
        let addr = socket.local_addr().unwrap();
        assert!(addr.port() > 0);
        assert!(socket.recv_buffer_size().unwrap() > 0);
    }

    #[test]
    fn test_send_recv() {
        let options = SocketOptions::default();
        let a = NetSocket::bind(loopback(), &options).unwrap();
        let b = NetSocket::bind(loopback(), &options).unwrap();

        a.send_to(b"ping", b.local_addr().unwrap()).unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = b.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, a.local_addr().unwrap());
    }

    #[test]
    fn test_read_timeout() {
        let options = SocketOptions {
            read_timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let socket = NetSocket::bind(loopback(), &options).unwrap();

        let mut buf = [0u8; 16];
        let err = socket.recv_from(&mut buf).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_bind_for_family() {
        let remote: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let socket = NetSocket::bind_for(remote, &SocketOptions::default()).unwrap();
        assert!(socket.local_addr().unwrap().is_ipv4());
    }
}
