//! Network utility functions
//!
//! This module provides address parsing and socket setup for the listener
//! and accepted connections.

use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::error::{GatewayError, Result};

/// Parse a socket address
///
/// # Arguments
///
/// * `addr` - The address string to parse, either `ip:port` or `host:port`
///
/// # Returns
///
/// The parsed `SocketAddr`
pub fn parse_socket_addr(addr: &str) -> Result<SocketAddr> {
    if let Ok(socket_addr) = SocketAddr::from_str(addr) {
        return Ok(socket_addr);
    }

    match addr.to_socket_addrs() {
        Ok(mut addrs) => {
            if let Some(addr) = addrs.next() {
                Ok(addr)
            } else {
                Err(GatewayError::Config(format!("Failed to parse address: {}", addr)))
            }
        }
        Err(e) => Err(GatewayError::Config(format!("Failed to parse address {}: {}", addr, e))),
    }
}

/// Bind a TCP listener with address reuse and an explicit accept backlog
///
/// Must be called from within a tokio runtime.
pub fn bind_listener(addr: SocketAddr, backlog: u32) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.min(i32::MAX as u32) as i32)?;

    let listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(listener)?)
}

/// Apply per-connection socket options to an accepted stream
pub fn configure_stream(stream: &TcpStream, nodelay: bool, keepalive: bool) -> Result<()> {
    stream.set_nodelay(nodelay)?;
    if keepalive {
        SockRef::from(stream).set_keepalive(true)?;
    }
    Ok(())
}

/// Flush whatever is pending and close the write side
///
/// Used instead of dropping the socket outright so a well-behaved peer sees a
/// FIN rather than a reset. Errors are ignored, the peer may already be gone.
pub async fn close_on_flush<S>(stream: &mut S)
where
    S: AsyncWrite + Unpin + ?Sized,
{
    let _ = stream.flush().await;
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_socket_addr() {
        let addr = parse_socket_addr("127.0.0.1:8080");
        assert!(addr.is_ok(), "Should be able to parse a valid address");

        if let Ok(socket_addr) = addr {
            assert_eq!(socket_addr.port(), 8080);
        }

        let addr = parse_socket_addr("invalid-address");
        assert!(addr.is_err(), "Should fail to parse an invalid address");
    }

    #[tokio::test]
    async fn test_bind_listener_ephemeral_port() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), 128).unwrap();
        let local = listener.local_addr().unwrap();
        assert_ne!(local.port(), 0);

        let client = tokio::spawn(async move { TcpStream::connect(local).await.unwrap() });
        let (server, _) = listener.accept().await.unwrap();
        configure_stream(&server, true, true).unwrap();
        assert!(server.nodelay().unwrap());
        client.await.unwrap();
    }
}
