// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Blocking socket transports, one background loop thread per server.
//!
//! Four variants share a contract:
//!
//! - **construction** resolves, binds/connects and configures the socket;
//!   any failure there is fatal and the background loop never starts
//! - **`run_in_thread`** spawns exactly one loop thread that waits with a
//!   bounded timeout, so the stop flag is observed without external
//!   interruption
//! - **`send`** reports bytes sent; short writes and errors are logged, not
//!   retried - retry policy belongs to the caller's send cadence
//! - **`disconnect`** is idempotent and always runs stop flag -> join ->
//!   drain -> close, in that order, so the socket is never closed under a
//!   thread that is still reading it
//!
//! Servers execute an injected task capability per unit of work: a
//! [`StreamTask`] per accepted connection (one client at a time, serialized)
//! or a [`DatagramTask`] per received datagram (current peer = most recent
//! sender). Transient receive errors keep the loop running; unrecoverable
//! ones end it and clear the liveness flag - there is no error callback,
//! callers poll `is_alive()` / `is_running()`.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::atomic::AtomicBool;

mod tcp_client;
mod tcp_server;
mod udp_client;
mod udp_server;

pub use tcp_client::TcpClient;
pub use tcp_server::TcpServer;
pub use udp_client::UdpClient;
pub use udp_server::UdpServer;

/// Unit of work a stream server runs for each accepted connection.
///
/// The task owns the connection for its whole lifetime: the server loop calls
/// it synchronously and only resumes accepting once it returns. `stop` is the
/// server's stop flag; a long-running task must use bounded reads and return
/// promptly once it is set, or `disconnect` blocks until the client goes
/// away. Return `false` to have the server log a task failure.
pub trait StreamTask: Send {
    /// Handle one accepted connection.
    fn run(&mut self, stream: &mut TcpStream, peer: SocketAddr, stop: &AtomicBool) -> bool;
}

impl<F> StreamTask for F
where
    F: FnMut(&mut TcpStream, SocketAddr, &AtomicBool) -> bool + Send,
{
    fn run(&mut self, stream: &mut TcpStream, peer: SocketAddr, stop: &AtomicBool) -> bool {
        self(stream, peer, stop)
    }
}

/// Unit of work a datagram server runs for each received datagram.
///
/// Gets the server socket (for replies), the payload and the sender address.
/// Return `false` to have the server log a task failure.
pub trait DatagramTask: Send {
    /// Handle one received datagram.
    fn on_datagram(&mut self, socket: &UdpSocket, payload: &[u8], from: SocketAddr) -> bool;
}

impl<F> DatagramTask for F
where
    F: FnMut(&UdpSocket, &[u8], SocketAddr) -> bool + Send,
{
    fn on_datagram(&mut self, socket: &UdpSocket, payload: &[u8], from: SocketAddr) -> bool {
        self(socket, payload, from)
    }
}

/// Anything that can put an encoded heartbeat frame on the wire.
///
/// Implemented by every transport that has a destination; the engine's
/// outbound sender holds one of these and nothing else, keeping it decoupled
/// from the transport variant in use.
pub trait FrameSink: Send + Sync {
    /// Send one encoded frame, returning the bytes actually sent.
    fn send_frame(&self, frame: &[u8]) -> io::Result<usize>;
}

/// Resolve a user-supplied address string plus port.
///
/// `""` means any local interface, `"localhost"` normalizes to the loopback
/// address, an IP literal is used as-is, anything else goes through DNS.
/// Resolution failure is a fatal construction error for the caller.
pub(crate) fn resolve_addr(address: &str, port: u16) -> io::Result<SocketAddr> {
    if address.is_empty() {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    if address == "localhost" {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port));
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    (address, port)
        .to_socket_addrs()?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("could not resolve '{}'", address),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_address_binds_any_interface() {
        let addr = resolve_addr("", 5800).unwrap();
        assert_eq!(addr, "0.0.0.0:5800".parse().unwrap());
    }

    #[test]
    fn localhost_normalizes_to_loopback() {
        let addr = resolve_addr("localhost", 9).unwrap();
        assert_eq!(addr, "127.0.0.1:9".parse().unwrap());
    }

    #[test]
    fn ip_literal_passes_through() {
        let addr = resolve_addr("192.168.1.20", 5801).unwrap();
        assert_eq!(addr, "192.168.1.20:5801".parse().unwrap());
    }

    #[test]
    fn unresolvable_hostname_is_an_error() {
        assert!(resolve_addr("no-such-host.reclink.invalid", 1).is_err());
    }
}
