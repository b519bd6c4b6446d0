// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Datagram client: an ephemeral local socket aimed at one destination.
//!
//! No background thread; the client only sends. Replies, if any, arrive at
//! the ephemeral source port and can be read with [`UdpClient::recv`].

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};

use super::{resolve_addr, FrameSink};

/// Datagram client bound to an OS-assigned local port.
pub struct UdpClient {
    socket: Option<UdpSocket>,
    target: SocketAddr,
    alive: AtomicBool,
}

impl UdpClient {
    /// Resolve `address:port` and open a socket aimed at it.
    ///
    /// Resolve or bind failure is fatal: on `Err` there is no instance.
    pub fn connect(address: &str, port: u16) -> io::Result<Self> {
        let target = resolve_addr(address, port)?;
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        log::debug!(
            "[udp-client] {} -> {}",
            socket.local_addr()?,
            target
        );
        Ok(Self {
            socket: Some(socket),
            target,
            alive: AtomicBool::new(true),
        })
    }

    /// Send `buf` to the target, returning the bytes actually sent.
    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let socket = self.socket_ref()?;
        match socket.send_to(buf, self.target) {
            Ok(sent) => {
                if sent != buf.len() {
                    log::warn!(
                        "[udp-client] short send to {}: {} of {} bytes",
                        self.target,
                        sent,
                        buf.len()
                    );
                }
                Ok(sent)
            }
            Err(err) => {
                log::warn!("[udp-client] send to {} failed: {}", self.target, err);
                Err(err)
            }
        }
    }

    /// Blocking receive on the client socket.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket_ref()?.recv_from(buf)
    }

    /// Whether construction succeeded and the client has not been torn down.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Destination address.
    #[must_use]
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Release the socket. Idempotent.
    pub fn disconnect(&mut self) {
        self.alive.store(false, Ordering::Release);
        // No loop thread to join; dropping the socket closes it.
        self.socket.take();
    }

    fn socket_ref(&self) -> io::Result<&UdpSocket> {
        self.socket
            .as_ref()
            .filter(|_| self.alive.load(Ordering::Acquire))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "client is disconnected"))
    }
}

impl Drop for UdpClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl FrameSink for UdpClient {
    fn send_frame(&self, frame: &[u8]) -> io::Result<usize> {
        self.send(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn sends_to_resolved_target() {
        let rx = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = rx.local_addr().unwrap().port();
        let client = UdpClient::connect("localhost", port).unwrap();
        assert!(client.is_alive());

        assert_eq!(client.send(b"hello").unwrap(), 5);
        let mut buf = [0u8; 16];
        rx.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
        let (n, from) = rx.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(from.port(), client.socket_ref().unwrap().local_addr().unwrap().port());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut client = UdpClient::connect("127.0.0.1", 5801).unwrap();
        client.disconnect();
        assert!(!client.is_alive());
        client.disconnect();
        assert!(!client.is_alive());
        assert!(client.send(b"x").is_err());
    }
}
