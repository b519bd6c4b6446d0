// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stream client: one blocking connection to a server.
//!
//! No background thread; the caller drives reads and writes. Teardown drains
//! the connection before closing so the server side does not see an abrupt
//! reset.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{resolve_addr, FrameSink};
use crate::config::DRAIN_TIMEOUT;
use crate::net;

/// Stream client connected to one server.
pub struct TcpClient {
    stream: Option<TcpStream>,
    peer: SocketAddr,
    alive: AtomicBool,
}

impl TcpClient {
    /// Resolve `address:port` and connect.
    ///
    /// Resolve or connect failure is fatal: on `Err` there is no instance.
    /// `""` and `"localhost"` both mean the loopback address here.
    pub fn connect(address: &str, port: u16) -> io::Result<Self> {
        let target = if address.is_empty() { "localhost" } else { address };
        let peer = resolve_addr(target, port)?;
        let stream = TcpStream::connect(peer)?;
        log::debug!("[tcp-client] connected {} -> {}", stream.local_addr()?, peer);
        Ok(Self {
            stream: Some(stream),
            peer,
            alive: AtomicBool::new(true),
        })
    }

    /// Configure send/receive timeouts on the connection. Failure is
    /// non-fatal and logged.
    pub fn set_timeouts(&self, send: Duration, recv: Duration) -> bool {
        match self.stream.as_ref() {
            Some(stream) => net::set_timeouts(stream, send, recv),
            None => false,
        }
    }

    /// Send `buf`, returning the bytes actually sent.
    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let mut stream = self.stream_ref()?;
        match stream.write(buf) {
            Ok(sent) => {
                if sent != buf.len() {
                    log::warn!(
                        "[tcp-client] short send to {}: {} of {} bytes",
                        self.peer,
                        sent,
                        buf.len()
                    );
                }
                Ok(sent)
            }
            Err(err) => {
                log::warn!("[tcp-client] send to {} failed: {}", self.peer, err);
                Err(err)
            }
        }
    }

    /// Blocking receive on the connection. `Ok(0)` means the server closed
    /// its end.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream = self.stream_ref()?;
        stream.read(buf)
    }

    /// Whether connect succeeded and the client has not been torn down.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Server address.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Drain and close the connection. Idempotent.
    pub fn disconnect(&mut self) {
        self.alive.store(false, Ordering::Release);
        if let Some(stream) = self.stream.take() {
            net::drain(&stream, DRAIN_TIMEOUT);
            // Dropping the stream closes it.
        }
    }

    fn stream_ref(&self) -> io::Result<&TcpStream> {
        self.stream
            .as_ref()
            .filter(|_| self.alive.load(Ordering::Acquire))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "client is disconnected"))
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl FrameSink for TcpClient {
    fn send_frame(&self, frame: &[u8]) -> io::Result<usize> {
        self.send(frame)
    }
}
