// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Single-peer datagram server with a background receive loop.
//!
//! Tracks at most one peer: the address of the most recent sender
//! (last-write-wins), which is also where [`UdpServer::send`] delivers.
//! There is no multiplexing across senders. The destination can be preset
//! with [`UdpServer::set_peer`] so the heartbeat sender has somewhere to
//! transmit before the first datagram arrives.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use super::{resolve_addr, DatagramTask, FrameSink};
use crate::config::{DRAIN_TIMEOUT, RECV_BUFFER_SIZE};
use crate::net;

/// Datagram server bound to one local port, feeding received datagrams to an
/// injected [`DatagramTask`] on a dedicated thread.
pub struct UdpServer {
    /// Bound socket; `None` once disconnected (closing it is the last step of
    /// teardown).
    socket: Option<Arc<UdpSocket>>,
    local_addr: SocketAddr,
    /// Address of the most recent sender / preset destination.
    peer: Arc<Mutex<Option<SocketAddr>>>,
    /// Bind succeeded and the server has not been torn down.
    alive: Arc<AtomicBool>,
    /// Receive loop is executing.
    running: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    loop_thread: Option<JoinHandle<()>>,
}

impl UdpServer {
    /// Bind to `address:port`.
    ///
    /// `address` follows the usual convention: `""` binds any interface,
    /// `"localhost"` the loopback. Resolve or bind failure is fatal; on `Err`
    /// there is no instance and no background loop. A failure to enlarge the
    /// receive buffer is logged and ignored.
    pub fn bind(address: &str, port: u16) -> io::Result<Self> {
        let bind_addr = resolve_addr(address, port)?;

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&bind_addr.into())?;
        if let Err(err) = socket.set_recv_buffer_size(RECV_BUFFER_SIZE) {
            log::warn!("[udp-server] could not size receive buffer: {}", err);
        }

        let socket: UdpSocket = socket.into();
        let local_addr = socket.local_addr()?;
        log::debug!("[udp-server] bound to {}", local_addr);

        Ok(Self {
            socket: Some(Arc::new(socket)),
            local_addr,
            peer: Arc::new(Mutex::new(None)),
            alive: Arc::new(AtomicBool::new(true)),
            running: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            loop_thread: None,
        })
    }

    /// Preset the peer this server sends to, before any datagram has been
    /// received from it.
    pub fn set_peer(&self, address: &str, port: u16) -> io::Result<()> {
        let addr = resolve_addr(address, port)?;
        *self.peer.lock() = Some(addr);
        Ok(())
    }

    /// Spawn the background receive loop.
    ///
    /// Each inbound datagram updates the current peer to its sender and is
    /// handed to `task` with the socket, payload and sender address. The
    /// socket receive timeout is set to `read_timeout` so the stop flag is
    /// observed even on a silent link. Returns `false` if the server is dead
    /// or the loop is already running.
    pub fn run_in_thread<T>(&mut self, mut task: T, read_size: usize, read_timeout: Duration) -> bool
    where
        T: DatagramTask + 'static,
    {
        let Some(socket) = self.socket.clone() else {
            return false;
        };
        if !self.alive.load(Ordering::Acquire) || self.running.load(Ordering::Acquire) {
            log::warn!("[udp-server] run refused: not alive or already running");
            return false;
        }

        net::set_timeouts(&*socket, Duration::ZERO, read_timeout);

        let peer = Arc::clone(&self.peer);
        let alive = Arc::clone(&self.alive);
        let running = Arc::clone(&self.running);
        let stop = Arc::clone(&self.stop);
        running.store(true, Ordering::Release);

        self.loop_thread = Some(thread::spawn(move || {
            let mut buf = vec![0u8; read_size];
            while !stop.load(Ordering::Acquire) {
                match socket.recv_from(&mut buf) {
                    Ok((len, from)) => {
                        *peer.lock() = Some(from);
                        if !task.on_datagram(&socket, &buf[..len], from) {
                            log::warn!("[udp-server] task reported failure for {}", from);
                        }
                    }
                    Err(err) if is_transient(&err) => {}
                    Err(err) => {
                        log::error!("[udp-server] receive loop terminated: {}", err);
                        alive.store(false, Ordering::Release);
                        break;
                    }
                }
            }
            running.store(false, Ordering::Release);
            log::debug!("[udp-server] receive loop exited");
        }));
        true
    }

    /// Send `buf` to the current peer, returning the bytes actually sent.
    ///
    /// A short send or error is logged and surfaced, never retried here.
    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let socket = self.socket_ref()?;
        let peer = match *self.peer.lock() {
            Some(addr) => addr,
            None => {
                log::warn!("[udp-server] send with no peer address set");
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "no peer address known",
                ));
            }
        };

        match socket.send_to(buf, peer) {
            Ok(sent) => {
                if sent != buf.len() {
                    log::warn!(
                        "[udp-server] short send to {}: {} of {} bytes",
                        peer,
                        sent,
                        buf.len()
                    );
                }
                Ok(sent)
            }
            Err(err) => {
                log::warn!("[udp-server] send to {} failed: {}", peer, err);
                Err(err)
            }
        }
    }

    /// Synchronous receive, outside the background loop. Updates the current
    /// peer to the sender.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let socket = self.socket_ref()?;
        let (len, from) = socket.recv_from(buf)?;
        *self.peer.lock() = Some(from);
        Ok((len, from))
    }

    /// Whether bind succeeded and the server has not been torn down.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Whether the background receive loop is executing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Local bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current peer: most recent sender, or the preset destination.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.peer.lock()
    }

    /// Stop the loop and release the socket. Idempotent.
    ///
    /// Ordering is stop flag -> join -> drain -> close; the socket is never
    /// closed while the loop thread may still be reading it.
    pub fn disconnect(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.loop_thread.take() {
            if handle.join().is_err() {
                log::error!("[udp-server] receive loop panicked");
            }
        }
        if let Some(socket) = self.socket.take() {
            net::drain(&*socket, DRAIN_TIMEOUT);
            // Last reference: dropping it closes the socket.
        }
        self.alive.store(false, Ordering::Release);
    }

    fn socket_ref(&self) -> io::Result<&Arc<UdpSocket>> {
        self.socket
            .as_ref()
            .filter(|_| self.alive.load(Ordering::Acquire))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "server is disconnected"))
    }
}

impl Drop for UdpServer {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl FrameSink for UdpServer {
    fn send_frame(&self, frame: &[u8]) -> io::Result<usize> {
        self.send(frame)
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
