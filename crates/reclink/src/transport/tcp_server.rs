// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Single-client stream server with a background accept loop.
//!
//! The loop waits for readiness on the listener (bounded by an accept
//! timeout so the stop flag is observed), accepts one connection, and runs
//! the injected [`StreamTask`] synchronously until it returns. Only then is
//! the connection drained, closed, and accepting resumed: one client at a
//! time, strictly serialized. A second connection attempt queues in the OS
//! accept backlog until the first task completes.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use super::{resolve_addr, StreamTask};
use crate::config::DRAIN_TIMEOUT;
use crate::net;

/// Stream server bound to one local port, running one [`StreamTask`] per
/// accepted connection on a dedicated thread.
pub struct TcpServer {
    /// Bound listener; `None` once disconnected.
    listener: Option<Arc<TcpListener>>,
    local_addr: SocketAddr,
    /// Address of the currently connected client, if any.
    client: Arc<Mutex<Option<SocketAddr>>>,
    alive: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    loop_thread: Option<JoinHandle<()>>,
}

impl TcpServer {
    /// Bind and listen on `address:port` with a backlog of one.
    ///
    /// Resolve, bind or listen failure is fatal: on `Err` there is no
    /// instance and no background loop.
    pub fn bind(address: &str, port: u16) -> io::Result<Self> {
        let bind_addr = resolve_addr(address, port)?;

        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&bind_addr.into())?;
        socket.listen(1)?;

        let listener: TcpListener = socket.into();
        let local_addr = listener.local_addr()?;
        log::debug!("[tcp-server] listening on {}", local_addr);

        Ok(Self {
            listener: Some(Arc::new(listener)),
            local_addr,
            client: Arc::new(Mutex::new(None)),
            alive: Arc::new(AtomicBool::new(true)),
            running: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            loop_thread: None,
        })
    }

    /// Spawn the background accept loop.
    ///
    /// `accept_timeout` bounds each readiness wait on the listener; between
    /// waits the stop flag is re-checked. Returns `false` if the server is
    /// dead or the loop is already running.
    pub fn run_in_thread<T>(&mut self, mut task: T, accept_timeout: Duration) -> bool
    where
        T: StreamTask + 'static,
    {
        let Some(listener) = self.listener.clone() else {
            return false;
        };
        if !self.alive.load(Ordering::Acquire) || self.running.load(Ordering::Acquire) {
            log::warn!("[tcp-server] run refused: not alive or already running");
            return false;
        }

        let client = Arc::clone(&self.client);
        let alive = Arc::clone(&self.alive);
        let running = Arc::clone(&self.running);
        let stop = Arc::clone(&self.stop);
        running.store(true, Ordering::Release);

        self.loop_thread = Some(thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                if !net::wait_readable(&*listener, accept_timeout) {
                    continue;
                }
                let (mut stream, peer) = match listener.accept() {
                    Ok(accepted) => accepted,
                    Err(err) if is_transient(&err) => continue,
                    Err(err) => {
                        log::error!("[tcp-server] accept loop terminated: {}", err);
                        alive.store(false, Ordering::Release);
                        break;
                    }
                };

                log::debug!("[tcp-server] connection from {}", peer);
                *client.lock() = Some(peer);

                // One client at a time: the task owns the connection until it
                // returns, then the socket is drained and closed before the
                // next accept. The stop flag is handed to the task so
                // disconnect does not wait out a connected client.
                if !task.run(&mut stream, peer, &stop) {
                    log::warn!("[tcp-server] task reported failure for {}", peer);
                }
                net::drain(&stream, DRAIN_TIMEOUT);
                drop(stream);
                *client.lock() = None;
            }
            running.store(false, Ordering::Release);
            log::debug!("[tcp-server] accept loop exited");
        }));
        true
    }

    /// Whether bind/listen succeeded and the server has not been torn down.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Whether the background accept loop is executing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether a client task is currently in flight.
    #[must_use]
    pub fn is_client_connected(&self) -> bool {
        self.client.lock().is_some()
    }

    /// Address of the currently connected client.
    #[must_use]
    pub fn client_addr(&self) -> Option<SocketAddr> {
        *self.client.lock()
    }

    /// Local bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the loop and release the listener. Idempotent.
    ///
    /// Ordering is stop flag -> join -> drain -> close; the listener is never
    /// closed while the loop thread may still be using it. The stop flag is
    /// visible to an in-flight client task through its `stop` parameter, and
    /// the task is expected to return promptly once it is set.
    pub fn disconnect(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.loop_thread.take() {
            if handle.join().is_err() {
                log::error!("[tcp-server] accept loop panicked");
            }
        }
        if let Some(listener) = self.listener.take() {
            net::drain(&*listener, DRAIN_TIMEOUT);
        }
        self.alive.store(false, Ordering::Release);
        *self.client.lock() = None;
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpStream, SocketAddr};
    use std::time::Instant;

    #[test]
    fn bind_on_ephemeral_port() {
        let server = TcpServer::bind("localhost", 0).unwrap();
        assert!(server.is_alive());
        assert!(!server.is_running());
        assert!(!server.is_client_connected());
    }

    #[test]
    fn bind_conflict_is_fatal() {
        let first = TcpServer::bind("localhost", 0).unwrap();
        let port = first.local_addr().port();
        // A second live listener on the same port fails at construction;
        // SO_REUSEADDR does not cover two sockets in LISTEN state.
        assert!(TcpServer::bind("localhost", port).is_err());
    }

    #[test]
    fn serves_one_connection_then_the_next() {
        let mut server = TcpServer::bind("localhost", 0).unwrap();
        let port = server.local_addr().port();
        assert!(server.run_in_thread(
            |stream: &mut TcpStream, _peer: SocketAddr, _stop: &AtomicBool| {
                let mut buf = [0u8; 16];
                let n = stream.read(&mut buf).unwrap_or(0);
                stream.write_all(&buf[..n]).is_ok()
            },
            Duration::from_millis(100),
        ));

        for msg in [b"one".as_slice(), b"two".as_slice()] {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
            stream.write_all(msg).unwrap();
            let mut buf = [0u8; 16];
            stream
                .set_read_timeout(Some(Duration::from_secs(2)))
                .unwrap();
            let n = stream.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], msg);
        }

        server.disconnect();
        assert!(!server.is_running());
    }

    #[test]
    fn second_connection_waits_for_first_task() {
        let mut server = TcpServer::bind("localhost", 0).unwrap();
        let port = server.local_addr().port();
        let served: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&served);
        assert!(server.run_in_thread(
            move |stream: &mut TcpStream, _peer: SocketAddr, _stop: &AtomicBool| {
                let mut buf = [0u8; 16];
                let n = stream.read(&mut buf).unwrap_or(0);
                // Hold the connection so the next client has to queue.
                std::thread::sleep(Duration::from_millis(300));
                log.lock().push(buf[..n].to_vec());
                stream.write_all(&buf[..n]).is_ok()
            },
            Duration::from_millis(50),
        ));

        let mut first = TcpStream::connect(("127.0.0.1", port)).unwrap();
        first.write_all(b"first").unwrap();
        std::thread::sleep(Duration::from_millis(100));

        // Second client connects while the first task is still in flight;
        // it sits in the accept backlog and is only served afterwards.
        let queued = Instant::now();
        let mut second = TcpStream::connect(("127.0.0.1", port)).unwrap();
        second.write_all(b"second").unwrap();
        second
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut buf = [0u8; 16];
        let n = second.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"second");
        assert!(
            queued.elapsed() >= Duration::from_millis(400),
            "second client served while the first task was still in flight"
        );
        assert_eq!(
            served.lock().as_slice(),
            &[b"first".to_vec(), b"second".to_vec()]
        );
        server.disconnect();
    }

    #[test]
    fn disconnect_interrupts_an_in_flight_task() {
        let mut server = TcpServer::bind("localhost", 0).unwrap();
        let port = server.local_addr().port();
        assert!(server.run_in_thread(
            |stream: &mut TcpStream, _peer: SocketAddr, stop: &AtomicBool| {
                let _ = stream.set_read_timeout(Some(Duration::from_millis(20)));
                let mut buf = [0u8; 16];
                while !stop.load(Ordering::Acquire) {
                    match stream.read(&mut buf) {
                        Ok(0) => break,
                        Ok(_) => {}
                        Err(ref err) if matches!(
                            err.kind(),
                            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                        ) => {}
                        Err(_) => break,
                    }
                }
                true
            },
            Duration::from_millis(50),
        ));

        // A client connects and stays silent; the task holds the connection.
        let _client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert!(server.is_client_connected());

        let begun = Instant::now();
        server.disconnect();
        assert!(
            begun.elapsed() < Duration::from_secs(1),
            "disconnect blocked on an in-flight task"
        );
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut server = TcpServer::bind("localhost", 0).unwrap();
        assert!(server.run_in_thread(
            |_: &mut TcpStream, _: SocketAddr, _: &AtomicBool| true,
            Duration::from_millis(20),
        ));
        server.disconnect();
        assert!(!server.is_alive());
        server.disconnect();
        assert!(!server.is_alive());
        assert!(!server.is_running());
    }

    #[test]
    fn run_refused_twice() {
        let mut server = TcpServer::bind("localhost", 0).unwrap();
        assert!(server.run_in_thread(
            |_: &mut TcpStream, _: SocketAddr, _: &AtomicBool| true,
            Duration::from_millis(20),
        ));
        assert!(!server.run_in_thread(
            |_: &mut TcpStream, _: SocketAddr, _: &AtomicBool| true,
            Duration::from_millis(20),
        ));
        server.disconnect();
    }
}
