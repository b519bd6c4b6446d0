// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Socket-level utilities shared by every transport.
//!
//! Thin wrappers over `poll(2)`, `recv(2)` and `setsockopt(2)` that the
//! transport loops use for bounded waits, graceful drain before close, and
//! directional timeouts. All of them are best effort: failures are logged and
//! reported as `false`, never panicked on.

use std::os::fd::{AsFd, AsRawFd};
use std::time::{Duration, Instant};

use socket2::SockRef;

/// Current monotonic wall clock in microseconds.
///
/// This is the clock stamped into outgoing frames and compared against the
/// liveness window. It is monotonic, not UTC: only differences are
/// meaningful, and only on the machine that produced them.
#[must_use]
pub fn wall_clock_us() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: clock_gettime writes into a valid timespec; CLOCK_MONOTONIC is
    // always available on the platforms we target.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        log::warn!("[net] clock_gettime failed: {}", std::io::Error::last_os_error());
        return 0;
    }
    ts.tv_sec as u64 * 1_000_000 + ts.tv_nsec as u64 / 1_000
}

/// Block until `socket` has pending input or `timeout` elapses.
///
/// Returns `true` if data (or a pending accept) is ready, `false` on timeout
/// or error. An interrupted wait (`EINTR`) is retried with the remaining
/// budget rather than being reported as a timeout.
pub fn wait_readable<S: AsFd>(socket: &S, timeout: Duration) -> bool {
    let fd = socket.as_fd().as_raw_fd();
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: pfd is a valid pollfd array of length 1 for the duration of
        // the call.
        let rc = unsafe { libc::poll(&mut pfd, 1, remaining.as_millis() as libc::c_int) };
        match rc {
            0 => return false,
            1 => return pfd.revents & libc::POLLIN != 0,
            _ => {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    continue;
                }
                log::warn!("[net] poll failed on fd {}: {}", fd, err);
                return false;
            }
        }
    }
}

/// Best-effort drain of `socket` before close, bounded by `timeout`.
///
/// Shuts down the write side, then discards pending input until the peer
/// stops sending or the budget runs out. Avoids an abrupt peer-visible reset
/// on shutdown. Returns `true` once the socket is quiet.
pub fn drain<S: AsFd>(socket: &S, timeout: Duration) -> bool {
    let fd = socket.as_fd().as_raw_fd();
    let deadline = Instant::now() + timeout;
    let mut discard = [0u8; 128];

    // SAFETY: plain shutdown(2) on a fd we own. Fails on sockets that are not
    // connected (datagram, listeners); the drain loop below still applies.
    unsafe {
        libc::shutdown(fd, libc::SHUT_WR);
    }

    while Instant::now() < deadline {
        if !wait_readable(socket, Duration::from_millis(10)) {
            return true;
        }
        // SAFETY: discard is a valid buffer of the advertised length.
        let n = unsafe {
            libc::recv(
                fd,
                discard.as_mut_ptr().cast::<libc::c_void>(),
                discard.len(),
                0,
            )
        };
        if n <= 0 {
            return true;
        }
    }
    log::debug!("[net] drain on fd {} hit its deadline", fd);
    false
}

/// Configure send and receive timeouts on `socket`.
///
/// A zero duration leaves the corresponding direction blocking. Failure is
/// non-fatal: it is logged and reported as `false`, the socket stays usable.
pub fn set_timeouts<S: AsFd>(socket: &S, send: Duration, recv: Duration) -> bool {
    let sock = SockRef::from(socket);
    let mut ok = true;

    let send = (!send.is_zero()).then_some(send);
    if let Err(err) = sock.set_write_timeout(send) {
        log::warn!("[net] could not set send timeout: {}", err);
        ok = false;
    }
    let recv = (!recv.is_zero()).then_some(recv);
    if let Err(err) = sock.set_read_timeout(recv) {
        log::warn!("[net] could not set receive timeout: {}", err);
        ok = false;
    }
    ok
}
