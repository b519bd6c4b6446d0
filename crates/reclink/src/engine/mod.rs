// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Heartbeat engine: liveness tick, peer-state machine, outbound sender.
//!
//! One engine instance owns one [`PeerState`] - the single source of truth
//! external collaborators read. Two long-lived threads drive it:
//!
//! ```text
//! receive path (transport thread) --> handle_frame() --> shared snapshot
//!                                                             |
//! tick thread (every period) ------ next_state() ------------+--> observer
//! send thread (every period) ------ CommandSource --> FrameSink
//! ```
//!
//! The shared snapshot (state, last-frame timestamp, last mode) is written
//! only by the receive path and the tick thread, and read by everyone else
//! under one mutex. Readers get eventual consistency: a frame decoded at
//! time T is visible at T+epsilon, no stronger ordering is promised, and the
//! send and receive cadences are independent.
//!
//! The liveness baseline is seeded to "now" when the engine starts, so the
//! first ticks measure silence since startup rather than comparing against
//! an uninitialized timestamp (which would fake an immediate disconnect).

use std::io;
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::net::wall_clock_us;
use crate::protocol::{self, Frame, Mode, FRAME_LEN};
use crate::transport::FrameSink;

mod hooks;
mod state;

pub use hooks::{CommandSource, NullObserver, ProcessSupervisor, SharedCommand, StateObserver};
pub use state::{next_state, PeerState};

pub use crate::config::EngineConfig;

/// Which kind of frame this side emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Field device: sends command frames carrying the locally desired mode.
    Commander,
    /// Recording host: sends status frames carrying its actual mode.
    Responder,
}

/// Counters and current state, for observability.
///
/// Malformed traffic is invisible on the wire-facing indicators by design;
/// this snapshot is where it shows up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Current peer state.
    pub peer_state: PeerState,
    /// Valid frames decoded.
    pub frames_received: u64,
    /// Buffers discarded by the codec.
    pub frames_malformed: u64,
    /// Heartbeats handed to the sink.
    pub frames_sent: u64,
}

/// Mutable engine state, written by the receive path and the tick thread.
#[derive(Debug)]
struct Shared {
    peer_state: PeerState,
    /// Monotonic microseconds of the last validly decoded frame; seeded to
    /// "now" at start.
    last_rx_us: u64,
    /// Mode of the most recent valid frame.
    last_mode: Option<Mode>,
    /// A valid frame arrived since the previous tick.
    fresh: bool,
    /// The peer has been seen connected since the last silence episode.
    was_connected: bool,
    frames_received: u64,
    frames_malformed: u64,
    frames_sent: u64,
}

struct EngineInner {
    cfg: EngineConfig,
    shared: Mutex<Shared>,
    observer: Arc<dyn StateObserver>,
    command: Arc<dyn CommandSource>,
    sink: Arc<dyn FrameSink>,
    stop: AtomicBool,
}

impl EngineInner {
    fn handle_frame(&self, payload: &[u8]) {
        match protocol::decode(payload) {
            Ok(frame) => {
                let mut shared = self.shared.lock();
                shared.last_rx_us = wall_clock_us();
                shared.last_mode = Some(frame.mode);
                shared.fresh = true;
                shared.frames_received += 1;
            }
            Err(err) => {
                self.shared.lock().frames_malformed += 1;
                log::debug!("[engine] discarded frame: {}", err);
            }
        }
    }

    fn tick(&self) {
        let now = wall_clock_us();
        let mut changed = None;
        let mut lost = false;
        {
            let mut shared = self.shared.lock();
            let elapsed = now.saturating_sub(shared.last_rx_us);
            let next = state::next_state(
                shared.peer_state,
                elapsed,
                self.cfg.liveness_window_us(),
                shared.last_mode,
                shared.fresh,
            );
            shared.fresh = false;
            if next != shared.peer_state {
                shared.peer_state = next;
                changed = Some(next);
                if next.is_connected() {
                    shared.was_connected = true;
                } else if shared.was_connected {
                    // First tick past the window after having been
                    // connected: report the loss exactly once.
                    shared.was_connected = false;
                    lost = true;
                }
            }
        }
        // Hooks run outside the lock; they may call back into the engine.
        if let Some(new_state) = changed {
            log::info!("[engine] peer state -> {}", new_state);
            self.observer.on_state_changed(new_state);
        }
        if lost {
            log::warn!("[engine] connection lost (silence past liveness window)");
            self.observer.on_connection_lost();
        }
    }

    fn send_heartbeat(&self) {
        let mode = self.command.commanded_mode();
        let frame = match self.cfg.role {
            Role::Commander => Frame::command(mode, wall_clock_us()),
            Role::Responder => Frame::status(mode, wall_clock_us()),
        };
        match self.sink.send_frame(&frame.encode()) {
            Ok(_) => self.shared.lock().frames_sent += 1,
            // Send failures are a transport concern; the cadence retries
            // naturally on the next beat.
            Err(err) => log::debug!("[engine] heartbeat send failed: {}", err),
        }
    }
}

/// The heartbeat engine handle: owns the tick and sender threads.
///
/// Dropping the handle stops both threads.
pub struct HeartbeatEngine {
    inner: Arc<EngineInner>,
    tick_thread: Option<JoinHandle<()>>,
    send_thread: Option<JoinHandle<()>>,
}

impl HeartbeatEngine {
    /// Start the engine: seed the liveness baseline and spawn the tick and
    /// sender threads.
    ///
    /// `sink` is where encoded heartbeats go; `command` supplies the mode
    /// they carry; `observer` hears about peer-state transitions.
    pub fn start(
        cfg: EngineConfig,
        sink: Arc<dyn FrameSink>,
        command: Arc<dyn CommandSource>,
        observer: Arc<dyn StateObserver>,
    ) -> Self {
        let inner = Arc::new(EngineInner {
            cfg,
            shared: Mutex::new(Shared {
                peer_state: PeerState::Disconnected,
                last_rx_us: wall_clock_us(),
                last_mode: None,
                fresh: false,
                was_connected: false,
                frames_received: 0,
                frames_malformed: 0,
                frames_sent: 0,
            }),
            observer,
            command,
            sink,
            stop: AtomicBool::new(false),
        });

        let tick_inner = Arc::clone(&inner);
        let tick_thread = thread::spawn(move || {
            while !tick_inner.stop.load(Ordering::Acquire) {
                thread::sleep(tick_inner.cfg.heartbeat_period);
                tick_inner.tick();
            }
            log::debug!("[engine] tick thread exited");
        });

        let send_inner = Arc::clone(&inner);
        let send_thread = thread::spawn(move || {
            while !send_inner.stop.load(Ordering::Acquire) {
                send_inner.send_heartbeat();
                thread::sleep(send_inner.cfg.heartbeat_period);
            }
            log::debug!("[engine] send thread exited");
        });

        Self {
            inner,
            tick_thread: Some(tick_thread),
            send_thread: Some(send_thread),
        }
    }

    /// Feed one received buffer through the codec into the state machine.
    ///
    /// Invalid buffers are counted and dropped without touching peer state.
    pub fn handle_frame(&self, payload: &[u8]) {
        self.inner.handle_frame(payload);
    }

    /// Datagram-server task that feeds this engine.
    #[must_use]
    pub fn receiver(
        &self,
    ) -> impl FnMut(&UdpSocket, &[u8], SocketAddr) -> bool + Send + 'static {
        let inner = Arc::clone(&self.inner);
        move |_socket, payload, _from| {
            inner.handle_frame(payload);
            true
        }
    }

    /// Stream-server task that feeds this engine.
    ///
    /// Reads fixed-size frames until the client closes, an unrecoverable
    /// error occurs, or the engine or the server stops.
    #[must_use]
    pub fn stream_receiver(
        &self,
    ) -> impl FnMut(&mut TcpStream, SocketAddr, &AtomicBool) -> bool + Send + 'static {
        let inner = Arc::clone(&self.inner);
        move |stream, peer, stop| {
            use std::io::Read;
            // Bounded reads so the stop flags are observed on a silent link.
            if let Err(err) = stream.set_read_timeout(Some(crate::config::READ_TIMEOUT)) {
                log::warn!("[engine] could not set read timeout for {}: {}", peer, err);
            }
            // Partial reads keep their place in `buf`. A stall mid-frame
            // must not shift the frame boundary: the remainder is filled in
            // on the next read, never restarted from offset zero.
            let mut buf = [0u8; FRAME_LEN];
            let mut filled = 0usize;
            while !inner.stop.load(Ordering::Acquire) && !stop.load(Ordering::Acquire) {
                match stream.read(&mut buf[filled..]) {
                    Ok(0) => {
                        log::debug!("[engine] stream from {} closed", peer);
                        break;
                    }
                    Ok(n) => {
                        filled += n;
                        if filled == FRAME_LEN {
                            inner.handle_frame(&buf);
                            filled = 0;
                        }
                    }
                    Err(err) if is_transient(&err) => {}
                    Err(err) => {
                        log::debug!("[engine] stream from {} ended: {}", peer, err);
                        break;
                    }
                }
            }
            true
        }
    }

    /// Current peer state.
    #[must_use]
    pub fn peer_state(&self) -> PeerState {
        self.inner.shared.lock().peer_state
    }

    /// Snapshot of counters and state.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let shared = self.inner.shared.lock();
        EngineStats {
            peer_state: shared.peer_state,
            frames_received: shared.frames_received,
            frames_malformed: shared.frames_malformed,
            frames_sent: shared.frames_sent,
        }
    }

    /// Stop both threads. Idempotent; also runs on drop.
    pub fn stop(&mut self) {
        self.inner.stop.store(true, Ordering::Release);
        if let Some(handle) = self.tick_thread.take() {
            if handle.join().is_err() {
                log::error!("[engine] tick thread panicked");
            }
        }
        if let Some(handle) = self.send_thread.take() {
            if handle.join().is_err() {
                log::error!("[engine] send thread panicked");
            }
        }
    }
}

impl Drop for HeartbeatEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Sink that remembers every frame it was handed.
    #[derive(Default)]
    struct CaptureSink {
        frames: Mutex<Vec<Vec<u8>>>,
    }

    impl FrameSink for CaptureSink {
        fn send_frame(&self, frame: &[u8]) -> io::Result<usize> {
            self.frames.lock().push(frame.to_vec());
            Ok(frame.len())
        }
    }

    /// Observer that records transitions and loss events.
    #[derive(Default)]
    struct RecordingObserver {
        transitions: Mutex<Vec<PeerState>>,
        losses: Mutex<u64>,
    }

    impl StateObserver for RecordingObserver {
        fn on_state_changed(&self, new_state: PeerState) {
            self.transitions.lock().push(new_state);
        }

        fn on_connection_lost(&self) {
            *self.losses.lock() += 1;
        }
    }

    fn fast_config(role: Role) -> EngineConfig {
        EngineConfig {
            role,
            heartbeat_period: Duration::from_millis(10),
            liveness_window: Duration::from_millis(100),
        }
    }

    #[test]
    fn starts_disconnected_without_spurious_transition() {
        let observer = Arc::new(RecordingObserver::default());
        let mut engine = HeartbeatEngine::start(
            fast_config(Role::Commander),
            Arc::new(CaptureSink::default()),
            Arc::new(SharedCommand::new(Mode::Standby)),
            observer.clone(),
        );

        // Several ticks inside the (seeded) window with no traffic: nothing
        // must fire, and certainly no connection-lost.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(engine.peer_state(), PeerState::Disconnected);
        assert!(observer.transitions.lock().is_empty());
        assert_eq!(*observer.losses.lock(), 0);
        engine.stop();
    }

    #[test]
    fn frames_drive_standby_then_mode() {
        let observer = Arc::new(RecordingObserver::default());
        let mut engine = HeartbeatEngine::start(
            fast_config(Role::Responder),
            Arc::new(CaptureSink::default()),
            Arc::new(SharedCommand::new(Mode::Standby)),
            observer.clone(),
        );

        for _ in 0..8 {
            engine.handle_frame(&Frame::command(Mode::Recording, wall_clock_us()).encode());
            std::thread::sleep(Duration::from_millis(15));
        }

        assert_eq!(engine.peer_state(), PeerState::Recording);
        let transitions = observer.transitions.lock().clone();
        assert_eq!(
            transitions.first(),
            Some(&PeerState::Standby),
            "reconnect must settle on standby before adopting recording: {:?}",
            transitions
        );
        assert!(transitions.contains(&PeerState::Recording));
        engine.stop();
    }

    #[test]
    fn silence_disconnects_and_reports_loss_once() {
        let observer = Arc::new(RecordingObserver::default());
        let mut engine = HeartbeatEngine::start(
            fast_config(Role::Commander),
            Arc::new(CaptureSink::default()),
            Arc::new(SharedCommand::new(Mode::Standby)),
            observer.clone(),
        );

        for _ in 0..5 {
            engine.handle_frame(&Frame::status(Mode::Standby, wall_clock_us()).encode());
            std::thread::sleep(Duration::from_millis(15));
        }
        assert_eq!(engine.peer_state(), PeerState::Standby);

        // Fall silent for several windows: one disconnect, one loss report.
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(engine.peer_state(), PeerState::Disconnected);
        assert_eq!(*observer.losses.lock(), 1);
        engine.stop();
    }

    #[test]
    fn malformed_input_counts_but_does_not_touch_state() {
        let mut engine = HeartbeatEngine::start(
            fast_config(Role::Commander),
            Arc::new(CaptureSink::default()),
            Arc::new(SharedCommand::new(Mode::Standby)),
            Arc::new(NullObserver),
        );

        let mut bad = Frame::status(Mode::Recording, 1).encode();
        bad[0] = 0x00;
        engine.handle_frame(&bad);
        engine.handle_frame(b"short");
        std::thread::sleep(Duration::from_millis(40));

        let stats = engine.stats();
        assert_eq!(stats.frames_malformed, 2);
        assert_eq!(stats.frames_received, 0);
        assert_eq!(stats.peer_state, PeerState::Disconnected);
        engine.stop();
    }

    #[test]
    fn sender_emits_role_appropriate_frames() {
        let sink = Arc::new(CaptureSink::default());
        let command = Arc::new(SharedCommand::new(Mode::Recording));
        let mut engine = HeartbeatEngine::start(
            fast_config(Role::Commander),
            sink.clone(),
            command,
            Arc::new(NullObserver),
        );

        std::thread::sleep(Duration::from_millis(60));
        engine.stop();

        let frames = sink.frames.lock();
        assert!(frames.len() >= 3, "expected several heartbeats, got {}", frames.len());
        for buf in frames.iter() {
            let frame = protocol::decode(buf).expect("sender emits valid frames");
            assert_eq!(frame.kind, crate::protocol::FrameKind::Command);
            assert_eq!(frame.mode, Mode::Recording);
        }
        assert!(engine.stats().frames_sent >= 3);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut engine = HeartbeatEngine::start(
            fast_config(Role::Commander),
            Arc::new(CaptureSink::default()),
            Arc::new(SharedCommand::new(Mode::Standby)),
            Arc::new(NullObserver),
        );
        engine.stop();
        engine.stop();
    }
}
