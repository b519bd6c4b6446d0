// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Seams between the engine and its external collaborators.
//!
//! LED drivers, button polling, and shell-invoked recorder control all live
//! outside this crate; they plug in through these traits. The engine only
//! ever calls them from its tick and sender threads, so implementations must
//! be `Send + Sync` and should return quickly.

use std::io;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::protocol::Mode;

use super::state::PeerState;

/// Observer of peer-state transitions.
///
/// `on_state_changed` fires on every transition; `on_connection_lost` fires
/// exactly once per silence episode, on the first tick the liveness window is
/// exceeded after having been connected. Both default to no-ops so an
/// implementation can pick what it cares about.
pub trait StateObserver: Send + Sync {
    /// The engine's view of the peer changed.
    fn on_state_changed(&self, _new_state: PeerState) {}

    /// The peer fell silent past the liveness window.
    fn on_connection_lost(&self) {}
}

/// Observer that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullObserver;

impl StateObserver for NullObserver {}

/// Source of the mode to advertise in outgoing frames.
///
/// On the commanding side this is the locally desired mode (button state);
/// on the responding side it is the mode the recorder is actually in. The
/// engine pulls it once per heartbeat.
pub trait CommandSource: Send + Sync {
    /// Mode to put in the next outgoing frame.
    fn commanded_mode(&self) -> Mode;
}

/// Atomically settable [`CommandSource`], for wiring buttons, stdin, or
/// tests to the engine.
#[derive(Debug, Default)]
pub struct SharedCommand {
    mode: AtomicU8,
}

impl SharedCommand {
    /// Start in the given mode.
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self {
            mode: AtomicU8::new(mode.to_wire()),
        }
    }

    /// Replace the advertised mode.
    pub fn set(&self, mode: Mode) {
        self.mode.store(mode.to_wire(), Ordering::Release);
    }

    /// Current advertised mode.
    #[must_use]
    pub fn get(&self) -> Mode {
        // Only wire values are ever stored, so this cannot miss.
        Mode::from_wire(self.mode.load(Ordering::Acquire)).unwrap_or(Mode::Standby)
    }
}

impl CommandSource for SharedCommand {
    fn commanded_mode(&self) -> Mode {
        self.get()
    }
}

/// Control over the external recording process.
///
/// Implemented outside the core (typically by shelling out to start/stop
/// scripts); mapped onto peer-state transitions by the host-side binary, and
/// onto `on_connection_lost` for a process-level reset.
pub trait ProcessSupervisor: Send + Sync {
    /// Start the recording process.
    fn start(&self) -> io::Result<()>;

    /// Stop the recording process.
    fn stop(&self) -> io::Result<()>;

    /// Restart after a lost connection.
    fn restart(&self) -> io::Result<()>;
}
