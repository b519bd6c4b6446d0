// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The peer-state transition function, pure and I/O-free.
//!
//! Evaluated on every liveness tick. Keeping it a standalone function means
//! the timeout and reconnect semantics are testable at exact microsecond
//! boundaries without sockets or threads.

use std::fmt;

use crate::protocol::Mode;

/// One side's view of the other's operating mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PeerState {
    /// No valid frame inside the liveness window.
    #[default]
    Disconnected,
    /// Peer is alive and idle.
    Standby,
    /// Peer is alive and recording.
    Recording,
}

impl PeerState {
    /// Whether this state counts as "connected" for connection-loss
    /// reporting.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !matches!(self, PeerState::Disconnected)
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::Disconnected => write!(f, "disconnected"),
            PeerState::Standby => write!(f, "standby"),
            PeerState::Recording => write!(f, "recording"),
        }
    }
}

/// Compute the state for the next tick.
///
/// - `elapsed_us`: silence since the last validly decoded frame
/// - `window_us`: the liveness window
/// - `last_mode`: mode of the most recent valid frame, if any was ever
///   received
/// - `fresh`: whether a valid frame arrived since the previous tick
///
/// Rules, in order:
///
/// 1. Silence beyond the window wins over everything: `Disconnected`.
/// 2. Out of `Disconnected` the first live tick lands on `Standby`, never
///    directly on `Recording`, even if the frame that revived the link
///    carried recording mode. The mode is adopted one tick later. This
///    settle step is deliberate: it gives observers a visible
///    connected-but-idle edge on every reconnect.
/// 3. Otherwise adopt the most recent frame's mode, but only when fresh
///    input arrived; a stale mode is not re-applied.
#[must_use]
pub fn next_state(
    current: PeerState,
    elapsed_us: u64,
    window_us: u64,
    last_mode: Option<Mode>,
    fresh: bool,
) -> PeerState {
    if elapsed_us > window_us {
        return PeerState::Disconnected;
    }
    if current == PeerState::Disconnected {
        return if last_mode.is_some() {
            PeerState::Standby
        } else {
            // Inside the window but nothing ever received: the seeded
            // baseline at engine start, before the first frame.
            PeerState::Disconnected
        };
    }
    if fresh {
        match last_mode {
            Some(Mode::Recording) => PeerState::Recording,
            Some(Mode::Standby) => PeerState::Standby,
            None => current,
        }
    } else {
        current
    }
}

// ============================================================================
// Tests
// ============================================================================
