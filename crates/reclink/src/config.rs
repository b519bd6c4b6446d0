// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Link-wide constants and runtime configuration.
//!
//! This module is the single source of truth for ports, cadences and
//! timeouts. **Never hardcode these elsewhere.**
//!
//! # Port convention
//!
//! Two fixed UDP ports are used, one per direction of initiation. Each role
//! binds its own port and sends to the other one, so the local/remote pair is
//! swapped between the two peers:
//!
//! ```text
//! remote (field device)   binds PORT_REMOTE, sends to <host-ip>:PORT_HOST
//! host  (recording box)   binds PORT_HOST,   sends to <remote-ip>:PORT_REMOTE
//! ```

use std::time::Duration;

use crate::engine::Role;

/// Port the remote (field device) side binds for inbound heartbeats.
pub const PORT_REMOTE: u16 = 5800;

/// Port the host (recording) side binds for inbound heartbeats.
pub const PORT_HOST: u16 = 5801;

/// Heartbeat cadence for both the outbound sender and the liveness tick.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_millis(100);

/// Silence threshold after which a peer is declared disconnected.
pub const LIVENESS_WINDOW: Duration = Duration::from_secs(1);

/// [`LIVENESS_WINDOW`] expressed in microseconds, the unit the state machine
/// works in.
pub const LIVENESS_WINDOW_US: u64 = 1_000_000;

/// Maximum datagram/read size handed to server tasks.
pub const READ_SIZE: usize = 256;

/// Receive buffer size requested on datagram sockets. Failure to apply it is
/// non-fatal.
pub const RECV_BUFFER_SIZE: usize = 4096;

/// Bound on the readiness wait in the stream server accept loop; the stop
/// flag is re-checked at this interval.
pub const ACCEPT_TIMEOUT: Duration = Duration::from_millis(500);

/// Socket receive timeout used by datagram server loops so the stop flag is
/// observed even when no traffic arrives.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Bound on the best-effort socket drain performed before close.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Runtime configuration for a [`crate::engine::HeartbeatEngine`].
///
/// Defaults match the wire constants above; tests shrink the cadence and
/// window to keep wall-clock time down.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Whether this side emits command frames or status frames.
    pub role: Role,
    /// Cadence of both the outbound sender and the liveness tick.
    pub heartbeat_period: Duration,
    /// Silence threshold for the DISCONNECTED transition.
    pub liveness_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            role: Role::Commander,
            heartbeat_period: HEARTBEAT_PERIOD,
            liveness_window: LIVENESS_WINDOW,
        }
    }
}

impl EngineConfig {
    /// Config for the commanding (field device) side.
    #[must_use]
    pub fn commander() -> Self {
        Self::default()
    }

    /// Config for the responding (recording host) side.
    #[must_use]
    pub fn responder() -> Self {
        Self {
            role: Role::Responder,
            ..Self::default()
        }
    }

    /// Liveness window in microseconds.
    #[must_use]
    pub fn liveness_window_us(&self) -> u64 {
        self.liveness_window.as_micros() as u64
    }
}
