// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # reclink
//!
//! Heartbeat-synchronized control link between a field device (the "remote")
//! and a monitoring host (the "host"). Each side sends a small fixed-layout
//! frame at a steady cadence over an unreliable datagram or stream link; each
//! side derives a tri-state view of the other (DISCONNECTED / STANDBY /
//! RECORDING) from the frames it receives and the silence in between.
//!
//! # Architecture
//!
//! ```text
//! +-----------+   bytes    +-----------+   frames   +-----------------+
//! | transport | ---------> | protocol  | ---------> | heartbeat engine |
//! | (4 kinds) |  callback  | (codec)   |   decode   | (peer state)     |
//! +-----------+            +-----------+            +--------+--------+
//!       ^                                                    |
//!       |               encoded heartbeat frames             |
//!       +----------------------------------------------------+
//! ```
//!
//! - [`net`] - wall clock, readiness polling, socket drain, socket timeouts
//! - [`protocol`] - the 15-byte magic-delimited heartbeat frame
//! - [`transport`] - blocking stream/datagram clients and servers, each
//!   server with one background loop thread and an injected [`transport::DatagramTask`]
//!   or [`transport::StreamTask`]
//! - [`engine`] - the timeout-driven peer-state machine plus the periodic
//!   outbound sender
//!
//! Delivery is best effort: no acknowledgment, no retransmission, at most one
//! active peer per server. Prolonged silence surfaces as the `Disconnected`
//! state, never as an error.

pub mod config;
pub mod engine;
pub mod net;
pub mod protocol;
pub mod transport;

pub use engine::{
    CommandSource, EngineConfig, EngineStats, HeartbeatEngine, PeerState, ProcessSupervisor, Role,
    StateObserver,
};
pub use protocol::{DecodeError, Frame, FrameKind, Mode};
pub use transport::{DatagramTask, FrameSink, StreamTask, TcpClient, TcpServer, UdpClient, UdpServer};
