// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The magic-delimited heartbeat frame exchanged between the two peers.
//!
//! # Wire format
//!
//! Fixed 15-byte layout, magic bytes at both ends:
//!
//! ```text
//! offset  size  field
//!      0     1  magic header 1 (0xAA)
//!      1     1  magic header 2 (0xF7)
//!      2     8  timestamp_us, u64 little-endian (sender's monotonic clock)
//!     10     1  is_command (0/1)
//!     11     1  is_status  (0/1)
//!     12     1  mode (0x00 = standby, 0x05 = recording)
//!     13     1  magic footer 1 (0x8B)
//!     14     1  magic footer 2 (0x4E)
//! ```
//!
//! The timestamp byte order is fixed to little-endian so the two peers do not
//! have to share an architecture. A frame is valid iff all four magic bytes
//! match and the mode byte is one of the two recognized values; anything else
//! is rejected by [`decode`] and must not touch peer state. The command and
//! status flags are *not* validated for mutual exclusion - the command flag
//! wins when both are set.

use std::fmt;

/// First magic header byte.
pub const MAGIC_H1: u8 = 0xAA;
/// Second magic header byte.
pub const MAGIC_H2: u8 = 0xF7;
/// First magic footer byte.
pub const MAGIC_F1: u8 = 0x8B;
/// Second magic footer byte.
pub const MAGIC_F2: u8 = 0x4E;

/// Wire value of [`Mode::Standby`].
pub const MODE_STANDBY: u8 = 0x00;
/// Wire value of [`Mode::Recording`].
pub const MODE_RECORDING: u8 = 0x05;

/// Encoded size of a heartbeat frame.
pub const FRAME_LEN: usize = 15;

/// Operating mode carried in a heartbeat frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    /// Idle, not recording.
    #[default]
    Standby,
    /// Actively recording.
    Recording,
}

impl Mode {
    /// Parse the wire byte; `None` for anything but the two recognized
    /// values.
    #[must_use]
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            MODE_STANDBY => Some(Mode::Standby),
            MODE_RECORDING => Some(Mode::Recording),
            _ => None,
        }
    }

    /// Wire byte for this mode.
    #[must_use]
    pub fn to_wire(self) -> u8 {
        match self {
            Mode::Standby => MODE_STANDBY,
            Mode::Recording => MODE_RECORDING,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Standby => write!(f, "standby"),
            Mode::Recording => write!(f, "recording"),
        }
    }
}

/// Whether a frame carries a command (controller -> recorder) or a status
/// report (recorder -> controller).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// The sender wants the receiver to adopt `mode`.
    Command,
    /// The sender reports that it is currently in `mode`.
    Status,
}

/// A decoded heartbeat frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Sender's monotonic clock at encode time, microseconds.
    pub timestamp_us: u64,
    /// Command or status.
    pub kind: FrameKind,
    /// Commanded or reported mode.
    pub mode: Mode,
}

impl Frame {
    /// Build a command frame.
    #[must_use]
    pub fn command(mode: Mode, timestamp_us: u64) -> Self {
        Self {
            timestamp_us,
            kind: FrameKind::Command,
            mode,
        }
    }

    /// Build a status frame.
    #[must_use]
    pub fn status(mode: Mode, timestamp_us: u64) -> Self {
        Self {
            timestamp_us,
            kind: FrameKind::Status,
            mode,
        }
    }

    /// Encode into the fixed wire layout. Pure and deterministic.
    #[must_use]
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut buf = [0u8; FRAME_LEN];
        buf[0] = MAGIC_H1;
        buf[1] = MAGIC_H2;
        buf[2..10].copy_from_slice(&self.timestamp_us.to_le_bytes());
        match self.kind {
            FrameKind::Command => buf[10] = 1,
            FrameKind::Status => buf[11] = 1,
        }
        buf[12] = self.mode.to_wire();
        buf[13] = MAGIC_F1;
        buf[14] = MAGIC_F2;
        buf
    }
}

/// Why a buffer was rejected by [`decode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer than [`FRAME_LEN`] bytes.
    Truncated(usize),
    /// One of the four magic bytes did not match.
    BadMagic,
    /// The mode byte is neither standby nor recording.
    UnknownMode(u8),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated(len) => {
                write!(f, "frame truncated: {} bytes, need {}", len, FRAME_LEN)
            }
            DecodeError::BadMagic => write!(f, "magic byte mismatch"),
            DecodeError::UnknownMode(byte) => write!(f, "unknown mode byte 0x{:02x}", byte),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decode a heartbeat frame from `buf`.
///
/// Rejects short buffers, magic mismatches and unrecognized mode bytes; never
/// panics. Trailing bytes past [`FRAME_LEN`] are ignored, which lets callers
/// hand in their whole receive buffer.
pub fn decode(buf: &[u8]) -> Result<Frame, DecodeError> {
    if buf.len() < FRAME_LEN {
        return Err(DecodeError::Truncated(buf.len()));
    }
    if buf[0] != MAGIC_H1 || buf[1] != MAGIC_H2 || buf[13] != MAGIC_F1 || buf[14] != MAGIC_F2 {
        return Err(DecodeError::BadMagic);
    }

    let mut ts = [0u8; 8];
    ts.copy_from_slice(&buf[2..10]);
    let mode = Mode::from_wire(buf[12]).ok_or(DecodeError::UnknownMode(buf[12]))?;

    Ok(Frame {
        timestamp_us: u64::from_le_bytes(ts),
        kind: if buf[10] != 0 {
            FrameKind::Command
        } else {
            FrameKind::Status
        },
        mode,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_mode_kind_combinations() {
        for mode in [Mode::Standby, Mode::Recording] {
            for is_command in [true, false] {
                let frame = if is_command {
                    Frame::command(mode, 123_456_789)
                } else {
                    Frame::status(mode, 123_456_789)
                };
                let decoded = decode(&frame.encode()).expect("round trip must decode");
                assert_eq!(decoded, frame, "mode={:?} command={}", mode, is_command);
            }
        }
    }

    #[test]
    fn encode_places_magic_and_flags() {
        let buf = Frame::command(Mode::Recording, 0).encode();
        assert_eq!(buf[0], MAGIC_H1);
        assert_eq!(buf[1], MAGIC_H2);
        assert_eq!(buf[10], 1);
        assert_eq!(buf[11], 0);
        assert_eq!(buf[12], MODE_RECORDING);
        assert_eq!(buf[13], MAGIC_F1);
        assert_eq!(buf[14], MAGIC_F2);

        let buf = Frame::status(Mode::Standby, 0).encode();
        assert_eq!(buf[10], 0);
        assert_eq!(buf[11], 1);
        assert_eq!(buf[12], MODE_STANDBY);
    }

    #[test]
    fn timestamp_is_little_endian() {
        let buf = Frame::status(Mode::Standby, 0x0102_0304_0506_0708).encode();
        assert_eq!(
            &buf[2..10],
            &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn rejects_each_corrupted_magic_byte() {
        let good = Frame::command(Mode::Standby, 42).encode();
        for idx in [0usize, 1, 13, 14] {
            let mut bad = good;
            bad[idx] ^= 0xFF;
            assert_eq!(
                decode(&bad),
                Err(DecodeError::BadMagic),
                "corrupted magic at offset {}",
                idx
            );
        }
    }

    #[test]
    fn rejects_short_buffers() {
        let good = Frame::command(Mode::Standby, 42).encode();
        for len in 0..FRAME_LEN {
            assert_eq!(decode(&good[..len]), Err(DecodeError::Truncated(len)));
        }
    }

    #[test]
    fn rejects_unknown_mode() {
        let mut buf = Frame::command(Mode::Standby, 42).encode();
        buf[12] = 0x03;
        assert_eq!(decode(&buf), Err(DecodeError::UnknownMode(0x03)));
    }

    #[test]
    fn command_flag_wins_when_both_set() {
        let mut buf = Frame::status(Mode::Standby, 42).encode();
        buf[10] = 1; // both flags now set
        assert_eq!(decode(&buf).unwrap().kind, FrameKind::Command);
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut padded = [0u8; 64];
        padded[..FRAME_LEN].copy_from_slice(&Frame::status(Mode::Recording, 7).encode());
        let frame = decode(&padded).unwrap();
        assert_eq!(frame.mode, Mode::Recording);
        assert_eq!(frame.timestamp_us, 7);
    }
}
