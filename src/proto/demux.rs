//! Demux control layouts sent back to the oscam peer.
//!
//! The opcodes are the receiver's CA/DMX ioctl request numbers and must
//! be reproduced byte-exact for interoperability.

use std::fmt;

/// Demux/CA ioctl opcodes, as placed on the wire (big-endian).
pub mod opcode {
    /// Load a descrambler control word.
    pub const CA_SET_DESCR: u32 = 0x4010_6F86;
    /// Associate a PID with a descrambler slot.
    pub const CA_SET_PID: u32 = 0x4008_6F87;
    /// Start a section filter.
    pub const DMX_SET_FILTER: u32 = 0x403C_6F2B;
    /// Stop a running filter.
    pub const DMX_STOP: u32 = 0x0000_6F2A;
}

/// Identifier of a demux adapter, captured from inbound CAPMT tables.
///
/// Latest value wins; the bridge keeps no history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdapterId(u8);

impl AdapterId {
    /// Creates an adapter id from its wire byte.
    #[must_use]
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    /// Raw byte for wire serialization.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl From<u8> for AdapterId {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

impl fmt::Display for AdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}", self.0)
    }
}

/// Encoded length of a filter request.
pub const FILTER_REQUEST_LEN: usize = 9;

/// A "set filter for PID" request aimed at a demux adapter.
///
/// ```text
/// ┌────────────┬──────────────────────────┬──────────┬──────────────┐
/// │ adapter(1) │ DMX_SET_FILTER, be32 (4) │ zero (2) │ PID, be16 (2)│
/// └────────────┴──────────────────────────┴──────────┴──────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterRequest {
    /// Adapter the filter targets (most recently captured id).
    pub adapter: AdapterId,
    /// PID to filter for.
    pub pid: u16,
}

impl FilterRequest {
    /// Encodes the request into its fixed 9-byte wire layout.
    #[must_use]
    pub fn encode(&self) -> [u8; FILTER_REQUEST_LEN] {
        let mut frame = [0u8; FILTER_REQUEST_LEN];
        frame[0] = self.adapter.as_u8();
        frame[1..5].copy_from_slice(&opcode::DMX_SET_FILTER.to_be_bytes());
        // frame[5..7] stays reserved/zero
        frame[7..9].copy_from_slice(&self.pid.to_be_bytes());
        frame
    }
}
