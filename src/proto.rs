//! Wire formats shared by the two control channels.
//!
//! Every message is a fixed-layout binary envelope identified by its first
//! byte(s); multi-byte integers are big-endian as the peers put them on
//! the wire. There is no framing beyond the envelope itself: the UDP side
//! is one message per datagram, the TCP side one parse per stream read.
//!
//! | First byte(s) | Direction      | Meaning                         |
//! |---------------|----------------|---------------------------------|
//! | `0x89`        | gbox → bridge  | control word pair               |
//! | `0x8A`        | gbox → bridge  | need-PID (filter requests)      |
//! | `0x87 0x02`   | bridge → gbox  | relayed PMT table               |
//! | `0x9F 0x80`   | oscam → bridge | CAPMT (program map table)       |
//!
//! The demux filter request layout the bridge sends back to the oscam
//! peer lives in [`demux`].

use std::fmt;

use thiserror::Error;

pub mod demux;
pub mod gbox;
pub mod oscam;

/// Errors raised while decoding an inbound message.
///
/// All of these are drop-with-diagnostic conditions: the offending
/// message is discarded and the channel carries on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Message shorter than its fixed layout requires.
    #[error("message too short: need {need} bytes, have {have}")]
    TooShort { need: usize, have: usize },
    /// Message length inconsistent with its tag's layout.
    #[error("invalid length {len} for tag 0x{tag:02X}")]
    BadLength { tag: u8, len: usize },
    /// A gbox tag the bridge has no handler for.
    #[error("unhandled gbox tag 0x{0:02X}")]
    UnknownTag(u8),
    /// An oscam command head the bridge has no handler for.
    #[error("unknown oscam command head 0x{0:04X}")]
    UnknownHead(u16),
}

/// Hex-dump `Display` adapter for raw message payloads.
///
/// Renders bytes as uppercase pairs separated by spaces, the way the
/// peers' own diagnostics format them.
pub struct Hex<'a>(pub &'a [u8]);

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_formats_uppercase_pairs() {
        assert_eq!(format!("{}", Hex(&[0x89, 0x0A, 0xFF])), "89 0A FF");
        assert_eq!(format!("{}", Hex(&[])), "");
    }
}
