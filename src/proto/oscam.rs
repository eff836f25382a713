//! oscam stream commands.
//!
//! Commands arrive on the accepted TCP connection, one parse per read;
//! the head is the first two bytes, big-endian. Only CAPMT is handled:
//!
//! ```text
//! 0x9F80 CAPMT   [head u16][...][adapter id at byte 13][...]
//! ```
//!
//! The table payload itself is opaque to the bridge; it is forwarded to
//! the gbox side unmodified.

use super::demux::AdapterId;
use super::DecodeError;

/// Head of a CAPMT (program map table) message.
pub const HEAD_CAPMT: u16 = 0x9F80;
/// Byte offset of the demux adapter id inside a CAPMT message.
pub const ADAPTER_ID_OFFSET: usize = 13;
/// Shortest CAPMT the bridge will accept (must reach the adapter id).
pub const CAPMT_MIN_LEN: usize = ADAPTER_ID_OFFSET + 1;

/// A decoded oscam command.
///
/// The caller keeps the raw buffer; CAPMT forwards it wholesale, so the
/// decoded form only carries what the bridge extracts from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscamCommand {
    /// Program map table; the adapter id is captured as bridge state.
    Capmt {
        /// Demux adapter the table targets.
        adapter: AdapterId,
    },
}

/// Decodes the head of one oscam stream message.
///
/// # Errors
///
/// Returns a [`DecodeError`] for reads too short to carry a head, heads
/// the bridge has no handler for, and CAPMT messages truncated before the
/// adapter id.
pub fn decode_command(payload: &[u8]) -> Result<OscamCommand, DecodeError> {
    if payload.len() < 2 {
        return Err(DecodeError::TooShort {
            need: 2,
            have: payload.len(),
        });
    }

    let head = u16::from_be_bytes([payload[0], payload[1]]);
    if head != HEAD_CAPMT {
        return Err(DecodeError::UnknownHead(head));
    }

    if payload.len() < CAPMT_MIN_LEN {
        return Err(DecodeError::TooShort {
            need: CAPMT_MIN_LEN,
            have: payload.len(),
        });
    }

    Ok(OscamCommand::Capmt {
        adapter: AdapterId::new(payload[ADAPTER_ID_OFFSET]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capmt(adapter: u8) -> Vec<u8> {
        let mut payload = vec![0x9F, 0x80];
        payload.resize(ADAPTER_ID_OFFSET, 0x00);
        payload.push(adapter);
        payload.extend([0xDE, 0xAD]);
        payload
    }

    #[test]
    fn decode_capmt_captures_adapter() {
        let decoded = decode_command(&capmt(0x41)).unwrap();
        assert_eq!(
            decoded,
            OscamCommand::Capmt {
                adapter: AdapterId::new(0x41)
            }
        );
    }

    #[test]
    fn decode_capmt_truncated() {
        let payload = &capmt(0x41)[..CAPMT_MIN_LEN - 1];
        assert_eq!(
            decode_command(payload),
            Err(DecodeError::TooShort {
                need: CAPMT_MIN_LEN,
                have: CAPMT_MIN_LEN - 1
            })
        );
    }

    #[test]
    fn decode_unknown_head() {
        assert_eq!(
            decode_command(&[0x12, 0x34, 0x56]),
            Err(DecodeError::UnknownHead(0x1234))
        );
    }

    #[test]
    fn decode_short_read() {
        assert_eq!(
            decode_command(&[0x9F]),
            Err(DecodeError::TooShort { need: 2, have: 1 })
        );
    }
}
