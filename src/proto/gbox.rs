//! gbox datagram commands and the PMT relay envelope.
//!
//! Inbound layouts (tag = byte 0):
//!
//! ```text
//! 0x89 control words   [tag][8 bytes CW even][8 bytes CW odd]      = 17 bytes
//! 0x8A need PID        [tag][count N][N x PID, u16 big-endian]     = 2 + 2N bytes
//! ```
//!
//! Outbound, the bridge re-envelopes a CAPMT table for the gbox peer by
//! rewriting the first two bytes to the table tag + PMT kind and leaving
//! the rest of the buffer untouched.

use super::DecodeError;

/// Tag of a control-word pair datagram.
pub const TAG_CONTROL_WORDS: u8 = 0x89;
/// Tag of a need-PID datagram.
pub const TAG_NEED_PID: u8 = 0x8A;
/// Tag of a relayed table sent to the gbox peer.
pub const TAG_TABLE: u8 = 0x87;
/// Table-kind byte identifying a PMT inside a [`TAG_TABLE`] envelope.
pub const TABLE_KIND_PMT: u8 = 0x02;

/// Length of a single control word.
pub const CONTROL_WORD_LEN: usize = 8;
/// Total length of a well-formed control-word datagram.
pub const CONTROL_WORDS_FRAME_LEN: usize = 1 + 2 * CONTROL_WORD_LEN;

/// An even/odd control word pair, copied out of a `0x89` datagram.
///
/// Ownership is transient: the receiving side forwards or logs the pair
/// and does not retain it beyond the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlWordPair {
    /// Even control word (bytes 1..9 of the datagram).
    pub even: [u8; CONTROL_WORD_LEN],
    /// Odd control word (bytes 9..17 of the datagram).
    pub odd: [u8; CONTROL_WORD_LEN],
}

/// A decoded gbox command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GboxCommand {
    /// Deliver a control word pair to the oscam side.
    ControlWords(ControlWordPair),
    /// Request demux filters for each PID, in received order.
    ///
    /// Duplicates pass through; the protocol enforces no uniqueness.
    NeedPids(Vec<u16>),
}

/// Decodes one gbox datagram.
///
/// Length checks are all-or-nothing: a mismatch drops the whole message,
/// never a partial parse.
///
/// # Errors
///
/// Returns a [`DecodeError`] for short or length-inconsistent payloads
/// and for tags the bridge has no handler for.
pub fn decode_command(payload: &[u8]) -> Result<GboxCommand, DecodeError> {
    if payload.len() < 2 {
        return Err(DecodeError::TooShort {
            need: 2,
            have: payload.len(),
        });
    }

    match payload[0] {
        TAG_CONTROL_WORDS => {
            if payload.len() != CONTROL_WORDS_FRAME_LEN {
                return Err(DecodeError::BadLength {
                    tag: TAG_CONTROL_WORDS,
                    len: payload.len(),
                });
            }
            let mut even = [0u8; CONTROL_WORD_LEN];
            let mut odd = [0u8; CONTROL_WORD_LEN];
            even.copy_from_slice(&payload[1..1 + CONTROL_WORD_LEN]);
            odd.copy_from_slice(&payload[1 + CONTROL_WORD_LEN..CONTROL_WORDS_FRAME_LEN]);
            Ok(GboxCommand::ControlWords(ControlWordPair { even, odd }))
        }
        TAG_NEED_PID => {
            let count = payload[1] as usize;
            if payload.len() != 2 + 2 * count {
                return Err(DecodeError::BadLength {
                    tag: TAG_NEED_PID,
                    len: payload.len(),
                });
            }
            let pids = payload[2..]
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            Ok(GboxCommand::NeedPids(pids))
        }
        other => Err(DecodeError::UnknownTag(other)),
    }
}

/// Builds the relay envelope for a PMT table.
///
/// Copies the table and rewrites byte 0 to [`TAG_TABLE`] and byte 1 to
/// [`TABLE_KIND_PMT`]; length and bytes `[2..]` are preserved.
///
/// # Errors
///
/// Returns [`DecodeError::TooShort`] for tables under 2 bytes, which have
/// no header to rewrite.
pub fn relay_frame(table: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if table.len() < 2 {
        return Err(DecodeError::TooShort {
            need: 2,
            have: table.len(),
        });
    }
    let mut frame = table.to_vec();
    frame[0] = TAG_TABLE;
    frame[1] = TABLE_KIND_PMT;
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cw_datagram() -> Vec<u8> {
        let mut payload = vec![TAG_CONTROL_WORDS];
        payload.extend(0x10..0x18); // even
        payload.extend(0x20..0x28); // odd
        payload
    }

    #[test]
    fn decode_control_words() {
        let decoded = decode_command(&cw_datagram()).unwrap();
        let GboxCommand::ControlWords(pair) = decoded else {
            panic!("expected control words");
        };
        assert_eq!(pair.even, [0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17]);
        assert_eq!(pair.odd, [0x20, 0x21, 0x22, 0x23, 0x24, 0x25, 0x26, 0x27]);
    }

    #[test]
    fn decode_control_words_wrong_length() {
        let mut short = cw_datagram();
        short.pop();
        assert_eq!(
            decode_command(&short),
            Err(DecodeError::BadLength {
                tag: TAG_CONTROL_WORDS,
                len: 16
            })
        );

        let mut long = cw_datagram();
        long.push(0x00);
        assert_eq!(
            decode_command(&long),
            Err(DecodeError::BadLength {
                tag: TAG_CONTROL_WORDS,
                len: 18
            })
        );
    }

    #[test]
    fn decode_need_pids_in_order() {
        let payload = [TAG_NEED_PID, 0x03, 0x00, 0x10, 0x00, 0x20, 0x44, 0x18];
        let decoded = decode_command(&payload).unwrap();
        assert_eq!(
            decoded,
            GboxCommand::NeedPids(vec![0x0010, 0x0020, 0x4418])
        );
    }

    #[test]
    fn decode_need_pids_count_mismatch() {
        // Count says two PIDs, payload carries one.
        let payload = [TAG_NEED_PID, 0x02, 0x00, 0x10];
        assert_eq!(
            decode_command(&payload),
            Err(DecodeError::BadLength {
                tag: TAG_NEED_PID,
                len: 4
            })
        );
    }

    #[test]
    fn decode_need_pids_zero_count() {
        let decoded = decode_command(&[TAG_NEED_PID, 0x00]).unwrap();
        assert_eq!(decoded, GboxCommand::NeedPids(Vec::new()));
    }

    #[test]
    fn decode_too_short() {
        assert_eq!(
            decode_command(&[TAG_CONTROL_WORDS]),
            Err(DecodeError::TooShort { need: 2, have: 1 })
        );
        assert_eq!(
            decode_command(&[]),
            Err(DecodeError::TooShort { need: 2, have: 0 })
        );
    }

    #[test]
    fn decode_unknown_tag() {
        assert_eq!(
            decode_command(&[0x42, 0x00]),
            Err(DecodeError::UnknownTag(0x42))
        );
    }

    #[test]
    fn relay_frame_rewrites_header_only() {
        let table: Vec<u8> = (0u8..32).collect();
        let frame = relay_frame(&table).unwrap();
        assert_eq!(frame.len(), table.len());
        assert_eq!(frame[0], TAG_TABLE);
        assert_eq!(frame[1], TABLE_KIND_PMT);
        assert_eq!(&frame[2..], &table[2..]);
    }

    #[test]
    fn relay_frame_minimum_length() {
        assert_eq!(
            relay_frame(&[0x9F, 0x80]).unwrap(),
            vec![TAG_TABLE, TABLE_KIND_PMT]
        );
        assert_eq!(
            relay_frame(&[0x9F]),
            Err(DecodeError::TooShort { need: 2, have: 1 })
        );
    }
}
