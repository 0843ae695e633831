//! Frame codec for the teaching-mode sub-protocol.
//!
//! ```text
//! offset 0    magic              4 bytes  17 FE FD 00
//! offset 4    sequence           2 bytes  little-endian
//! offset 6    command_id         1 byte
//! offset 7    payload_length(N)  2 bytes  little-endian
//! offset 9    payload            N bytes
//! offset 9+N  checksum           4 bytes  little-endian CRC-32 (IEEE) of bytes[0, 9+N)
//! ```
//!
//! A checksum mismatch does not fail [`decode`]; it is reported on the
//! returned [`Frame`] so the caller can decide whether to trust it.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

pub const MAGIC: [u8; 4] = [0x17, 0xFE, 0xFD, 0x00];
/// Magic, sequence, command id and length.
pub const HEADER_LEN: usize = 9;
pub const CHECKSUM_LEN: usize = 4;
/// Smallest possible frame: header and checksum around an empty payload.
pub const MIN_FRAME_LEN: usize = HEADER_LEN + CHECKSUM_LEN;

/// A datagram that cannot be parsed as a frame at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("truncated frame: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("bad magic {found:02X?}")]
    BadMagic { found: [u8; 4] },

    #[error("payload of {0} bytes does not fit the 16-bit length field")]
    PayloadTooLarge(usize),
}

/// A parsed frame, including both checksums so integrity can be judged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence: u16,
    pub command_id: u8,
    pub payload: Bytes,
    pub received_checksum: u32,
    pub computed_checksum: u32,
}

impl Frame {
    pub fn checksum_ok(&self) -> bool {
        self.received_checksum == self.computed_checksum
    }

    /// `Some` when the trailing checksum does not match the frame contents.
    pub fn integrity_warning(&self) -> Option<IntegrityWarning> {
        (!self.checksum_ok()).then(|| IntegrityWarning {
            sequence: self.sequence,
            command_id: self.command_id,
            received: self.received_checksum,
            computed: self.computed_checksum,
        })
    }

    /// Encoded length of this frame.
    pub fn wire_len(&self) -> usize {
        MIN_FRAME_LEN + self.payload.len()
    }
}

/// Non-fatal checksum mismatch on an otherwise well-formed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegrityWarning {
    pub sequence: u16,
    pub command_id: u8,
    pub received: u32,
    pub computed: u32,
}

impl fmt::Display for IntegrityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checksum mismatch on seq {} cmd 0x{:02X}: received {:08X}, computed {:08X}",
            self.sequence, self.command_id, self.received, self.computed
        )
    }
}

/// IEEE 802.3 CRC-32.
pub fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Encode one frame.
pub fn encode(sequence: u16, command_id: u8, payload: &[u8]) -> Result<Bytes, FramingError> {
    let len = u16::try_from(payload.len()).map_err(|_| FramingError::PayloadTooLarge(payload.len()))?;
    Ok(encode_with_len(sequence, command_id, len, payload))
}

/// Encode a frame whose payload is already known to fit the length field.
pub(crate) fn encode_small(sequence: u16, command_id: u8, payload: &[u8]) -> Bytes {
    debug_assert!(payload.len() <= u16::MAX as usize);
    encode_with_len(sequence, command_id, payload.len() as u16, payload)
}

fn encode_with_len(sequence: u16, command_id: u8, len: u16, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(MIN_FRAME_LEN + payload.len());
    buf.put_slice(&MAGIC);
    buf.put_u16_le(sequence);
    buf.put_u8(command_id);
    buf.put_u16_le(len);
    buf.put_slice(payload);
    let crc = checksum(&buf);
    buf.put_u32_le(crc);
    buf.freeze()
}

/// Decode one frame from the start of `bytes`. Trailing bytes are ignored.
pub fn decode(bytes: &[u8]) -> Result<Frame, FramingError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(FramingError::Truncated {
            needed: MIN_FRAME_LEN,
            got: bytes.len(),
        });
    }

    let mut found = [0u8; 4];
    found.copy_from_slice(&bytes[..4]);
    if found != MAGIC {
        return Err(FramingError::BadMagic { found });
    }

    let mut header = &bytes[4..HEADER_LEN];
    let sequence = header.get_u16_le();
    let command_id = header.get_u8();
    let payload_len = header.get_u16_le() as usize;

    let body_end = HEADER_LEN + payload_len;
    let total = body_end + CHECKSUM_LEN;
    if bytes.len() < total {
        return Err(FramingError::Truncated {
            needed: total,
            got: bytes.len(),
        });
    }

    let mut trailer = &bytes[body_end..total];
    let received_checksum = trailer.get_u32_le();

    Ok(Frame {
        sequence,
        command_id,
        payload: Bytes::copy_from_slice(&bytes[HEADER_LEN..body_end]),
        received_checksum,
        computed_checksum: checksum(&bytes[..body_end]),
    })
}
