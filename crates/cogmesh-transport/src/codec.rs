//! Message envelope codec
//!
//! Fixed-order layout, all integers big-endian so agents written in any
//! language interoperate:
//!
//! ```text
//! +------+-----------+---------+-----------+--------+-----------------+
//! | kind | source_id | dest_id | timestamp | length | payload[length] |
//! |  u8  |    u32    |   u32   |    u32    |  u32   |      bytes      |
//! +------+-----------+---------+-----------+--------+-----------------+
//! ```
//!
//! One datagram carries exactly one message, so the declared length must
//! match the remaining bytes exactly.

use bytes::{BufMut, Bytes, BytesMut};

use cogmesh_core::{AgentId, CognitiveMessage, MAX_PAYLOAD_SIZE, MalformedMessage, MessageKind};

use crate::wire::WireReader;

/// Size of the fixed header in bytes
pub const HEADER_LEN: usize = 1 + 4 + 4 + 4 + 4;

/// Encode a message into its wire form
pub fn encode(msg: &CognitiveMessage) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + msg.payload().len());
    buf.put_u8(msg.kind().code());
    buf.put_u32(msg.source().as_u32());
    buf.put_u32(msg.dest().as_u32());
    buf.put_u32(msg.timestamp());
    buf.put_u32(msg.payload_len());
    buf.put_slice(msg.payload());
    buf.freeze()
}

/// Decode a message from its wire form
///
/// # Errors
///
/// - [`MalformedMessage::TooShort`] if the buffer is shorter than the header
/// - [`MalformedMessage::UnknownKind`] if the kind code is not known
/// - [`MalformedMessage::TooLarge`] if the declared length exceeds the limit
/// - [`MalformedMessage::LengthMismatch`] if the declared length differs from
///   the bytes that follow the header
pub fn decode(data: &[u8]) -> Result<CognitiveMessage, MalformedMessage> {
    if data.len() < HEADER_LEN {
        return Err(MalformedMessage::TooShort {
            needed: HEADER_LEN,
            available: data.len(),
        });
    }

    let mut reader = WireReader::new(data);
    let kind = MessageKind::try_from(reader.u8("kind")?)?;
    let source = AgentId::new(reader.u32("source_id")?);
    let dest = AgentId::new(reader.u32("dest_id")?);
    let timestamp = reader.u32("timestamp")?;
    let declared = reader.u32("length")? as usize;

    if declared > MAX_PAYLOAD_SIZE {
        return Err(MalformedMessage::TooLarge {
            size: declared,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let payload = reader.rest();
    if payload.len() != declared {
        return Err(MalformedMessage::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }

    CognitiveMessage::new(
        kind,
        source,
        dest,
        timestamp,
        Bytes::copy_from_slice(payload),
    )
}
