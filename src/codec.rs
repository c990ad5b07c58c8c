//! Frame layout shared by both ends of a connection:
//!
//! ```text
//! [length: i32, big-endian][length bytes: MessagePack-encoded Packet]
//! ```
//!
//! The streaming transport in `framed_connection` writes exactly these bytes;
//! `encode` and `decode` work on whole frames held in memory.

use crate::{Packet, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::LengthDelimitedCodec;

pub const LENGTH_FIELD_LENGTH: usize = 4;
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// Length value reserved to mean "no frame". Never written by a sender.
pub const NO_DATA: i32 = -1;

/// Length-delimited framing used on every connection.
pub fn length_delimited() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(LENGTH_FIELD_LENGTH)
        .big_endian()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

pub fn encode(packet: &Packet) -> Result<Bytes> {
    let payload = rmp_serde::to_vec(packet)?;
    if payload.len() > MAX_FRAME_LENGTH {
        Err(format!(
            "{} packet of {} bytes exceeds the frame limit",
            packet.kind(),
            payload.len()
        ))?;
    }

    let mut frame = BytesMut::with_capacity(LENGTH_FIELD_LENGTH + payload.len());
    frame.put_i32(payload.len() as i32);
    frame.put_slice(&payload);
    Ok(frame.freeze())
}

/// Parse one complete frame. `Ok(None)` means the frame carried the
/// `NO_DATA` sentinel.
pub fn decode(mut frame: &[u8]) -> Result<Option<Packet>> {
    if frame.len() < LENGTH_FIELD_LENGTH {
        Err(format!("frame of {} bytes has no length prefix", frame.len()))?;
    }

    let length = frame.get_i32();
    if length == NO_DATA {
        return Ok(None);
    }
    if length < 0 || length as usize > MAX_FRAME_LENGTH {
        Err(format!("invalid frame length {}", length))?;
    }
    if frame.len() != length as usize {
        Err(format!(
            "frame declares {} payload bytes but holds {}",
            length,
            frame.len()
        ))?;
    }

    Ok(Some(rmp_serde::from_read_ref(frame)?))
}
