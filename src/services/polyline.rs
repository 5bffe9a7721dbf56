// SPDX-License-Identifier: MIT

//! Decoder for Google's encoded polyline format (precision 5).
//!
//! The encoding stores signed lat/lng deltas as zig-zag varints in 5-bit
//! groups offset by 63, with 0x20 as the continuation bit. Decoding is
//! stateful: each point is the running sum of all preceding deltas.

use crate::models::Coordinate;

const SCALE: f64 = 1e5;
const CHAR_OFFSET: u8 = 63;
const CONTINUATION_BIT: u32 = 0x20;
const CHUNK_MASK: u32 = 0x1f;

/// Errors from polyline decoding.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Input ended in the middle of a varint (continuation bit set on the
    /// last chunk, or a lone latitude without its longitude).
    #[error("truncated polyline at byte {0}")]
    Truncated(usize),

    /// Byte outside the valid encoded range (63..=126).
    #[error("invalid polyline byte {byte:#04x} at offset {offset}")]
    InvalidByte { byte: u8, offset: usize },
}

/// Decode an encoded polyline into an ordered coordinate sequence.
///
/// An empty string decodes to an empty sequence. Malformed input fails with
/// a [`DecodeError`] rather than producing garbage points.
pub fn decode(encoded: &str) -> Result<Vec<Coordinate>, DecodeError> {
    let bytes = encoded.as_bytes();
    let mut coords = Vec::new();

    let mut pos = 0;
    let mut lat: i64 = 0;
    let mut lng: i64 = 0;

    while pos < bytes.len() {
        let (dlat, next) = decode_delta(bytes, pos)?;
        let (dlng, next) = decode_delta(bytes, next)?;

        lat += dlat;
        lng += dlng;

        coords.push(Coordinate {
            lat: lat as f64 / SCALE,
            lng: lng as f64 / SCALE,
        });
        pos = next;
    }

    Ok(coords)
}

/// Decode one zig-zag varint delta starting at `pos`, returning the value and
/// the offset of the next unread byte.
fn decode_delta(bytes: &[u8], mut pos: usize) -> Result<(i64, usize), DecodeError> {
    let mut accum: u64 = 0;
    let mut shift: u32 = 0;

    loop {
        let byte = *bytes.get(pos).ok_or(DecodeError::Truncated(pos))?;
        if !(CHAR_OFFSET..=126).contains(&byte) {
            return Err(DecodeError::InvalidByte { byte, offset: pos });
        }

        let chunk = u32::from(byte - CHAR_OFFSET);
        accum |= u64::from(chunk & CHUNK_MASK) << shift;
        pos += 1;

        if chunk & CONTINUATION_BIT == 0 {
            break;
        }
        shift += 5;
        // A well-formed 1e5-scaled coordinate delta never needs more bits.
        if shift > 60 {
            return Err(DecodeError::Truncated(pos));
        }
    }

    // Zig-zag: LSB carries the sign.
    let value = if accum & 1 == 1 {
        !((accum >> 1) as i64)
    } else {
        (accum >> 1) as i64
    };

    Ok((value, pos))
}
