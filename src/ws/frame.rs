//! Frame codec, [RFC6455 section 5.2](https://www.rfc-editor.org/rfc/rfc6455#section-5.2).
use bytes::{Buf, BufMut, BytesMut};

use super::WsError;

/// Largest accepted payload length.
///
/// The 64-bit length field is restricted to 31 bits, longer frames drop the connection.
pub const MAX_PAYLOAD_LEN: u64 = 0x7FFF_FFFF;

/// Largest control frame payload.
pub const MAX_CONTROL_LEN: usize = 125;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from_u8(op: u8) -> Result<OpCode, WsError> {
        match op {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            op => Err(WsError::ReservedOpcode(op)),
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    #[inline]
    pub const fn is_control(self) -> bool {
        self.as_u8() & 0x8 != 0
    }
}

/// Decoded frame, payload already unmasked.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: BytesMut,
}

/// Decode one frame out of `buf`.
///
/// Returns `Ok(None)` and leaves `buf` untouched until the whole frame, header, mask and
/// payload, is buffered.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Frame>, WsError> {
    let Some(&[b0, b1]) = buf.first_chunk::<2>() else {
        return Ok(None);
    };

    if b0 & 0x70 != 0 {
        return Err(WsError::ReservedBits);
    }
    let fin = b0 & 0x80 != 0;
    let opcode = OpCode::from_u8(b0 & 0x0F)?;
    let masked = b1 & 0x80 != 0;

    let (len, mut offset) = match b1 & 0x7F {
        126 => match buf.get(2..4) {
            Some(ext) => (u64::from(u16::from_be_bytes([ext[0], ext[1]])), 4),
            None => return Ok(None),
        },
        127 => match buf.get(2..10) {
            Some(ext) => {
                let mut be = [0u8; 8];
                be.copy_from_slice(ext);
                (u64::from_be_bytes(be), 10)
            }
            None => return Ok(None),
        },
        len => (u64::from(len), 2),
    };
    if len > MAX_PAYLOAD_LEN {
        return Err(WsError::LengthOverflow);
    }
    if opcode.is_control() && (!fin || len > MAX_CONTROL_LEN as u64) {
        return Err(WsError::InvalidControlFrame);
    }

    let mut mask = None;
    if masked {
        let Some(key) = buf.get(offset..offset + 4) else {
            return Ok(None);
        };
        offset += 4;
        mask = Some([key[0], key[1], key[2], key[3]]);
    }

    #[allow(clippy::cast_possible_truncation, reason = "len <= MAX_PAYLOAD_LEN")]
    let len = len as usize;
    if buf.len() < offset + len {
        return Ok(None);
    }

    buf.advance(offset);
    let mut payload = buf.split_to(len);
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    Ok(Some(Frame { fin, opcode, payload }))
}

/// Write one frame, the payload is masked with `mask` when given.
pub fn encode_frame(dst: &mut BytesMut, fin: bool, opcode: OpCode, mask: Option<[u8; 4]>, payload: &[u8]) {
    let b0 = (fin as u8) << 7 | opcode.as_u8();
    let mask_bit = if mask.is_some() { 0x80 } else { 0 };

    dst.reserve(14 + payload.len());
    dst.put_u8(b0);
    match payload.len() {
        len @ 0..=125 => dst.put_u8(mask_bit | len as u8),
        len @ 126..=0xFFFF => {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(len as u16);
        }
        len => {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(len as u64);
        }
    }

    match mask {
        Some(key) => {
            dst.put_slice(&key);
            let start = dst.len();
            dst.put_slice(payload);
            apply_mask(&mut dst[start..], key);
        }
        None => dst.put_slice(payload),
    }
}

/// XOR `buf` with `key`, byte `i` with `key[i % 4]`. Applying twice restores the input.
pub fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        for (b, k) in chunk.iter_mut().zip(key) {
            *b ^= k;
        }
    }
    for (b, k) in chunks.into_remainder().iter_mut().zip(key) {
        *b ^= k;
    }
}
