use bytes::{Buf, BufMut, BytesMut};

use super::ProtoError;

/// Chunked transfer-coding decoder.
///
/// The decoder only consumes what it can fully interpret, partial size lines and delimiters
/// stay in the buffer until more bytes arrive. Size lines and the trailer section are bound
/// by the header size limit.
#[derive(Clone, Debug)]
pub struct ChunkedDecoder {
    phase: Phase,
    limit: usize,
    /// Trailer bytes consumed so far.
    trailer: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Phase {
    /// Reading `hex-size [; ext] CRLF`.
    Size,
    /// Reading chunk data, bytes left in the current chunk.
    Data(u64),
    /// Reading the CRLF after chunk data.
    DataEnd,
    /// Reading trailer fields until the empty line.
    Trailer,
    Done,
}

/// Single decode step.
#[derive(Debug, PartialEq, Eq)]
pub enum Chunk {
    /// Need more bytes.
    Pending,
    /// Chunk data, possibly a part of a chunk.
    Data(BytesMut),
    /// Terminating chunk and trailer section consumed.
    End,
}

/// Chunk sizes above this are rejected.
const MAX_CHUNK_SIZE: u64 = u64::MAX >> 4;

/// Line limit of [`ChunkedDecoder::default`].
const DEFAULT_LIMIT: usize = 16 * 1024;

impl ChunkedDecoder {
    /// Decoder whose size lines and trailer section may not exceed `limit` bytes.
    pub const fn new(limit: usize) -> Self {
        Self { phase: Phase::Size, limit, trailer: 0 }
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Decode next step out of `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Chunk, ProtoError> {
        loop {
            match self.phase {
                Phase::Size => {
                    let Some(line) = take_line(buf) else {
                        if buf.len() > self.limit {
                            return Err(ProtoError::InvalidChunked);
                        }
                        return Ok(Chunk::Pending);
                    };
                    let size = parse_size(&line)?;
                    self.phase = match size {
                        0 => Phase::Trailer,
                        size => Phase::Data(size),
                    };
                }
                Phase::Data(remaining) => {
                    if buf.is_empty() {
                        return Ok(Chunk::Pending);
                    }
                    let take = remaining.min(buf.len() as u64);
                    #[allow(clippy::cast_possible_truncation, reason = "take <= buf.len()")]
                    let data = buf.split_to(take as usize);
                    self.phase = match remaining - take {
                        0 => Phase::DataEnd,
                        left => Phase::Data(left),
                    };
                    return Ok(Chunk::Data(data));
                }
                Phase::DataEnd => {
                    match buf.first_chunk::<2>() {
                        Some(b"\r\n") => buf.advance(2),
                        Some([b'\n', _]) => buf.advance(1),
                        Some(_) => return Err(ProtoError::InvalidChunked),
                        None => match buf.first() {
                            Some(b'\n') => buf.advance(1),
                            Some(b'\r') | None => return Ok(Chunk::Pending),
                            Some(_) => return Err(ProtoError::InvalidChunked),
                        },
                    }
                    self.phase = Phase::Size;
                }
                Phase::Trailer => {
                    let before = buf.len();
                    let Some(line) = take_line(buf) else {
                        if self.trailer + buf.len() > self.limit {
                            return Err(ProtoError::HeaderTooLarge);
                        }
                        return Ok(Chunk::Pending);
                    };
                    self.trailer += before - buf.len();
                    if self.trailer > self.limit {
                        return Err(ProtoError::HeaderTooLarge);
                    }
                    if line.is_empty() {
                        self.phase = Phase::Done;
                        return Ok(Chunk::End);
                    }
                }
                Phase::Done => return Ok(Chunk::End),
            }
        }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT)
    }
}

/// Split off one line, without its line ending.
fn take_line(buf: &mut BytesMut) -> Option<BytesMut> {
    let lf = buf.iter().position(|&b| b == b'\n')?;
    let mut line = buf.split_to(lf + 1);
    line.truncate(lf);
    if line.last() == Some(&b'\r') {
        line.truncate(lf - 1);
    }
    Some(line)
}

fn parse_size(line: &[u8]) -> Result<u64, ProtoError> {
    let digits = match line.iter().position(|&b| b == b';') {
        Some(ext) => &line[..ext],
        None => line,
    };
    let digits = digits.trim_ascii();
    if digits.is_empty() {
        return Err(ProtoError::InvalidChunked);
    }
    let size = digits.iter().try_fold(0u64, |acc, &b| {
        let digit = (b as char).to_digit(16)?;
        acc.checked_mul(16)?.checked_add(u64::from(digit))
    });
    match size {
        Some(size) if size <= MAX_CHUNK_SIZE => Ok(size),
        _ => Err(ProtoError::InvalidChunked),
    }
}

// ===== Encoder =====

/// Write one chunk, empty data is skipped since a zero size chunk terminates the body.
pub fn encode_chunk(data: &[u8], dst: &mut BytesMut) {
    if data.is_empty() {
        return;
    }
    dst.reserve(data.len() + 20);
    dst.put_slice(format!("{:X}\r\n", data.len()).as_bytes());
    dst.put_slice(data);
    dst.put_slice(b"\r\n");
}

/// Write the terminating chunk with an empty trailer section.
pub fn encode_last_chunk(dst: &mut BytesMut) {
    dst.put_slice(b"0\r\n\r\n");
}
