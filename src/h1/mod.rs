//! HTTP/1.x wire protocol.
//!
//! - [`Framer`] decodes a byte stream into message heads and body slices
//! - [`ChunkedDecoder`] handles `Transfer-Encoding: chunked`
//! - [`encode`] writes message heads
mod error;
mod head;
mod chunked;
mod framer;
pub mod encode;

pub use error::ProtoError;
pub use head::{HeadKind, parse_head};
pub use chunked::{Chunk, ChunkedDecoder, encode_chunk, encode_last_chunk};
pub use framer::{Framer, Outcome};
pub use encode::Framing;

#[cfg(test)]
mod test;
