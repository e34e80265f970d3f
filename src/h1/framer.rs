use bytes::{Bytes, BytesMut};
use std::sync::Arc;

use super::{ChunkedDecoder, HeadKind, ProtoError, chunked::Chunk, head::parse_head};
use crate::{
    common::ParseResult,
    http::{MessageHead, StatusCode, Version, headers::standard::HOST},
};

/// Result of one [`Framer::decode`] step.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Buffer holds no further complete unit.
    NeedMoreData,
    /// Head parsed, body follows.
    Head(Arc<MessageHead>),
    /// `1xx` response other than `101`, the pending request is still unanswered.
    Informational(Arc<MessageHead>),
    /// `101 Switching Protocols`, bytes after the head belong to the upgraded protocol.
    Upgrade(Arc<MessageHead>),
    /// Part of the body, more to come.
    Partial(Bytes),
    /// Final part of the body, the framer is ready for the next message.
    Complete(Bytes),
}

/// Body framing decided from the head.
#[derive(Clone, Debug)]
enum Body {
    Length(u64),
    Chunked(ChunkedDecoder),
    UntilClose,
}

#[derive(Clone, Debug)]
enum Phase {
    Head,
    Body(Body),
}

/// HTTP/1.x message framer.
///
/// Turns a receive buffer into message boundaries. One framer lives for the whole connection,
/// after [`Outcome::Complete`] it starts over with the next head, which is what makes pipelined
/// responses work.
#[derive(Debug)]
pub struct Framer {
    kind: HeadKind,
    max_head: usize,
    phase: Phase,
    head: Option<Arc<MessageHead>>,
    bodiless: bool,
}

impl Framer {
    /// Framer decoding responses, for the client side.
    pub fn response(max_head: usize) -> Self {
        Self::new(HeadKind::Response, max_head)
    }

    /// Framer decoding requests, for the server side.
    pub fn request(max_head: usize) -> Self {
        Self::new(HeadKind::Request, max_head)
    }

    fn new(kind: HeadKind, max_head: usize) -> Self {
        Self { kind, max_head, phase: Phase::Head, head: None, bodiless: false }
    }

    /// The next response answers a `HEAD` request and carries no content.
    pub fn expect_bodiless(&mut self, bodiless: bool) {
        self.bodiless = bodiless;
    }

    /// Head of the message being decoded, or of the last one completed.
    pub fn head(&self) -> Option<&Arc<MessageHead>> {
        self.head.as_ref()
    }

    /// Returns `true` between messages.
    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Head)
    }

    /// Returns `true` if the current body is delimited by the peer closing the connection.
    pub fn is_until_close(&self) -> bool {
        matches!(self.phase, Phase::Body(Body::UntilClose))
    }

    /// Drop any partially decoded message.
    pub fn reset(&mut self) {
        self.phase = Phase::Head;
        self.bodiless = false;
    }

    /// Advance over `buf`, consuming everything that was reported.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Outcome, ProtoError> {
        let body = match &mut self.phase {
            Phase::Head => return self.decode_head(buf),
            Phase::Body(body) => body,
        };

        match body {
            Body::Length(remaining) => {
                if buf.is_empty() {
                    return Ok(Outcome::NeedMoreData);
                }
                let take = (*remaining).min(buf.len() as u64);
                #[allow(clippy::cast_possible_truncation, reason = "take <= buf.len()")]
                let data = buf.split_to(take as usize).freeze();
                *remaining -= take;
                if *remaining == 0 {
                    self.finish();
                    Ok(Outcome::Complete(data))
                } else {
                    Ok(Outcome::Partial(data))
                }
            }
            Body::Chunked(decoder) => match decoder.decode(buf)? {
                Chunk::Pending => Ok(Outcome::NeedMoreData),
                Chunk::Data(data) => Ok(Outcome::Partial(data.freeze())),
                Chunk::End => {
                    self.finish();
                    Ok(Outcome::Complete(Bytes::new()))
                }
            },
            Body::UntilClose if buf.is_empty() => Ok(Outcome::NeedMoreData),
            Body::UntilClose => Ok(Outcome::Partial(buf.split().freeze())),
        }
    }

    /// Transport closed, completes a body delimited by close.
    ///
    /// Returns `None` if no such body is in progress.
    pub fn decode_eof(&mut self, buf: &mut BytesMut) -> Option<Bytes> {
        match self.phase {
            Phase::Body(Body::UntilClose) => {
                let rest = buf.split().freeze();
                self.finish();
                Some(rest)
            }
            _ => None,
        }
    }

    fn finish(&mut self) {
        self.phase = Phase::Head;
        self.bodiless = false;
    }

    fn decode_head(&mut self, buf: &mut BytesMut) -> Result<Outcome, ProtoError> {
        let head = match parse_head(buf, self.kind, self.max_head) {
            ParseResult::Pending => return Ok(Outcome::NeedMoreData),
            ParseResult::Err(err) => return Err(err),
            ParseResult::Ok(head) => Arc::new(head),
        };
        self.head = Some(head.clone());

        if let Some(status) = head.status() {
            if status == StatusCode::SWITCHING_PROTOCOLS {
                self.bodiless = false;
                return Ok(Outcome::Upgrade(head));
            }
            if status.is_informational() {
                return Ok(Outcome::Informational(head));
            }
        } else if head.version() == Version::HTTP_11 && !head.headers.contains(HOST) {
            return Err(ProtoError::MissingHost);
        }

        match self.classify(&head)? {
            Body::Length(0) => {
                self.finish();
                Ok(Outcome::Complete(Bytes::new()))
            }
            body => {
                self.phase = Phase::Body(body);
                Ok(Outcome::Head(head))
            }
        }
    }

    fn classify(&self, head: &MessageHead) -> Result<Body, ProtoError> {
        match head.status() {
            // response framing
            Some(status) => {
                if status.is_bodiless() || self.bodiless {
                    return Ok(Body::Length(0));
                }
                if head.is_chunked() {
                    return Ok(Body::Chunked(ChunkedDecoder::new(self.max_head)));
                }
                match head.content_length() {
                    Some(Ok(len)) => Ok(Body::Length(len)),
                    Some(Err(())) => Err(ProtoError::InvalidContentLength),
                    None if head.version() >= Version::HTTP_11 && !head.has_connection_close() => {
                        Ok(Body::Length(0))
                    }
                    None => Ok(Body::UntilClose),
                }
            }
            // request framing, requests are never delimited by close
            None => {
                if head.is_chunked() {
                    return Ok(Body::Chunked(ChunkedDecoder::new(self.max_head)));
                }
                match head.content_length() {
                    Some(Ok(len)) => Ok(Body::Length(len)),
                    Some(Err(())) => Err(ProtoError::InvalidContentLength),
                    None => Ok(Body::Length(0)),
                }
            }
        }
    }
}
