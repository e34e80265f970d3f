//! Message head parser.
//!
//! [`parse_head`] works on a growing receive buffer. Nothing is consumed until the empty line
//! terminating the header section has arrived, then the whole head is split off the buffer and
//! every field is sliced out of that one frozen allocation.
use bytes::{Buf, Bytes, BytesMut};

use super::ProtoError;
use crate::common::ParseResult;
use crate::http::{
    Headers, Method, MessageHead, RequestLine, StartLine, StatusCode, StatusLine, Version,
    is_tchar,
};

/// Which start line is expected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeadKind {
    Request,
    Response,
}

/// Parse one message head.
///
/// Leading empty lines are skipped. Returns [`ParseResult::Pending`] without consuming anything
/// but those empty lines if the terminator is not buffered yet.
pub fn parse_head(
    buf: &mut BytesMut,
    kind: HeadKind,
    max_size: usize,
) -> ParseResult<MessageHead, ProtoError> {
    skip_empty_lines(buf);

    let Some(end) = find_head_end(buf) else {
        if buf.len() > max_size {
            return ParseResult::Err(ProtoError::HeaderTooLarge);
        }
        return ParseResult::Pending;
    };
    if end > max_size {
        return ParseResult::Err(ProtoError::HeaderTooLarge);
    }

    let raw = buf.split_to(end).freeze();
    parse_frozen(&raw, kind).into()
}

fn skip_empty_lines(buf: &mut BytesMut) {
    loop {
        match buf.first_chunk::<2>() {
            Some(b"\r\n") => buf.advance(2),
            _ => match buf.first() {
                Some(b'\n') => buf.advance(1),
                _ => return,
            },
        }
    }
}

/// Returns length of the head including the terminating empty line.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    let mut offset = 0;
    while let Some(lf) = buf[offset..].iter().position(|&b| b == b'\n') {
        let next = offset + lf + 1;
        match &buf[next..] {
            [b'\n', ..] => return Some(next + 1),
            [b'\r', b'\n', ..] => return Some(next + 2),
            _ => offset = next,
        }
    }
    None
}

/// Iterate lines of a complete head, yielding `(start, end)` without the line ending.
fn lines(raw: &[u8]) -> impl Iterator<Item = (usize, usize)> {
    let mut offset = 0;
    std::iter::from_fn(move || {
        let lf = raw[offset..].iter().position(|&b| b == b'\n')?;
        let start = offset;
        let mut end = offset + lf;
        offset = end + 1;
        if end > start && raw[end - 1] == b'\r' {
            end -= 1;
        }
        Some((start, end))
    })
}

fn parse_frozen(raw: &Bytes, kind: HeadKind) -> Result<MessageHead, ProtoError> {
    let mut lines = lines(raw);

    let (start, end) = lines.next().ok_or(ProtoError::InvalidStartLine)?;
    let line = match kind {
        HeadKind::Request => StartLine::Request(parse_request_line(raw.slice(start..end))?),
        HeadKind::Response => StartLine::Response(parse_status_line(raw.slice(start..end))?),
    };

    let mut headers = Headers::new();
    for (start, end) in lines {
        let field = &raw[start..end];
        if field.is_empty() {
            break;
        }

        // obsolete line folding
        if matches!(field[0], b' ' | b'\t') {
            let last = headers.last_mut().ok_or(ProtoError::InvalidHeader)?;
            last.extend_value(field.trim_ascii());
            continue;
        }

        let colon = field.iter().position(|&b| b == b':').ok_or(ProtoError::InvalidHeader)?;
        let name = &field[..colon];
        if name.is_empty() || !name.iter().all(is_tchar) {
            return Err(ProtoError::InvalidHeader);
        }

        let value = trim_range(field, colon + 1);
        headers.append(
            raw.slice(start..start + colon),
            raw.slice(start + value.0..start + value.1),
        );
    }

    Ok(MessageHead { line, headers })
}

fn trim_range(field: &[u8], from: usize) -> (usize, usize) {
    let mut start = from;
    let mut end = field.len();
    while start < end && matches!(field[start], b' ' | b'\t') {
        start += 1;
    }
    while end > start && matches!(field[end - 1], b' ' | b'\t') {
        end -= 1;
    }
    (start, end)
}

fn parse_request_line(line: Bytes) -> Result<RequestLine, ProtoError> {
    let mut parts = line.split(|&b| b == b' ').filter(|p| !p.is_empty());
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ProtoError::InvalidStartLine);
    };

    let method = Method::from_bytes(method).ok_or(ProtoError::InvalidStartLine)?;
    let version = parse_version(version)?;
    let target = line.slice_ref(target);

    Ok(RequestLine { method, target, version })
}

fn parse_status_line(line: Bytes) -> Result<StatusLine, ProtoError> {
    let mut parts = line.splitn(3, |&b| b == b' ');
    let (Some(version), Some(status)) = (parts.next(), parts.next()) else {
        return Err(ProtoError::InvalidStartLine);
    };
    let reason = parts.next().unwrap_or_default();

    let version = parse_version(version)?;
    let status = StatusCode::from_bytes(status).ok_or(ProtoError::InvalidStartLine)?;
    let reason = if reason.is_empty() { Bytes::new() } else { line.slice_ref(reason) };

    Ok(StatusLine { version, status, reason })
}

fn parse_version(token: &[u8]) -> Result<Version, ProtoError> {
    match Version::from_bytes(token) {
        Some(version) => Ok(version),
        None if token.starts_with(b"HTTP/") => Err(ProtoError::UnsupportedVersion),
        None => Err(ProtoError::InvalidStartLine),
    }
}
