use bytes::{BufMut, BytesMut};

use crate::http::{
    Headers, Method, StatusCode, Version,
    headers::standard::{CONTENT_LENGTH, TRANSFER_ENCODING},
};

/// Body framing header to emit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framing {
    /// No framing header, e.g. `GET` requests, `1xx` and `204` responses.
    None,
    /// `Content-Length`
    Length(u64),
    /// `Transfer-Encoding: chunked`
    Chunked,
}

/// Write request line and headers, including the terminating empty line.
///
/// Framing headers present in `headers` are replaced by `framing`.
pub fn write_request_head(
    dst: &mut BytesMut,
    method: &Method,
    target: &[u8],
    version: Version,
    headers: &Headers,
    framing: Framing,
) {
    dst.put_slice(method.as_str().as_bytes());
    dst.put_u8(b' ');
    dst.put_slice(target);
    dst.put_u8(b' ');
    dst.put_slice(version.as_str().as_bytes());
    dst.put_slice(b"\r\n");
    write_fields(dst, headers, framing);
}

/// Write status line and headers, including the terminating empty line.
pub fn write_response_head(
    dst: &mut BytesMut,
    version: Version,
    status: StatusCode,
    headers: &Headers,
    framing: Framing,
) {
    dst.put_slice(version.as_str().as_bytes());
    dst.put_u8(b' ');
    dst.put_slice(itoa::Buffer::new().format(status.as_u16()).as_bytes());
    dst.put_u8(b' ');
    dst.put_slice(status.message().as_bytes());
    dst.put_slice(b"\r\n");
    write_fields(dst, headers, framing);
}

fn write_fields(dst: &mut BytesMut, headers: &Headers, framing: Framing) {
    for field in headers {
        if field.name().eq_ignore_ascii_case(CONTENT_LENGTH.as_bytes())
            || field.name().eq_ignore_ascii_case(TRANSFER_ENCODING.as_bytes())
        {
            continue;
        }
        dst.put_slice(field.name());
        dst.put_slice(b": ");
        dst.put_slice(field.value());
        dst.put_slice(b"\r\n");
    }

    match framing {
        Framing::None => {}
        Framing::Length(len) => {
            dst.put_slice(b"Content-Length: ");
            dst.put_slice(itoa::Buffer::new().format(len).as_bytes());
            dst.put_slice(b"\r\n");
        }
        Framing::Chunked => dst.put_slice(b"Transfer-Encoding: chunked\r\n"),
    }

    dst.put_slice(b"\r\n");
}
