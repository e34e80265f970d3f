use bytes::Bytes;

/// HTTP Method.
///
/// Standard methods from [RFC9110] are stored inline, any other token is kept as an extension
/// method, servers are expected to answer those themselves.
///
/// [RFC9110]: <https://www.rfc-editor.org/rfc/rfc9110.html#name-methods>
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Method(Inner);

#[derive(Clone, PartialEq, Eq, Hash)]
enum Inner {
    Standard(u8),
    Extension(Bytes),
}

const STANDARD: [&str; 9] = [
    "GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH",
];

macro_rules! standard {
    ($($(#[$doc:meta])* $id:ident = $idx:literal;)*) => {
        impl Method {
            $(
                $(#[$doc])*
                pub const $id: Method = Method(Inner::Standard($idx));
            )*
        }
    };
}

standard! {
    /// [GET](https://www.rfc-editor.org/rfc/rfc9110.html#name-get)
    GET = 0;
    /// [HEAD](https://www.rfc-editor.org/rfc/rfc9110.html#name-head), the response never
    /// carries content regardless of its framing headers.
    HEAD = 1;
    /// [POST](https://www.rfc-editor.org/rfc/rfc9110.html#name-post)
    POST = 2;
    /// [PUT](https://www.rfc-editor.org/rfc/rfc9110.html#name-put)
    PUT = 3;
    /// [DELETE](https://www.rfc-editor.org/rfc/rfc9110.html#name-delete)
    DELETE = 4;
    /// [CONNECT](https://www.rfc-editor.org/rfc/rfc9110.html#name-connect)
    CONNECT = 5;
    /// [OPTIONS](https://www.rfc-editor.org/rfc/rfc9110.html#name-options)
    OPTIONS = 6;
    /// [TRACE](https://www.rfc-editor.org/rfc/rfc9110.html#name-trace)
    TRACE = 7;
    /// [PATCH](https://www.rfc-editor.org/rfc/rfc5789#section-2)
    PATCH = 8;
}

impl Method {
    /// Create method from a token.
    ///
    /// Returns `None` if the token is empty or contains non token characters.
    pub fn from_bytes(bytes: &[u8]) -> Option<Method> {
        if let Some(idx) = STANDARD.iter().position(|m| m.as_bytes() == bytes) {
            return Some(Method(Inner::Standard(idx as u8)));
        }
        if bytes.is_empty() || !bytes.iter().all(is_tchar) {
            return None;
        }
        Some(Method(Inner::Extension(Bytes::copy_from_slice(bytes))))
    }

    /// Returns string representation of the method.
    pub fn as_str(&self) -> &str {
        match &self.0 {
            Inner::Standard(idx) => STANDARD[*idx as usize],
            // token characters are validated ASCII
            Inner::Extension(ext) => str::from_utf8(ext).unwrap_or_default(),
        }
    }
}

pub(crate) fn is_tchar(b: &u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(b)
}

impl Default for Method {
    #[inline]
    fn default() -> Self {
        Method::GET
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
