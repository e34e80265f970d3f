use std::num::NonZeroU16;

/// HTTP [Status Code][rfc].
///
/// Any three digit code received from a peer is representable, [`StatusCode::message`] only
/// knows the reason phrases this crate writes itself.
///
/// [rfc]: <https://datatracker.ietf.org/doc/html/rfc9110#name-status-codes>
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatusCode(NonZeroU16);

macro_rules! status_code {
    ($($int:literal $id:ident $msg:literal;)*) => {
        impl StatusCode {
            $(
                #[doc = concat!("`", stringify!($int), " ", $msg, "`")]
                pub const $id: StatusCode = StatusCode(NonZeroU16::new($int).unwrap());
            )*

            /// Returns the standard reason phrase, e.g: `"OK"`, or empty string if unknown.
            pub const fn message(&self) -> &'static str {
                match self.0.get() {
                    $($int => $msg,)*
                    _ => "",
                }
            }
        }
    };
}

status_code! {
    100 CONTINUE "Continue";
    101 SWITCHING_PROTOCOLS "Switching Protocols";
    200 OK "OK";
    201 CREATED "Created";
    204 NO_CONTENT "No Content";
    206 PARTIAL_CONTENT "Partial Content";
    301 MOVED_PERMANENTLY "Moved Permanently";
    304 NOT_MODIFIED "Not Modified";
    400 BAD_REQUEST "Bad Request";
    403 FORBIDDEN "Forbidden";
    404 NOT_FOUND "Not Found";
    405 METHOD_NOT_ALLOWED "Method Not Allowed";
    416 RANGE_NOT_SATISFIABLE "Range Not Satisfiable";
    426 UPGRADE_REQUIRED "Upgrade Required";
    431 REQUEST_HEADER_FIELDS_TOO_LARGE "Request Header Fields Too Large";
    500 INTERNAL_SERVER_ERROR "Internal Server Error";
    501 NOT_IMPLEMENTED "Not Implemented";
    503 SERVICE_UNAVAILABLE "Service Unavailable";
    505 HTTP_VERSION_NOT_SUPPORTED "HTTP Version Not Supported";
}

impl StatusCode {
    /// Create status code from integer, must be within `100..=999`.
    pub const fn from_u16(code: u16) -> Option<StatusCode> {
        match code {
            100..=999 => match NonZeroU16::new(code) {
                Some(code) => Some(StatusCode(code)),
                None => None,
            },
            _ => None,
        }
    }

    /// Parse exactly three ascii digits.
    pub const fn from_bytes(bytes: &[u8]) -> Option<StatusCode> {
        let [a @ b'1'..=b'9', b @ b'0'..=b'9', c @ b'0'..=b'9'] = bytes else {
            return None;
        };
        let code = (*a - b'0') as u16 * 100 + (*b - b'0') as u16 * 10 + (*c - b'0') as u16;
        StatusCode::from_u16(code)
    }

    /// Returns status code value, e.g: `200`.
    #[inline]
    pub const fn as_u16(&self) -> u16 {
        self.0.get()
    }

    /// Returns `true` for `1xx` codes.
    #[inline]
    pub const fn is_informational(&self) -> bool {
        self.0.get() < 200
    }

    /// Returns `true` for codes that never carry content: `1xx`, `204` and `304`.
    #[inline]
    pub const fn is_bodiless(&self) -> bool {
        matches!(self.0.get(), 100..=199 | 204 | 304)
    }
}

impl Default for StatusCode {
    #[inline]
    fn default() -> Self {
        Self::OK
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} {}", self.0, self.message())
    }
}

impl std::fmt::Debug for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
