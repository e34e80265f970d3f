use bytes::Bytes;

/// A single header field as received or to be sent.
#[derive(Clone, PartialEq, Eq)]
pub struct Field {
    name: Bytes,
    value: Bytes,
}

impl Field {
    /// Create header field, caller is responsible of names being valid tokens.
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self { name: name.into(), value: value.into() }
    }

    /// Returns the header name as received, original casing is preserved.
    #[inline]
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    #[inline]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Returns a shared handle of the value.
    #[inline]
    pub fn value_bytes(&self) -> Bytes {
        self.value.clone()
    }
}

impl std::fmt::Debug for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}: {}",
            String::from_utf8_lossy(&self.name),
            String::from_utf8_lossy(&self.value)
        )
    }
}

/// Ordered collection of header fields.
///
/// Lookup is case-insensitive and linear, messages handled here carry few headers.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<Field>,
}

impl Headers {
    /// Create new empty headers.
    #[inline]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Append a field, existing fields with the same name are kept.
    pub fn append(&mut self, name: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.fields.push(Field::new(name, value));
    }

    /// Replace every field named `name` with a single one.
    pub fn insert(&mut self, name: impl Into<Bytes>, value: impl Into<Bytes>) {
        let field = Field::new(name, value);
        self.remove(&field.name);
        self.fields.push(field);
    }

    /// Remove every field named `name`, returns `true` if any was removed.
    pub fn remove(&mut self, name: &[u8]) -> bool {
        let len = self.fields.len();
        self.fields.retain(|f| !f.name.eq_ignore_ascii_case(name));
        len != self.fields.len()
    }

    /// Returns the first value of `name`.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.get_all(name).next()
    }

    /// Returns the first value of `name` as trimmed `str`.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| str::from_utf8(v).ok()).map(str::trim)
    }

    /// Returns every value of `name` in received order.
    pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a [u8]> {
        self.fields
            .iter()
            .filter(move |f| f.name.eq_ignore_ascii_case(name.as_bytes()))
            .map(|f| &f.value[..])
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns `true` if any comma separated element of `name` equals `token`, ignoring case.
    pub fn contains_token(&self, name: &str, token: &str) -> bool {
        self.tokens(name).any(|t| t.eq_ignore_ascii_case(token.as_bytes()))
    }

    /// Returns every comma separated, whitespace trimmed element of `name`.
    pub fn tokens<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a [u8]> {
        self.get_all(name)
            .flat_map(|v| v.split(|&b| b == b','))
            .map(<[u8]>::trim_ascii)
            .filter(|t| !t.is_empty())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Field> {
        self.fields.iter()
    }

    pub(crate) fn last_mut(&mut self) -> Option<&mut Field> {
        self.fields.last_mut()
    }
}

impl Field {
    pub(crate) fn extend_value(&mut self, more: &[u8]) {
        let mut value = Vec::with_capacity(self.value.len() + 1 + more.len());
        value.extend_from_slice(&self.value);
        value.push(b' ');
        value.extend_from_slice(more);
        self.value = value.into();
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Field;
    type IntoIter = std::slice::Iter<'a, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

impl std::fmt::Debug for Headers {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_list().entries(&self.fields).finish()
    }
}

/// Standard header names used by the engine.
pub mod standard {
    pub const HOST: &str = "host";
    pub const CONNECTION: &str = "connection";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const CONTENT_RANGE: &str = "content-range";
    pub const TRANSFER_ENCODING: &str = "transfer-encoding";
    pub const EXPECT: &str = "expect";
    pub const ORIGIN: &str = "origin";
    pub const RANGE: &str = "range";
    pub const UPGRADE: &str = "upgrade";
    pub const SEC_WEBSOCKET_KEY: &str = "sec-websocket-key";
    pub const SEC_WEBSOCKET_ACCEPT: &str = "sec-websocket-accept";
    pub const SEC_WEBSOCKET_VERSION: &str = "sec-websocket-version";
}
