//! `Range` and `Content-Range` helpers for byte ranges.
use super::head::parse_decimal;

/// Result of evaluating a `Range` request header against a resource length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeResult {
    /// Satisfiable range, both bounds inclusive.
    Ok { start: u64, end: u64 },
    /// Well formed but not satisfiable, answer `416`.
    InvalidRange,
    /// Malformed header or multiple ranges, answer `400`.
    BadRequest,
}

impl RangeResult {
    /// Length of a satisfiable range.
    pub fn len(&self) -> u64 {
        match self {
            RangeResult::Ok { start, end } => end - start + 1,
            _ => 0,
        }
    }
}

/// Evaluate `Range: bytes=...` against a resource of `total` bytes.
///
/// Supports `a-b`, `a-` and suffix `-n` forms; the end is clamped to the last byte.
pub fn parse_range(value: &[u8], total: u64) -> RangeResult {
    let Some(ranges) = value.trim_ascii().strip_prefix(b"bytes=") else {
        return RangeResult::BadRequest;
    };
    if ranges.contains(&b',') {
        return RangeResult::BadRequest;
    }
    let Some(dash) = ranges.iter().position(|&b| b == b'-') else {
        return RangeResult::BadRequest;
    };
    let (first, last) = (ranges[..dash].trim_ascii(), ranges[dash + 1..].trim_ascii());

    let (start, end) = match (first.is_empty(), last.is_empty()) {
        (true, true) => return RangeResult::BadRequest,
        (true, false) => {
            let Some(suffix) = parse_decimal(last) else {
                return RangeResult::BadRequest;
            };
            if suffix == 0 || total == 0 {
                return RangeResult::InvalidRange;
            }
            (total.saturating_sub(suffix), total - 1)
        }
        (false, _) => {
            let Some(start) = parse_decimal(first) else {
                return RangeResult::BadRequest;
            };
            let end = if last.is_empty() {
                total.saturating_sub(1)
            } else {
                match parse_decimal(last) {
                    Some(end) if end >= start => end.min(total.saturating_sub(1)),
                    _ => return RangeResult::BadRequest,
                }
            };
            (start, end)
        }
    };

    if start >= total || start > end {
        return RangeResult::InvalidRange;
    }
    RangeResult::Ok { start, end }
}

/// Parsed `Content-Range: bytes start-end/total`, `total` is `None` for `*`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: Option<u64>,
}

/// Parse a `Content-Range` response header value.
pub fn parse_content_range(value: &[u8]) -> Option<ContentRange> {
    let ranges = value.trim_ascii().strip_prefix(b"bytes")?.trim_ascii_start();
    let slash = ranges.iter().position(|&b| b == b'/')?;
    let (range, total) = (&ranges[..slash], ranges[slash + 1..].trim_ascii());
    let dash = range.iter().position(|&b| b == b'-')?;
    let start = parse_decimal(range[..dash].trim_ascii())?;
    let end = parse_decimal(range[dash + 1..].trim_ascii())?;
    let total = match total {
        b"*" => None,
        total => Some(parse_decimal(total)?),
    };
    if end < start || total.is_some_and(|t| end >= t) {
        return None;
    }
    Some(ContentRange { start, end, total })
}

/// Write the `Content-Range` value for a satisfiable range.
pub fn format_content_range(start: u64, end: u64, total: u64) -> String {
    format!("bytes {start}-{end}/{total}")
}
