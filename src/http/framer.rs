//! Incremental HTTP message framing.
//!
//! A pure function over the bytes a peer has buffered so far. It only
//! answers one question: how long is the current message? The request line
//! and all headers other than `Content-Length` and `Authorization` are left
//! untouched for the dispatcher.

use memchr::{memchr, memmem};
use std::ops::Range;

const SEPARATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &[u8] = b"Content-Length: ";
const AUTHORIZATION: &[u8] = b"Authorization: ";

/// Longest `Authorization` value surfaced to the dispatcher; anything past
/// this is silently truncated.
pub(crate) const AUTH_TOKEN_MAX: usize = 63;

/// Outcome of one framing pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Framing {
    /// The header separator has not arrived yet; read more.
    Incomplete,
    /// Headers are complete and the total message length is known.
    Complete(FrameInfo),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FrameInfo {
    /// Bytes up to and including the CRLF-CRLF separator.
    pub(crate) header_len: usize,
    /// Parsed `Content-Length` value, 0 when the header is absent.
    pub(crate) content_length: usize,
    /// Total message length: `header_len + content_length`.
    pub(crate) msg_len: usize,
    /// Byte range of the `Authorization` value within the buffer.
    pub(crate) auth: Option<Range<usize>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameError {
    /// The message cannot fit the receive buffer.
    Oversize,
    /// `Content-Length` is negative or out of range.
    InvalidContentLength,
}

/// Frames the message currently held in `buf`.
///
/// Idempotent over growing prefixes: once the separator is in the buffer,
/// every further call returns the same `FrameInfo` regardless of how many
/// payload bytes have arrived since. `extract_auth` is set for the REST
/// role only.
pub(crate) fn frame(
    buf: &[u8],
    capacity: usize,
    extract_auth: bool,
) -> Result<Framing, FrameError> {
    let Some(separator) = memmem::find(buf, SEPARATOR) else {
        return match buf.len() < capacity {
            true => Ok(Framing::Incomplete),
            false => Err(FrameError::Oversize),
        };
    };

    let header_len = separator + SEPARATOR.len();
    let headers = &buf[..separator];

    let content_length = match header_value(headers, CONTENT_LENGTH) {
        Some(range) => parse_content_length(&headers[range])?,
        None => 0,
    };

    let msg_len = header_len + content_length;
    if msg_len > capacity {
        return Err(FrameError::Oversize);
    }

    let auth = match extract_auth {
        true => header_value(headers, AUTHORIZATION)
            .map(|range| range.start..range.end.min(range.start + AUTH_TOKEN_MAX)),
        false => None,
    };

    Ok(Framing::Complete(FrameInfo {
        header_len,
        content_length,
        msg_len,
        auth,
    }))
}

/// Finds the first header line starting with `name` (exact, case-sensitive)
/// and returns the byte range of its value. The value extends up to the
/// first CR or LF.
fn header_value(headers: &[u8], name: &[u8]) -> Option<Range<usize>> {
    let mut start = 0;
    loop {
        let line_end = memchr(b'\n', &headers[start..]).map(|at| start + at);
        let line = match line_end {
            Some(end) => &headers[start..end],
            None => &headers[start..],
        };

        if line.len() >= name.len() && &line[..name.len()] == name {
            let value_start = start + name.len();
            let rest = &headers[value_start..];
            let value_len = rest
                .iter()
                .position(|&byte| byte == b'\r' || byte == b'\n')
                .unwrap_or(rest.len());
            return Some(value_start..value_start + value_len);
        }

        match line_end {
            Some(end) => start = end + 1,
            None => return None,
        }
    }
}

/// Parses a signed decimal `Content-Length` value.
///
/// A negative length is fatal. A value with no leading digits leaves the
/// length at zero, as if the header were absent.
fn parse_content_length(value: &[u8]) -> Result<usize, FrameError> {
    let (negative, digits) = match value.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, value),
    };

    let mut length: usize = 0;
    let mut seen_digit = false;
    for &byte in digits {
        if !byte.is_ascii_digit() {
            break;
        }
        seen_digit = true;
        length = length
            .checked_mul(10)
            .and_then(|total| total.checked_add((byte - b'0') as usize))
            .ok_or(FrameError::InvalidContentLength)?;
    }

    match (seen_digit, negative) {
        (false, _) => Ok(0),
        (true, true) if length > 0 => Err(FrameError::InvalidContentLength),
        (true, true) => Ok(0),
        (true, false) => Ok(length),
    }
}
