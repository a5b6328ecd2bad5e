//! HTTP/1.x title detection and message framing.
//!
//! Framing must match the transfer semantics exactly; consuming too little or
//! too much would corrupt the next message's prologue on a keep-alive
//! connection.

use crate::protocols::stream::http::status::status_text;

/// In HTTP a newline is two bytes, for both windows and *nix support.
pub const CRLF: &[u8] = b"\r\n";

/// `GET / HTTP/1.1\r\n`
const MIN_REQUEST_LEN: usize = 16;
/// `HTTP/1.1 200\r\n`
const MIN_RESPONSE_LEN: usize = 14;
/// `HTTP/1.1`
const VERSION_LEN: usize = 8;

/// Request methods recognized when sniffing a request title.
pub const METHODS: &[&str] = &[
    "CONNECT", "DELETE", "GET", "HEAD", "OPTIONS", "PATCH", "POST", "PUT", "TRACE",
];

#[inline]
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Reports whether this payload begins with an HTTP/1 request title, returning
/// the method.
pub fn request_title(payload: &[u8]) -> Option<&'static str> {
    if payload.len() < MIN_REQUEST_LEN {
        return None;
    }
    let title_len = find(payload, CRLF)?;
    let title = std::str::from_utf8(&payload[..title_len]).ok()?;

    let mut parts = title.split(' ');
    let method = parts.next()?;
    let target = parts.next()?;
    let version = parts.next()?;
    if parts.next().is_some() || target.is_empty() {
        return None;
    }
    if !matches!(version, "HTTP/1.0" | "HTTP/1.1") {
        return None;
    }
    METHODS.iter().find(|m| **m == method).copied()
}

/// Reports whether this payload begins with an HTTP/1 response title, returning
/// the status code. Only status codes with a known RFC 2616 reason phrase are
/// accepted.
pub fn response_title(payload: &[u8]) -> Option<u16> {
    if payload.len() < MIN_RESPONSE_LEN {
        return None;
    }
    find(payload, CRLF)?;
    if !payload.starts_with(b"HTTP/1.0") && !payload.starts_with(b"HTTP/1.1") {
        return None;
    }
    if payload[VERSION_LEN] != b' ' {
        return None;
    }
    let digits = &payload[VERSION_LEN + 1..VERSION_LEN + 4];
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let code = (digits[0] - b'0') as u16 * 100 + (digits[1] - b'0') as u16 * 10
        + (digits[2] - b'0') as u16;
    status_text(code)?;
    if payload[VERSION_LEN + 4] != b' ' && payload[VERSION_LEN + 4] != b'\r' {
        return None;
    }
    Some(code)
}

/// Looks up a header value inside a raw header block, case-insensitively.
/// Returns the value with surrounding whitespace trimmed.
pub(crate) fn header_value<'a>(block: &'a [u8], name: &str) -> Option<&'a [u8]> {
    for line in block.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.len() > name.len()
            && line[name.len()] == b':'
            && line[..name.len()].eq_ignore_ascii_case(name.as_bytes())
        {
            let mut value = &line[name.len() + 1..];
            while let Some((&(b' ' | b'\t'), rest)) = value.split_first() {
                value = rest;
            }
            while let Some((&(b' ' | b'\t'), rest)) = value.split_last() {
                value = rest;
            }
            return Some(value);
        }
    }
    None
}

fn value_contains(value: &[u8], token: &str) -> bool {
    String::from_utf8_lossy(value)
        .to_ascii_lowercase()
        .contains(token)
}

/// Reports whether `buf` holds at least one complete HTTP/1 message.
///
/// Decision order: header terminator, chunked transfer (with or without
/// trailers), `Content-Length`, otherwise headers-only.
pub fn has_full_message(buf: &[u8]) -> bool {
    let header_end = match find(buf, b"\r\n\r\n") {
        Some(pos) => pos,
        None => return false,
    };
    let headers = &buf[..header_end + 2];
    let body = &buf[header_end + 4..];

    if let Some(te) = header_value(headers, "Transfer-Encoding") {
        if value_contains(te, "chunked") {
            let has_last_chunk = body.starts_with(b"0\r\n") || find(body, b"\r\n0\r\n").is_some();
            if header_value(headers, "Trailer").is_some() {
                // trailers follow the last chunk and end with a blank line
                return has_last_chunk && body.ends_with(b"\r\n\r\n");
            }
            return body == b"0\r\n\r\n" || body.ends_with(b"\r\n0\r\n\r\n");
        }
    }

    if let Some(cl) = header_value(headers, "Content-Length") {
        return match std::str::from_utf8(cl).ok().and_then(|s| s.parse::<usize>().ok()) {
            Some(length) => body.len() >= length,
            None => false,
        };
    }

    // headers only; message semantics decide whether a body follows
    true
}
