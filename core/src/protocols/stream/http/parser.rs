//! HTTP/1 message parser over a framed byte buffer.
//!
//! The framing detector guarantees the buffer holds (at least) one complete
//! message, so parsing works on slices rather than a streaming reader; a
//! best-effort parse of a truncated buffer surfaces `Incomplete`.

use crate::protocols::stream::http::message::{Headers, HttpRequest, HttpResponse};

use std::io::Read;

use flate2::read::{GzDecoder, ZlibDecoder};
use httparse::{Status, EMPTY_HEADER};
use thiserror::Error;

const MAX_HEADERS: usize = 64;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HttpParseError {
    #[error("malformed start line")]
    BadStartLine,

    #[error("malformed headers")]
    BadHeaders,

    #[error("message truncated")]
    Incomplete,

    #[error("malformed chunked body")]
    BadChunk,
}

fn collect_headers(parsed: &[httparse::Header]) -> Headers {
    let mut headers = Headers::default();
    for hdr in parsed {
        headers.push(hdr.name, &String::from_utf8_lossy(hdr.value));
    }
    headers
}

/// Declared content length: the header value, or `-1` when absent/unparsable.
fn declared_content_length(headers: &Headers) -> i64 {
    headers
        .get("Content-Length")
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(-1)
}

fn is_chunked(headers: &Headers) -> bool {
    headers
        .get("Transfer-Encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false)
}

/// Extracts the message body following the header block.
fn read_body(headers: &Headers, rest: &[u8]) -> Result<(i64, Vec<u8>), HttpParseError> {
    if is_chunked(headers) {
        let body = decode_chunked(rest)?;
        return Ok((-1, body));
    }
    let declared = declared_content_length(headers);
    if declared >= 0 {
        let take = (declared as usize).min(rest.len());
        return Ok((declared, rest[..take].to_vec()));
    }
    Ok((-1, Vec::new()))
}

/// Parses a framed HTTP request.
pub fn parse_request(buf: &[u8]) -> Result<HttpRequest, HttpParseError> {
    let mut header_storage = [EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut header_storage);
    let header_len = match req.parse(buf) {
        Ok(Status::Complete(n)) => n,
        Ok(Status::Partial) => return Err(HttpParseError::Incomplete),
        Err(httparse::Error::Version) | Err(httparse::Error::Token) => {
            return Err(HttpParseError::BadStartLine)
        }
        Err(_) => return Err(HttpParseError::BadHeaders),
    };

    let method = req.method.ok_or(HttpParseError::BadStartLine)?.to_owned();
    let uri = req.path.ok_or(HttpParseError::BadStartLine)?.to_owned();
    let version = format!("HTTP/1.{}", req.version.ok_or(HttpParseError::BadStartLine)?);
    let headers = collect_headers(req.headers);

    let (content_length, body) = read_body(&headers, &buf[header_len..])?;
    Ok(HttpRequest {
        method,
        uri,
        version,
        headers,
        content_length,
        body,
    })
}

/// Parses a framed HTTP response.
pub fn parse_response(buf: &[u8]) -> Result<HttpResponse, HttpParseError> {
    let mut header_storage = [EMPTY_HEADER; MAX_HEADERS];
    let mut rsp = httparse::Response::new(&mut header_storage);
    let header_len = match rsp.parse(buf) {
        Ok(Status::Complete(n)) => n,
        Ok(Status::Partial) => return Err(HttpParseError::Incomplete),
        Err(httparse::Error::Version) | Err(httparse::Error::Status) => {
            return Err(HttpParseError::BadStartLine)
        }
        Err(_) => return Err(HttpParseError::BadHeaders),
    };

    let version = format!("HTTP/1.{}", rsp.version.ok_or(HttpParseError::BadStartLine)?);
    let status_code = rsp.code.ok_or(HttpParseError::BadStartLine)?;
    let reason = rsp.reason.unwrap_or_default().to_owned();
    let headers = collect_headers(rsp.headers);

    let (content_length, body) = read_body(&headers, &buf[header_len..])?;
    Ok(HttpResponse {
        version,
        status_code,
        reason,
        headers,
        content_length,
        body,
    })
}

/// Decodes a chunked transfer encoding body, stopping at the last-chunk marker.
/// Trailers, if any, are discarded.
fn decode_chunked(mut data: &[u8]) -> Result<Vec<u8>, HttpParseError> {
    let mut body = Vec::new();
    loop {
        let line_end = data
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or(HttpParseError::BadChunk)?;
        let size_str = std::str::from_utf8(&data[..line_end])
            .map_err(|_| HttpParseError::BadChunk)?;
        // chunk extensions after ';' are ignored
        let size_str = size_str.split(';').next().unwrap_or_default().trim();
        let size =
            usize::from_str_radix(size_str, 16).map_err(|_| HttpParseError::BadChunk)?;
        data = &data[line_end + 2..];
        if size == 0 {
            return Ok(body);
        }
        if data.len() < size + 2 {
            return Err(HttpParseError::BadChunk);
        }
        body.extend_from_slice(&data[..size]);
        if &data[size..size + 2] != b"\r\n" {
            return Err(HttpParseError::BadChunk);
        }
        data = &data[size + 2..];
    }
}

/// Transparently decompresses a gzip or deflate body per `Content-Encoding`.
///
/// Returns the (possibly original) bytes plus whether decompression happened;
/// a decoder error falls back to the raw stream rather than failing the
/// message.
pub fn decompress_body(headers: &Headers, body: &[u8]) -> (Vec<u8>, bool) {
    let encoding = match headers.get("Content-Encoding") {
        Some(e) => e.to_ascii_lowercase(),
        None => return (body.to_vec(), false),
    };

    if encoding.contains("gzip") {
        let mut out = Vec::new();
        match GzDecoder::new(body).read_to_end(&mut out) {
            Ok(_) => return (out, true),
            Err(err) => {
                log::debug!("gzip decode failed, keeping raw body: {}", err);
                return (body.to_vec(), false);
            }
        }
    }
    if encoding.contains("deflate") {
        let mut out = Vec::new();
        match ZlibDecoder::new(body).read_to_end(&mut out) {
            Ok(_) => return (out, true),
            Err(err) => {
                log::debug!("deflate decode failed, keeping raw body: {}", err);
                return (body.to_vec(), false);
            }
        }
    }
    (body.to_vec(), false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn parses_request_with_content_length() {
        let req = parse_request(
            b"POST /post HTTP/1.1\r\nContent-Length: 7\r\nHost: www.w3.org\r\n\r\na=1&b=2",
        )
        .unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.uri, "/post");
        assert_eq!(req.version, "HTTP/1.1");
        assert_eq!(req.host(), "www.w3.org");
        assert_eq!(req.content_length, 7);
        assert_eq!(req.body, b"a=1&b=2");
    }

    #[test]
    fn parses_chunked_response() {
        let rsp = parse_response(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
              7\r\nMozilla\r\n9\r\nDeveloper\r\n7\r\nNetwork\r\n0\r\n\r\n",
        )
        .unwrap();
        assert_eq!(rsp.status_code, 200);
        assert_eq!(rsp.status_line(), "HTTP/1.1 200 OK");
        assert_eq!(rsp.content_length, -1);
        assert_eq!(rsp.body, b"MozillaDeveloperNetwork");
    }

    #[test]
    fn truncated_headers_are_incomplete() {
        assert_eq!(
            parse_request(b"GET / HTTP/1.1\r\nHost: h"),
            Err(HttpParseError::Incomplete)
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_response(b"NOT HTTP AT ALL\r\n\r\n").is_err());
    }

    #[test]
    fn chunk_extensions_are_ignored() {
        let body = decode_chunked(b"3;ext=1\r\nabc\r\n0\r\n\r\n").unwrap();
        assert_eq!(body, b"abc");
    }

    #[test]
    fn bad_chunk_size_fails() {
        assert_eq!(
            decode_chunked(b"zz\r\nabc\r\n0\r\n\r\n"),
            Err(HttpParseError::BadChunk)
        );
    }

    #[test]
    fn gzip_body_is_decompressed_with_raw_fallback() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"hello gzip").unwrap();
        let compressed = enc.finish().unwrap();

        let mut headers = Headers::default();
        headers.push("Content-Encoding", "gzip");
        let (body, decompressed) = decompress_body(&headers, &compressed);
        assert!(decompressed);
        assert_eq!(body, b"hello gzip");

        // corrupt stream falls back to the raw bytes
        let (raw, decompressed) = decompress_body(&headers, b"not gzip");
        assert!(!decompressed);
        assert_eq!(raw, b"not gzip");
    }
}
