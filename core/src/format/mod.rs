//! Transaction record rendering.
//!
//! Turns parsed messages into the text, JSON, or curl record formats and the
//! EOF/ERR sentinels. Rendering never blocks and never performs network I/O;
//! the only file access is the optional body dump.

mod curl;
pub mod dump;
pub mod json;
pub mod mime;

use crate::config::Level;
use crate::conntrack::conn_id::ConnKey;
use crate::filter::Policy;
use crate::protocols::stream::http::parser::decompress_body;
use crate::protocols::stream::http::{Headers, HttpMessage, HttpRequest, HttpResponse};

use std::fmt;
use std::fmt::Write as _;

use chrono::{DateTime, SecondsFormat, Utc};

/// Display cap for bodies embedded in JSON records.
pub const MAX_JSON_BODY: usize = 4096;

/// Request methods that never carry a body worth printing.
pub(crate) const BODILESS_METHODS: &[&str] = &["GET", "HEAD", "TRACE", "OPTIONS"];

/// Which direction a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Request,
    Response,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tag::Request => "REQ",
            Tag::Response => "RSP",
        })
    }
}

/// Declared content length, falling back to the parsed body size when the
/// declaration is absent (chunked transfer).
pub(crate) fn effective_content_length(msg: &impl HttpMessage) -> i64 {
    if msg.content_length() >= 0 {
        msg.content_length()
    } else {
        msg.body().len() as i64
    }
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Renders the records of one connection.
pub struct RecordFormatter<'a> {
    key: ConnKey,
    policy: &'a Policy,
}

impl<'a> RecordFormatter<'a> {
    pub fn new(key: ConnKey, policy: &'a Policy) -> Self {
        RecordFormatter { key, policy }
    }

    fn record_header(&self, tag: Tag, seq: i32, ts: DateTime<Utc>) -> String {
        format!("\n### #{} {} {} {}\r\n", seq, tag, self.key, rfc3339(ts))
    }

    /// End-of-stream sentinel.
    pub fn eof(&self, tag: Tag, seq: i32, ts: DateTime<Utc>) -> String {
        format!("\n### EOF#{} {} {} {}", seq, tag, self.key, rfc3339(ts))
    }

    /// Parse-error sentinel.
    pub fn error(
        &self,
        tag: Tag,
        seq: i32,
        ts: DateTime<Utc>,
        err: &dyn std::error::Error,
    ) -> String {
        format!(
            "\n### ERR#{} {} {} {}, error: {}",
            seq,
            tag,
            self.key,
            rfc3339(ts),
            err
        )
    }

    /// Renders a request record in the configured text shape.
    pub fn request_text(&self, r: &HttpRequest, ts: DateTime<Utc>, seq: i32) -> String {
        let mut b = self.record_header(Tag::Request, seq, ts);
        let policy = self.policy;

        if policy.level == Level::Url {
            let _ = write!(b, "{} {}{}\r\n", r.method, r.host(), r.uri);
            return b;
        }

        if policy.curl {
            curl::write_curl_request(&mut b, &self.key.dst.to_string(), policy, r, seq, ts);
            return b;
        }

        let _ = write!(b, "{} {} {}\r\n", r.method, r.uri, r.version);
        let effective = effective_content_length(r);
        let mut headers = r.headers.clone();
        headers.set("Content-Length", &effective.to_string());
        for line in headers.raw_lines() {
            b.push_str(&line);
            b.push_str("\r\n");
        }
        b.push_str("\r\n");

        let has_body = effective != 0
            && !BODILESS_METHODS
                .iter()
                .any(|m| m.eq_ignore_ascii_case(&r.method));
        self.finish_message(&mut b, has_body, Tag::Request, r, ts, seq);
        b
    }

    /// Renders a response record in the configured text shape.
    pub fn response_text(&self, r: &HttpResponse, ts: DateTime<Utc>, seq: i32) -> String {
        let mut b = self.record_header(Tag::Response, seq, ts);
        let policy = self.policy;

        let _ = write!(b, "{}\r\n", r.status_line());
        if policy.level == Level::Url {
            return b;
        }

        for line in r.headers.raw_lines() {
            b.push_str(&line);
            b.push_str("\r\n");
        }
        b.push_str("\r\n");

        let effective = effective_content_length(r);
        let has_body = effective > 0 && r.status_code != 304 && r.status_code != 204;
        self.finish_message(&mut b, has_body, Tag::Response, r, ts, seq);
        b
    }

    /// Common tail: dump, header-level annotation, or inline body.
    fn finish_message(
        &self,
        b: &mut String,
        has_body: bool,
        tag: Tag,
        msg: &impl HttpMessage,
        ts: DateTime<Utc>,
        seq: i32,
    ) {
        let policy = self.policy;
        if has_body && policy.can_dump() {
            let path = dump::body_file_name(&policy.dump_body, seq, tag, ts);
            match dump::dump_body(&path, msg.body(), policy) {
                Err(err) => {
                    let _ = write!(b, "dump to file failed: {}\r\n", err);
                }
                Ok(n) if n > 0 => {
                    let _ = write!(b, "\n// dump body to file: {} size: {}\r\n", path, n);
                }
                Ok(_) => {}
            }
            return;
        }

        if policy.level == Level::Header {
            if has_body {
                let _ = write!(
                    b,
                    "\n// body size: {}, set [level = all] to display http body\r\n",
                    msg.body().len()
                );
            }
            return;
        }

        if has_body {
            self.write_body(b, msg.headers(), msg.body());
        }
    }

    /// Writes a decompressed, charset-decoded text body, or a placeholder for
    /// binary and unknown content.
    fn write_body(&self, b: &mut String, headers: &Headers, body: &[u8]) {
        let (body, _) = decompress_body(headers, body);
        let content_type = headers.get("Content-Type").unwrap_or_default();
        let (mime_str, charset) = mime::parse_content_type(content_type);
        let mt = mime::parse_mime_type(&mime_str);

        if !mt.is_text() {
            if self.policy.force && !mt.is_binary() {
                b.push_str(&String::from_utf8_lossy(&body));
                b.push_str("\r\n");
            } else {
                let _ = write!(
                    b,
                    "{{Non-text body, content-type: {}, len: {}}}\r\n",
                    content_type,
                    body.len()
                );
            }
            return;
        }

        let text = if charset.is_empty() {
            String::from_utf8_lossy(&body).into_owned()
        } else {
            match mime::read_with_charset(&body, &charset) {
                Ok(text) => text,
                Err(err) => {
                    let _ = write!(b, "{{Read body failed {}}}\r\n", err);
                    return;
                }
            }
        };

        if mt.sub_type == "json" || mime::like_json(&text) {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
                if let Ok(pretty) = serde_json::to_string_pretty(&value) {
                    b.push_str(&pretty);
                    b.push_str("\r\n");
                    return;
                }
            }
        }
        b.push_str(&text);
        b.push_str("\r\n");
    }

    /// Renders a request as a one-line JSON record.
    pub fn request_json(&self, r: &HttpRequest, ts: DateTime<Utc>, seq: i32) -> String {
        let record = json::RequestRecord {
            seq,
            src: self.key.src.to_string(),
            dest: self.key.dst.to_string(),
            timestamp: rfc3339(ts),
            method: &r.method,
            uri: &r.uri,
            host: r.host(),
            header: &r.headers,
            body: read_text_body(&r.headers, &r.body, MAX_JSON_BODY),
        };
        let mut line = serde_json::to_string(&record).unwrap_or_default();
        line.push('\n');
        line
    }

    /// Renders a response as a one-line JSON record.
    pub fn response_json(&self, r: &HttpResponse, ts: DateTime<Utc>, seq: i32) -> String {
        let record = json::ResponseRecord {
            seq,
            src: self.key.src.to_string(),
            dest: self.key.dst.to_string(),
            timestamp: rfc3339(ts),
            status_code: r.status_code,
            status: r.status_line(),
            header: &r.headers,
            body: read_text_body(&r.headers, &r.body, MAX_JSON_BODY),
        };
        let mut line = serde_json::to_string(&record).unwrap_or_default();
        line.push('\n');
        line
    }
}

/// Body text for embedding in JSON records: decompressed, charset-decoded,
/// capped at `limit`; binary content collapses to a placeholder.
pub fn read_text_body(headers: &Headers, body: &[u8], limit: usize) -> String {
    let (body, _) = decompress_body(headers, body);
    let content_type = headers.get("Content-Type").unwrap_or_default();
    let (mime_str, charset) = mime::parse_content_type(content_type);
    let mt = mime::parse_mime_type(&mime_str);
    if !content_type.is_empty() && !mt.is_text() {
        return "(binary)".to_owned();
    }

    let text = if charset.is_empty() {
        String::from_utf8_lossy(&body).into_owned()
    } else {
        match mime::read_with_charset(&body, &charset) {
            Ok(text) => text,
            Err(_) => return "(failed)".to_owned(),
        }
    };
    if limit > 0 && text.len() > limit {
        text.chars().take(limit).collect()
    } else {
        text
    }
}
