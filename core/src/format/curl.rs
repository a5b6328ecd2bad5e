//! Render a request as a runnable curl command.

use crate::filter::Policy;
use crate::format::{dump, effective_content_length, Tag, BODILESS_METHODS};
use crate::protocols::stream::http::parser::decompress_body;
use crate::protocols::stream::http::{HttpMessage, HttpRequest};

use chrono::{DateTime, Utc};

/// Hop-by-hop and framing headers never copied into a curl command.
const BLOCK_HEADERS: &[&str] = &[
    "Content-Length",
    "Transfer-Encoding",
    "Connection",
    "Accept-Encoding",
];

const BODY_EOF_MARK: &str = "HTTP_DUMP_BODY_EOF";

/// Appends a curl command for `r` to `out`, addressed to the record's
/// destination endpoint.
pub(crate) fn write_curl_request(
    out: &mut String,
    dst: &str,
    policy: &Policy,
    r: &HttpRequest,
    seq: i32,
    ts: DateTime<Utc>,
) {
    let (body, decompressed) = if policy.can_dump() {
        (r.body.clone(), false)
    } else {
        decompress_body(&r.headers, &r.body)
    };

    let mut lines: Vec<String> = Vec::new();
    lines.push(format!("curl -X {} http://{}{}", r.method, dst, r.uri));

    for (name, value) in r.headers.iter() {
        if BLOCK_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)) {
            continue;
        }
        if decompressed && name.eq_ignore_ascii_case("Content-Encoding") {
            continue;
        }
        lines.push(format!("    -H '{}: {}'", name, value));
    }

    let has_body = effective_content_length(r) != 0
        && !BODILESS_METHODS
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&r.method));
    if !has_body {
        out.push_str(&lines.join(" \\\n"));
        out.push_str("\r\n");
        return;
    }

    if policy.can_dump() {
        let path = dump::body_file_name(&policy.dump_body, seq, Tag::Request, ts);
        match dump::dump_body(&path, &body, policy) {
            Err(err) => lines.push(format!("    # dump to file failed: {}", err)),
            Ok(n) if n > 0 => lines.push(format!("    -d '@{}'", path)),
            Ok(_) => {}
        }
        out.push_str(&lines.join(" \\\n"));
        out.push_str("\r\n");
        return;
    }

    let text = String::from_utf8_lossy(&body);
    if !text.contains('\n') && !text.contains('\'') {
        lines.push(format!("    -d '{}'", text));
        out.push_str(&lines.join(" \\\n"));
        out.push_str("\r\n");
    } else {
        lines.push(format!("    -d @- << {}", BODY_EOF_MARK));
        out.push_str(&lines.join(" \\\n"));
        out.push('\n');
        out.push_str(&text);
        if !text.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(BODY_EOF_MARK);
        out.push_str("\r\n");
    }
}
