//! MIME classification and character set handling for body display.

use anyhow::{anyhow, Result};
use encoding_rs::Encoding;

/// A parsed `type/subtype` pair with the `x-`/`vnd.` scope stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeType {
    pub primary: String,
    pub sub_type: String,
    pub scope: String,
}

/// Parses a mime type string like `application/x-www-form-urlencoded`.
pub fn parse_mime_type(content_type: &str) -> MimeType {
    let (primary, rest) = match content_type.split_once('/') {
        Some((p, r)) => (p, r),
        // should not happen
        None => {
            return MimeType {
                primary: content_type.to_owned(),
                sub_type: String::new(),
                scope: String::new(),
            }
        }
    };
    let (scope, mut sub_type) = if let Some(stripped) = rest.strip_prefix("x-") {
        ("x", stripped)
    } else if let Some(stripped) = rest.strip_prefix("vnd.") {
        ("vnd", stripped)
    } else {
        ("", rest)
    };
    if let Some(i) = sub_type.find('.') {
        if i > 0 {
            sub_type = &sub_type[..i];
        }
    }
    MimeType {
        primary: primary.to_owned(),
        sub_type: sub_type.to_owned(),
        scope: scope.to_owned(),
    }
}

const TEXT_SUB_TYPES: &[&str] = &[
    "html",
    "xml",
    "json",
    "www-form-urlencoded",
    "javascript",
    "postscript",
    "atomcat+xml",
    "atomsvc+xml",
    "atom+xml",
    "xml-dtd",
    "ecmascript",
    "java-jnlp-file",
    "latex",
    "mpegurl",
    "rdf+xml",
    "rtf",
    "rss+xml",
    "svg+xml",
    "uri-list",
    "wsdl+xml",
    "xhtml+xml",
    "xslt+xml",
    "ns-proxy-autoconfig",
    "javascript-config",
];

const BINARY_PRIMARY_TYPES: &[&str] = &["image", "audio", "video"];

const BINARY_SUB_TYPES: &[&str] = &[
    "7z-compressed",
    "abiword",
    "ace-compressed",
    "shockwave-flash",
    "pdf",
    "director",
    "bzip",
    "bzip2",
    "debian-package",
    "epub+zip",
    "font-ghostscript",
    "font-bdf",
    "java-archive",
    "java-vm",
    "java-serialized-object",
    "msaccess",
    "msdownload",
    "ms-application",
    "ms-fontobject",
    "ms-excel",
    "openxmlformats-officedocument",
    "msbinder",
    "ms-officetheme",
    "onenote",
    "ms-powerpoint",
    "ms-project",
    "mspublisher",
    "msschedule",
    "silverlight-app",
    "visio",
    "ms-wmd",
    "ms-htmlhelp",
    "msword",
    "ms-works",
    "oda",
    "ogg",
    "oasis",
    "sun",
    "font-otf",
    "x-font-ttf",
    "unity",
    "zip",
    "x509-ca-cert",
    "octet-stream",
    "png",
    "ppt",
    "xls",
];

impl MimeType {
    /// Types rendered as text at the `all` output level.
    pub fn is_text(&self) -> bool {
        self.primary == "text" || TEXT_SUB_TYPES.contains(&self.sub_type.as_str())
    }

    /// Types never rendered, even with `force`.
    pub fn is_binary(&self) -> bool {
        BINARY_PRIMARY_TYPES.contains(&self.primary.as_str())
            || BINARY_SUB_TYPES.contains(&self.sub_type.as_str())
    }
}

/// Splits a `Content-Type` header into mime type and charset.
pub fn parse_content_type(content_type: &str) -> (String, String) {
    match content_type.split_once(';') {
        None => (content_type.trim().to_owned(), String::new()),
        Some((mime, params)) => {
            let charset = match params.trim().split_once('=') {
                Some((_, value)) => value.trim().to_owned(),
                None => String::new(),
            };
            (mime.trim().to_owned(), charset)
        }
    }
}

/// Decodes `data` from the named charset. `GBK`/`GB2312` are normalized to
/// `GB18030`; UTF-8 variants pass through.
pub fn read_with_charset(data: &[u8], charset: &str) -> Result<String> {
    let upper = charset.to_ascii_uppercase();
    if upper == "UTF-8" || upper == "UTF8" {
        return Ok(String::from_utf8_lossy(data).into_owned());
    }
    let label = if upper == "GBK" || upper == "GB2312" {
        "GB18030".to_owned()
    } else {
        upper
    };
    let encoding = Encoding::for_label(label.as_bytes())
        .ok_or_else(|| anyhow!("unknown charset {}", charset))?;
    let (decoded, _, _) = encoding.decode(data);
    Ok(decoded.into_owned())
}

/// Tells if a string "looks like" a JSON document.
pub fn like_json(s: &str) -> bool {
    let s = s.trim();
    if s.len() < 2 {
        return false;
    }
    let bytes = s.as_bytes();
    (bytes[0] == b'[' && bytes[s.len() - 1] == b']')
        || (bytes[0] == b'{' && bytes[s.len() - 1] == b'}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_text_and_binary() {
        assert!(parse_mime_type("text/plain").is_text());
        assert!(parse_mime_type("application/json").is_text());
        assert!(parse_mime_type("application/x-www-form-urlencoded").is_text());
        assert!(parse_mime_type("image/png").is_binary());
        assert!(parse_mime_type("application/octet-stream").is_binary());
        assert!(parse_mime_type("application/pdf").is_binary());
        let unknown = parse_mime_type("application/proto");
        assert!(!unknown.is_text());
        assert!(!unknown.is_binary());
    }

    #[test]
    fn strips_scope_prefixes() {
        let mt = parse_mime_type("application/vnd.ms-excel");
        assert_eq!(mt.scope, "vnd");
        assert_eq!(mt.sub_type, "ms-excel");
        assert!(mt.is_binary());
    }

    #[test]
    fn splits_content_type_and_charset() {
        let (mime, charset) = parse_content_type("text/html; charset=utf-8");
        assert_eq!(mime, "text/html");
        assert_eq!(charset, "utf-8");
        let (mime, charset) = parse_content_type("application/json");
        assert_eq!(mime, "application/json");
        assert_eq!(charset, "");
    }

    #[test]
    fn decodes_gbk_as_gb18030() {
        // "你好" in GBK
        let gbk = [0xc4, 0xe3, 0xba, 0xc3];
        assert_eq!(read_with_charset(&gbk, "GBK").unwrap(), "你好");
        assert_eq!(read_with_charset(&gbk, "GB2312").unwrap(), "你好");
    }

    #[test]
    fn json_heuristic() {
        assert!(like_json(r#"{"a": 1}"#));
        assert!(like_json("[1, 2]"));
        assert!(!like_json("plain text"));
        assert!(!like_json("{"));
    }
}
