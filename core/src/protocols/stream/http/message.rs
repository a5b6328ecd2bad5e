//! Parsed HTTP message components.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Header fields in wire order with case-insensitive lookup.
#[derive(Debug, Default, Clone)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn push(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_owned(), value.to_owned()));
    }

    /// Returns the first value of `name`, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// All fields in the order they appeared on the wire.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Header lines rendered `Name: value`, in wire order.
    pub fn raw_lines(&self) -> impl Iterator<Item = String> + '_ {
        self.entries.iter().map(|(n, v)| format!("{}: {}", n, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replaces every value of `name` with a single entry, preserving the
    /// position of the first occurrence.
    pub fn set(&mut self, name: &str, value: &str) {
        let mut first = None;
        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].0.eq_ignore_ascii_case(name) {
                if first.is_none() {
                    first = Some(i);
                    self.entries[i].1 = value.to_owned();
                    i += 1;
                } else {
                    self.entries.remove(i);
                }
            } else {
                i += 1;
            }
        }
        if first.is_none() {
            self.push(name, value);
        }
    }
}

impl Serialize for Headers {
    /// Serializes as `{name: [values…]}`, grouping repeats under the
    /// first-seen name in wire order.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut names: Vec<&str> = Vec::new();
        for (name, _) in self.entries.iter() {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                names.push(name);
            }
        }
        let mut map = serializer.serialize_map(Some(names.len()))?;
        for name in names {
            let values: Vec<&str> = self
                .entries
                .iter()
                .filter(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
                .collect();
            map.serialize_entry(name, &values)?;
        }
        map.end()
    }
}

/// A parsed HTTP request.
#[derive(Debug, Default)]
pub struct HttpRequest {
    pub method: String,
    pub uri: String,
    pub version: String,
    pub headers: Headers,
    /// Declared body length; `-1` when unknown (e.g. chunked transfer).
    pub content_length: i64,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn host(&self) -> &str {
        self.headers.get("Host").unwrap_or_default()
    }
}

/// A parsed HTTP response.
#[derive(Debug, Default)]
pub struct HttpResponse {
    pub version: String,
    pub status_code: u16,
    pub reason: String,
    pub headers: Headers,
    /// Declared body length; `-1` when unknown (e.g. chunked transfer).
    pub content_length: i64,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn status_line(&self) -> String {
        if self.reason.is_empty() {
            format!("{} {}", self.version, self.status_code)
        } else {
            format!("{} {} {}", self.version, self.status_code, self.reason)
        }
    }
}

/// Accessors shared by requests and responses, used by the record formatter.
pub trait HttpMessage {
    fn start_line(&self) -> String;
    fn headers(&self) -> &Headers;
    fn content_length(&self) -> i64;
    fn body(&self) -> &[u8];
}

impl HttpMessage for HttpRequest {
    fn start_line(&self) -> String {
        format!("{} {} {}", self.method, self.uri, self.version)
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn content_length(&self) -> i64 {
        self.content_length
    }

    fn body(&self) -> &[u8] {
        &self.body
    }
}

impl HttpMessage for HttpResponse {
    fn start_line(&self) -> String {
        self.status_line()
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn content_length(&self) -> i64 {
        self.content_length
    }

    fn body(&self) -> &[u8] {
        &self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case_and_keeps_order() {
        let mut headers = Headers::default();
        headers.push("Host", "example.com");
        headers.push("Set-Cookie", "a=1");
        headers.push("set-cookie", "b=2");
        assert_eq!(headers.get("host"), Some("example.com"));
        assert_eq!(headers.get("Set-Cookie"), Some("a=1"));
        let lines: Vec<String> = headers.raw_lines().collect();
        assert_eq!(
            lines,
            vec!["Host: example.com", "Set-Cookie: a=1", "set-cookie: b=2"]
        );
    }

    #[test]
    fn set_collapses_repeats() {
        let mut headers = Headers::default();
        headers.push("Content-Length", "10");
        headers.push("content-length", "11");
        headers.set("Content-Length", "7");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("Content-Length"), Some("7"));
    }

    #[test]
    fn headers_serialize_grouped() {
        let mut headers = Headers::default();
        headers.push("Host", "h");
        headers.push("Accept", "a");
        headers.push("accept", "b");
        let json = serde_json::to_string(&headers).unwrap();
        assert_eq!(json, r#"{"Host":["h"],"Accept":["a","b"]}"#);
    }
}
