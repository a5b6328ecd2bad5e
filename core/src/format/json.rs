//! JSON record shapes, one object per message.

use crate::protocols::stream::http::Headers;

use serde::Serialize;

/// JSON record for a request.
#[derive(Debug, Serialize)]
pub struct RequestRecord<'a> {
    pub seq: i32,
    pub src: String,
    pub dest: String,
    pub timestamp: String,
    pub method: &'a str,
    pub uri: &'a str,
    pub host: &'a str,
    pub header: &'a Headers,
    pub body: String,
}

/// JSON record for a response.
#[derive(Debug, Serialize)]
pub struct ResponseRecord<'a> {
    pub seq: i32,
    pub src: String,
    pub dest: String,
    pub timestamp: String,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub status: String,
    pub header: &'a Headers,
    pub body: String,
}
