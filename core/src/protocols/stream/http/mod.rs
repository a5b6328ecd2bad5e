//! HTTP/1.x message detection and parsing.
//!
//! [`framing`] decides where one message ends inside an accumulated byte
//! buffer; [`parser`] turns a framed buffer into a structured
//! [`HttpRequest`](message::HttpRequest) or
//! [`HttpResponse`](message::HttpResponse) via the
//! [httparse](https://docs.rs/httparse/latest/httparse/) crate.

pub mod framing;
pub mod message;
pub mod parser;
pub mod status;

pub use self::message::{Headers, HttpMessage, HttpRequest, HttpResponse};
pub use self::parser::HttpParseError;
