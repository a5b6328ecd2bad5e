//! Server-sent events broadcast of captured transactions.
//!
//! Serves an embedded index page at the configured context path and a
//! `text/event-stream` of per-record JSON events at `/sse`. The hyper server
//! runs on a dedicated thread with a current-thread tokio runtime.

use crate::sink::Sink;

use std::convert::Infallible;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use hyper::body::{Bytes, Sender as BodySender};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;

const INDEX_HTML: &str = include_str!("web/index.html");

/// Summary of one record, pushed to every connected browser.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpEvent {
    pub eof: bool,
    pub req: bool,
    pub rsp: bool,
    pub seq: i64,
    /// Like `192.168.0.1:53933-192.168.0.2:9090`.
    pub connection: String,
    pub method: String,
    pub host: String,
    pub path: String,
    pub content_type: String,
    pub status: i64,
    pub timestamp: String,
    pub payload: String,
    pub req_size: usize,
    pub rsp_size: usize,
}

/// Builds an event from one text record by scanning its header and the few
/// interesting message lines.
pub fn parse_http_event(msg: &str) -> HttpEvent {
    let mut event = HttpEvent {
        payload: msg.to_owned(),
        ..Default::default()
    };

    let mut lines = msg.lines().filter(|l| !l.is_empty());
    while let Some(line) = lines.next() {
        if let Some(header) = line.strip_prefix("### ") {
            let fields: Vec<&str> = header.split_whitespace().collect();
            let seq_field = fields.first().copied().unwrap_or_default();
            let tag = fields.get(1).copied().unwrap_or_default();
            event.connection = fields.get(2).unwrap_or(&"").to_string();
            event.timestamp = fields.get(3).unwrap_or(&"").to_string();
            event.req = tag == "REQ";
            event.rsp = tag == "RSP";

            if let Some(seq) = seq_field.strip_prefix("EOF#") {
                event.eof = true;
                event.seq = seq.parse().unwrap_or(0);
                break;
            }
            if let Some(seq) = seq_field.strip_prefix('#') {
                event.seq = seq.parse().unwrap_or(0);
            }

            match tag {
                "REQ" => {
                    event.req_size = msg.len();
                    if let Some(title) = lines.next() {
                        let mut parts = title.split(' ');
                        event.method = parts.next().unwrap_or_default().to_owned();
                        event.path = parts.next().unwrap_or_default().to_owned();
                    }
                }
                "RSP" => {
                    event.rsp_size = msg.len();
                    if let Some(title) = lines.next() {
                        event.status = title
                            .split(' ')
                            .nth(1)
                            .and_then(|s| s.parse().ok())
                            .unwrap_or(0);
                    }
                }
                _ => {}
            }
            continue;
        }

        if let Some(host) = line.strip_prefix("Host:") {
            event.host = host.trim().to_owned();
        } else if event.rsp {
            if let Some(ct) = line.strip_prefix("Content-Type:") {
                event.content_type = ct.trim().to_owned();
            }
        }
    }

    event
}

/// Fan-out of event-stream bodies to connected clients.
#[derive(Default)]
pub struct SseStream {
    clients: Mutex<Vec<BodySender>>,
}

impl SseStream {
    pub fn new() -> Arc<Self> {
        Arc::new(SseStream::default())
    }

    fn subscribe(&self) -> Body {
        let (tx, body) = Body::channel();
        self.clients.lock().unwrap().push(tx);
        body
    }

    /// Sends one `data:` frame to every client, dropping the ones that went
    /// away.
    pub fn broadcast(&self, data: &str) {
        let frame = format!("data: {}\n\n", data);
        let mut clients = self.clients.lock().unwrap();
        clients.retain_mut(|client| {
            client
                .try_send_data(Bytes::from(frame.clone()))
                .is_ok()
        });
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    fn shutdown(&self) {
        self.clients.lock().unwrap().clear();
    }
}

/// A sink that broadcasts each record as an SSE event.
pub struct SseSink {
    stream: Arc<SseStream>,
}

impl SseSink {
    pub fn new(stream: Arc<SseStream>) -> Self {
        SseSink { stream }
    }
}

impl Sink for SseSink {
    fn send(&self, msg: &str, _count_discards: bool) {
        let event = parse_http_event(msg);
        match serde_json::to_string(&event) {
            Ok(json) => self.stream.broadcast(&json),
            Err(err) => log::warn!("sse event encode failed: {}", err),
        }
    }

    fn close(&self) {
        self.stream.shutdown();
    }
}

async fn serve_req(
    req: Request<Body>,
    stream: Arc<SseStream>,
    context_path: String,
) -> Result<Response<Body>, Infallible> {
    let path = req.uri().path();
    let rel = path
        .strip_prefix(context_path.as_str())
        .unwrap_or(path)
        .trim_start_matches('/');

    if req.method() != Method::GET {
        return Ok(Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .body(Body::empty())
            .unwrap());
    }

    let response = match rel {
        "" | "index.html" => Response::builder()
            .header("Content-Type", "text/html; charset=utf-8")
            .body(Body::from(INDEX_HTML))
            .unwrap(),
        "sse" => Response::builder()
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Headers", "Content-Type")
            .header("Content-Type", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .header("Connection", "keep-alive")
            .body(stream.subscribe())
            .unwrap(),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .unwrap(),
    };
    Ok(response)
}

/// Starts the web server on `port` (0 picks a free port) and returns the bound
/// port. The server thread runs until the process exits.
pub fn serve(stream: Arc<SseStream>, port: u16, context_path: &str) -> Result<u16> {
    let listener =
        TcpListener::bind(("0.0.0.0", port)).with_context(|| format!("bind web port {}", port))?;
    listener
        .set_nonblocking(true)
        .context("set web listener nonblocking")?;
    let bound = listener.local_addr()?.port();
    let context_path = normalize_context(context_path);
    log::info!("web ui listening on :{} at {}", bound, context_path);

    std::thread::Builder::new()
        .name("sse-web".to_owned())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("build web runtime");
            runtime.block_on(async move {
                let make_svc = make_service_fn(move |_| {
                    let stream = Arc::clone(&stream);
                    let context_path = context_path.clone();
                    async move {
                        Ok::<_, Infallible>(service_fn(move |req| {
                            serve_req(req, Arc::clone(&stream), context_path.clone())
                        }))
                    }
                });
                let server = Server::from_tcp(listener)
                    .expect("hyper from_tcp")
                    .serve(make_svc);
                if let Err(err) = server.await {
                    log::error!("web server failed: {}", err);
                }
            });
        })
        .context("spawn web server thread")?;
    Ok(bound)
}

fn normalize_context(context_path: &str) -> String {
    let trimmed = context_path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_event() {
        let msg = "\n### #1 REQ 127.0.0.1:54386-127.0.0.1:5003 2022-04-17T10:58:09.505447Z\r\n\
                   GET /api/x HTTP/1.1\r\nHost: api.local\r\n\r\n";
        let event = parse_http_event(msg);
        assert!(event.req);
        assert!(!event.rsp);
        assert!(!event.eof);
        assert_eq!(event.seq, 1);
        assert_eq!(event.connection, "127.0.0.1:54386-127.0.0.1:5003");
        assert_eq!(event.method, "GET");
        assert_eq!(event.path, "/api/x");
        assert_eq!(event.host, "api.local");
    }

    #[test]
    fn parses_response_and_eof_events() {
        let rsp = "\n### #2 RSP 127.0.0.1:54386-127.0.0.1:5003 t\r\n\
                   HTTP/1.1 404 Not Found\r\nContent-Type: text/html\r\n\r\n";
        let event = parse_http_event(rsp);
        assert!(event.rsp);
        assert_eq!(event.status, 404);
        assert_eq!(event.content_type, "text/html");

        let eof = "\n### EOF#2 REQ 127.0.0.1:54386-127.0.0.1:5003 t";
        let event = parse_http_event(eof);
        assert!(event.eof);
        assert!(event.req);
        assert_eq!(event.seq, 2);
    }

    #[test]
    fn context_normalization() {
        assert_eq!(normalize_context(""), "");
        assert_eq!(normalize_context("/"), "");
        assert_eq!(normalize_context("dump"), "/dump");
        assert_eq!(normalize_context("/dump/"), "/dump");
    }
}
