//! Per-connection HTTP workers.
//!
//! Two engines share this module. The default fast engine gives each captured
//! direction its own worker thread: it accumulates released segment payloads,
//! resets its buffer when a new message title appears, and once the framing
//! detector reports a complete message, parses, filters, renders, and forwards
//! it to the sinks. The [`pair`] engine instead runs one worker per connection
//! and alternates request/response reads to correlate exchanges. Both produce
//! identical record content.

pub mod pair;

use crate::conntrack::conn::stream::StreamReader;
use crate::conntrack::conn::{ConnDuplex, ConnTimestamps};
use crate::conntrack::conn_id::ConnKey;
use crate::conntrack::ConnectionHandler;
use crate::filter::Policy;
use crate::format::{RecordFormatter, Tag};
use crate::protocols::stream::http::parser::{parse_request, parse_response};
use crate::protocols::stream::http::{framing, HttpRequest, HttpResponse};
use crate::sink::{Senders, Sink};

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Monotonic record counter shared across connection workers.
#[derive(Debug, Default)]
pub struct Counter(AtomicI32);

impl Counter {
    pub fn incr(&self) -> i32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> i32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Pulls complete framed messages out of one direction's released segments.
///
/// A fresh message title resets the accumulation buffer; once the framing
/// detector reports a full message the buffer is yielded. At stream end any
/// residue is yielded once for a best-effort parse.
pub(crate) struct MessageScanner<'a> {
    reader: &'a StreamReader,
    is_title: fn(&[u8]) -> bool,
    buf: Vec<u8>,
    done: bool,
}

impl<'a> MessageScanner<'a> {
    pub(crate) fn requests(reader: &'a StreamReader) -> Self {
        MessageScanner {
            reader,
            is_title: |payload| framing::request_title(payload).is_some(),
            buf: Vec::new(),
            done: false,
        }
    }

    pub(crate) fn responses(reader: &'a StreamReader) -> Self {
        MessageScanner {
            reader,
            is_title: |payload| framing::response_title(payload).is_some(),
            buf: Vec::new(),
            done: false,
        }
    }

    pub(crate) fn next_message(&mut self) -> Option<Vec<u8>> {
        if self.done {
            return None;
        }
        while let Some(segment) = self.reader.next_segment() {
            if (self.is_title)(&segment.payload) {
                self.buf.clear();
            }
            self.buf.extend_from_slice(&segment.payload);
            if !self.buf.is_empty() && framing::has_full_message(&self.buf) {
                return Some(std::mem::take(&mut self.buf));
            }
        }
        self.done = true;
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }
}

/// Spawns and tracks the per-direction workers of every connection.
pub struct HttpConnectionHandler {
    policy: Arc<Policy>,
    sender: Arc<Senders>,
    req_counter: Arc<Counter>,
    rsp_counter: Arc<Counter>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl HttpConnectionHandler {
    pub fn new(policy: Arc<Policy>, sender: Arc<Senders>) -> Self {
        HttpConnectionHandler {
            policy,
            sender,
            req_counter: Arc::new(Counter::default()),
            rsp_counter: Arc::new(Counter::default()),
            workers: Mutex::new(Vec::new()),
        }
    }
}

impl ConnectionHandler for HttpConnectionHandler {
    fn handle(&self, key: ConnKey, duplex: ConnDuplex) {
        let mut workers = self.workers.lock().unwrap();

        let ctx = WorkerCtx {
            key,
            times: Arc::clone(&duplex.times),
            policy: Arc::clone(&self.policy),
            sender: Arc::clone(&self.sender),
            counter: Arc::clone(&self.req_counter),
        };
        let request = duplex.request;
        let worker = std::thread::Builder::new()
            .name("conn-req".to_owned())
            .spawn(move || handle_request(request, ctx))
            .expect("spawn request worker");
        workers.push(worker);

        if let Some(response) = duplex.response {
            let ctx = WorkerCtx {
                key,
                times: duplex.times,
                policy: Arc::clone(&self.policy),
                sender: Arc::clone(&self.sender),
                counter: Arc::clone(&self.rsp_counter),
            };
            let worker = std::thread::Builder::new()
                .name("conn-rsp".to_owned())
                .spawn(move || handle_response(response, ctx))
                .expect("spawn response worker");
            workers.push(worker);
        }
    }

    fn finish(&self) {
        let workers: Vec<JoinHandle<()>> = self.workers.lock().unwrap().drain(..).collect();
        for worker in workers {
            let _ = worker.join();
        }
    }
}

struct WorkerCtx {
    key: ConnKey,
    times: Arc<ConnTimestamps>,
    policy: Arc<Policy>,
    sender: Arc<Senders>,
    counter: Arc<Counter>,
}

fn handle_request(reader: StreamReader, ctx: WorkerCtx) {
    let policy = Arc::clone(&ctx.policy);
    let formatter = RecordFormatter::new(ctx.key, &policy);

    let mut buf: Vec<u8> = Vec::new();
    let mut method: Option<&'static str> = None;

    while let Some(segment) = reader.next_segment() {
        // a fresh request title starts the next message
        if let Some(m) = framing::request_title(&segment.payload) {
            buf.clear();
            method = Some(m);
        }
        buf.extend_from_slice(&segment.payload);

        if !buf.is_empty()
            && method.map_or(true, |m| policy.permits_method(m))
            && framing::has_full_message(&buf)
            && policy.allow()
        {
            deal_request(&buf, &ctx, &formatter);
            buf.clear();
        }
        if policy.reached_quota() {
            return;
        }
    }

    // best-effort parse of whatever is left at stream end
    if !buf.is_empty() && method.map_or(true, |m| policy.permits_method(m)) && policy.allow() {
        deal_request(&buf, &ctx, &formatter);
    }
    emit_eof(Tag::Request, ctx.times.last_request(), &ctx, &formatter);
}

fn handle_response(reader: StreamReader, ctx: WorkerCtx) {
    let policy = Arc::clone(&ctx.policy);
    let formatter = RecordFormatter::new(ctx.key, &policy);

    let mut buf: Vec<u8> = Vec::new();
    // stays 0 until a valid response title is seen, so a configured status
    // filter also suppresses unrecognized interleaved data
    let mut last_code: i32 = 0;

    while let Some(segment) = reader.next_segment() {
        if let Some(code) = framing::response_title(&segment.payload) {
            buf.clear();
            last_code = code as i32;
        }
        buf.extend_from_slice(&segment.payload);

        if !buf.is_empty()
            && policy.permits_code(last_code)
            && framing::has_full_message(&buf)
            && policy.allow()
        {
            deal_response(&buf, &ctx, &formatter);
            buf.clear();
        }
        if policy.reached_quota() {
            return;
        }
    }

    if !buf.is_empty() && policy.permits_code(last_code) && policy.allow() {
        deal_response(&buf, &ctx, &formatter);
    }
    emit_eof(Tag::Response, ctx.times.last_response(), &ctx, &formatter);
}

fn deal_request(buf: &[u8], ctx: &WorkerCtx, formatter: &RecordFormatter) {
    match parse_request(buf) {
        Ok(request) => process_request(&request, ctx, formatter),
        Err(err) => emit_error(Tag::Request, &err, ctx.times.last_request(), ctx, formatter),
    }
}

fn deal_response(buf: &[u8], ctx: &WorkerCtx, formatter: &RecordFormatter) {
    match parse_response(buf) {
        Ok(response) => process_response(&response, ctx, formatter),
        Err(err) => emit_error(Tag::Response, &err, ctx.times.last_response(), ctx, formatter),
    }
}

fn process_request(request: &HttpRequest, ctx: &WorkerCtx, formatter: &RecordFormatter) {
    let seq = ctx.counter.incr();
    if !ctx.policy.permits_request(request.host(), &request.uri) {
        return;
    }
    let ts = ctx.times.last_request();
    let record = if ctx.policy.json {
        formatter.request_json(request, ts, seq)
    } else {
        formatter.request_text(request, ts, seq)
    };
    ctx.sender.send(&record, true);
}

fn process_response(response: &HttpResponse, ctx: &WorkerCtx, formatter: &RecordFormatter) {
    let seq = ctx.counter.incr();
    if !ctx.policy.permit_ratio() {
        return;
    }
    let ts = ctx.times.last_response();
    let record = if ctx.policy.json {
        formatter.response_json(response, ts, seq)
    } else {
        formatter.response_text(response, ts, seq)
    };
    ctx.sender.send(&record, true);
}

fn emit_eof(
    tag: Tag,
    ts: chrono::DateTime<chrono::Utc>,
    ctx: &WorkerCtx,
    formatter: &RecordFormatter,
) {
    if ctx.policy.json || !ctx.policy.eof {
        return;
    }
    let record = formatter.eof(tag, ctx.counter.get(), ts);
    ctx.sender.send(&record, false);
}

fn emit_error(
    tag: Tag,
    err: &dyn std::error::Error,
    ts: chrono::DateTime<chrono::Utc>,
    ctx: &WorkerCtx,
    formatter: &RecordFormatter,
) {
    if ctx.policy.json {
        return;
    }
    log::error!("error parsing HTTP {}: {}", tag, err);
    let record = formatter.error(tag, ctx.counter.get(), ts, err);
    ctx.sender.send(&record, false);
}
