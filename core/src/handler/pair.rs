//! Pair-mode engine: one worker per connection, alternating request and
//! response reads so each exchange is emitted back to back.
//!
//! Record content matches the fast engine; the difference is correlation.
//! Pair mode also follows `Expect: 100-continue` interim responses and stops
//! at a completed WebSocket upgrade handshake.

use crate::conntrack::conn::stream::StreamReader;
use crate::conntrack::conn::{ConnDuplex, ConnTimestamps};
use crate::conntrack::conn_id::ConnKey;
use crate::conntrack::ConnectionHandler;
use crate::filter::Policy;
use crate::format::{RecordFormatter, Tag};
use crate::handler::{Counter, MessageScanner};
use crate::protocols::stream::http::parser::{parse_request, parse_response};
use crate::protocols::stream::http::{HttpRequest, HttpResponse};
use crate::sink::{Senders, Sink};

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Spawns one correlating worker per connection.
pub struct PairConnectionHandler {
    policy: Arc<Policy>,
    sender: Arc<Senders>,
    req_counter: Arc<Counter>,
    rsp_counter: Arc<Counter>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PairConnectionHandler {
    pub fn new(policy: Arc<Policy>, sender: Arc<Senders>) -> Self {
        PairConnectionHandler {
            policy,
            sender,
            req_counter: Arc::new(Counter::default()),
            rsp_counter: Arc::new(Counter::default()),
            workers: Mutex::new(Vec::new()),
        }
    }
}

impl ConnectionHandler for PairConnectionHandler {
    fn handle(&self, key: ConnKey, duplex: ConnDuplex) {
        let worker = PairWorker {
            key,
            policy: Arc::clone(&self.policy),
            sender: Arc::clone(&self.sender),
            req_counter: Arc::clone(&self.req_counter),
            rsp_counter: Arc::clone(&self.rsp_counter),
        };
        let handle = std::thread::Builder::new()
            .name("conn-pair".to_owned())
            .spawn(move || worker.run(duplex))
            .expect("spawn pair worker");
        self.workers.lock().unwrap().push(handle);
    }

    fn finish(&self) {
        let workers: Vec<JoinHandle<()>> = self.workers.lock().unwrap().drain(..).collect();
        for worker in workers {
            let _ = worker.join();
        }
    }
}

struct PairWorker {
    key: ConnKey,
    policy: Arc<Policy>,
    sender: Arc<Senders>,
    req_counter: Arc<Counter>,
    rsp_counter: Arc<Counter>,
}

impl PairWorker {
    fn run(&self, duplex: ConnDuplex) {
        let ConnDuplex {
            request: request_reader,
            response: response_reader,
            times,
        } = duplex;
        let policy = Arc::clone(&self.policy);
        let formatter = RecordFormatter::new(self.key, &policy);
        let mut requests = MessageScanner::requests(&request_reader);
        let response_reader: Option<StreamReader> = response_reader;
        let mut responses = response_reader.as_ref().map(MessageScanner::responses);

        loop {
            let req_buf = match requests.next_message() {
                Some(buf) => buf,
                None => break,
            };
            let request = match parse_request(&req_buf) {
                Ok(request) => request,
                Err(err) => {
                    log::error!("error parsing HTTP REQ: {}", err);
                    if !policy.json {
                        let record = formatter.error(
                            Tag::Request,
                            self.req_counter.get(),
                            times.last_request(),
                            &err,
                        );
                        self.sender.send(&record, false);
                    }
                    break;
                }
            };

            let mut filtered = !policy.permits_host(request.host())
                || !policy.permits_uri(&request.uri)
                || !policy.permits_method(&request.method);

            let websocket = request
                .headers
                .get("Upgrade")
                .map(|v| v.eq_ignore_ascii_case("websocket"))
                .unwrap_or(false);
            let expect_continue = request
                .headers
                .get("Expect")
                .map(|v| v.eq_ignore_ascii_case("100-continue"))
                .unwrap_or(false);

            let rsp_buf = responses.as_mut().and_then(|scanner| scanner.next_message());
            let response = match rsp_buf {
                Some(buf) => match parse_response(&buf) {
                    Ok(response) => response,
                    Err(err) => {
                        log::error!("error parsing HTTP RSP: {}", err);
                        // emit the lone request, then give up on the stream
                        if !filtered {
                            self.emit_request(&request, &times, &formatter);
                        }
                        break;
                    }
                },
                None => {
                    if !filtered {
                        self.emit_request(&request, &times, &formatter);
                    }
                    // response side disabled or drained
                    if responses.is_none() {
                        if self.policy.reached_quota() {
                            return;
                        }
                        continue;
                    }
                    break;
                }
            };

            filtered = filtered || !policy.permits_code(response.status_code as i32);

            if !filtered && policy.allow() {
                self.emit_request(&request, &times, &formatter);
                self.emit_response(&response, &times, &formatter);
            }

            if websocket
                && response.status_code == 101
                && response
                    .headers
                    .get("Upgrade")
                    .map(|v| v.eq_ignore_ascii_case("websocket"))
                    .unwrap_or(false)
            {
                // upgraded; frames past the handshake are not HTTP
                break;
            }

            if expect_continue && response.status_code == 100 {
                // the interim response was emitted; read the real one
                match responses
                    .as_mut()
                    .and_then(|scanner| scanner.next_message())
                {
                    Some(buf) => match parse_response(&buf) {
                        Ok(real) => {
                            if !filtered && policy.allow() {
                                self.emit_response(&real, &times, &formatter);
                            }
                        }
                        Err(err) => {
                            log::error!("error parsing HTTP RSP: {}", err);
                            break;
                        }
                    },
                    None => break,
                }
            }

            if self.policy.reached_quota() {
                return;
            }
        }

        if !policy.json && policy.eof {
            let record = formatter.eof(Tag::Request, self.req_counter.get(), times.last_request());
            self.sender.send(&record, false);
            if response_reader.is_some() {
                let record =
                    formatter.eof(Tag::Response, self.rsp_counter.get(), times.last_response());
                self.sender.send(&record, false);
            }
        }
    }

    fn emit_request(
        &self,
        request: &HttpRequest,
        times: &ConnTimestamps,
        formatter: &RecordFormatter,
    ) {
        let seq = self.req_counter.incr();
        if !self.policy.permits_request(request.host(), &request.uri) {
            return;
        }
        let ts = times.last_request();
        let record = if self.policy.json {
            formatter.request_json(request, ts, seq)
        } else {
            formatter.request_text(request, ts, seq)
        };
        self.sender.send(&record, true);
    }

    fn emit_response(
        &self,
        response: &HttpResponse,
        times: &ConnTimestamps,
        formatter: &RecordFormatter,
    ) {
        let seq = self.rsp_counter.incr();
        let ts = times.last_response();
        let record = if self.policy.json {
            formatter.response_json(response, ts, seq)
        } else {
            formatter.response_text(response, ts, seq)
        };
        self.sender.send(&record, true);
    }
}
