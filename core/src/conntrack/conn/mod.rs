//! Per-connection state: two directional streams and HTTP classification.

pub mod stream;
pub(crate) mod window;

use crate::conntrack::conn_id::ConnKey;
use crate::conntrack::pdu::TcpSegment;
use crate::protocols::stream::http::framing;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use self::stream::{DirectionalStream, StreamReader};

/// Last-activity timestamps, shared between the assembler and the connection's
/// reader tasks as nanosecond atomics.
#[derive(Debug, Default)]
pub struct ConnTimestamps {
    last: AtomicI64,
    last_req: AtomicI64,
    last_rsp: AtomicI64,
}

impl ConnTimestamps {
    fn store(cell: &AtomicI64, ts: DateTime<Utc>) {
        cell.store(ts.timestamp_nanos_opt().unwrap_or(0), Ordering::Relaxed);
    }

    fn load(cell: &AtomicI64) -> DateTime<Utc> {
        Utc.timestamp_nanos(cell.load(Ordering::Relaxed))
    }

    pub fn last(&self) -> DateTime<Utc> {
        Self::load(&self.last)
    }

    pub fn last_request(&self) -> DateTime<Utc> {
        Self::load(&self.last_req)
    }

    pub fn last_response(&self) -> DateTime<Utc> {
        Self::load(&self.last_rsp)
    }
}

/// What a connection handler consumes: the reader side of both directions plus
/// the shared activity timestamps.
pub struct ConnDuplex {
    pub request: StreamReader,
    /// `None` when response capture is disabled.
    pub response: Option<StreamReader>,
    pub times: Arc<ConnTimestamps>,
}

/// State for one bidirectional TCP connection.
///
/// Mutated only by [`TcpConnection::on_receive`], which the assembler invokes
/// under the connection's own lock; the table lock is never held across it.
pub struct TcpConnection {
    key: ConnKey,
    /// The HTTP client endpoint, fixed by the first recognized payload.
    client: Option<SocketAddr>,
    is_http: bool,
    times: Arc<ConnTimestamps>,
    request_stream: DirectionalStream,
    response_stream: DirectionalStream,
}

impl TcpConnection {
    /// Creates connection state plus the duplex handed to its handler.
    pub(crate) fn new(key: ConnKey, chan_size: usize, parse_response: bool) -> (Self, ConnDuplex) {
        let (request_stream, request_reader) = DirectionalStream::new(chan_size);
        let times = Arc::new(ConnTimestamps::default());
        let (response_stream, response_reader) = if parse_response {
            let (s, r) = DirectionalStream::new(chan_size);
            (s, Some(r))
        } else {
            (DirectionalStream::null(), None)
        };
        let conn = TcpConnection {
            key,
            client: None,
            is_http: false,
            times: Arc::clone(&times),
            request_stream,
            response_stream,
        };
        let duplex = ConnDuplex {
            request: request_reader,
            response: response_reader,
            times,
        };
        (conn, duplex)
    }

    pub fn key(&self) -> ConnKey {
        self.key
    }

    pub fn last_timestamp(&self) -> DateTime<Utc> {
        self.times.last()
    }

    /// Handles one arriving segment sent by `src`.
    pub(crate) fn on_receive(&mut self, src: SocketAddr, dst: SocketAddr, segment: TcpSegment) {
        ConnTimestamps::store(&self.times.last, segment.ts);

        if !self.is_http {
            // fix the client side from the first recognizable payload
            if framing::request_title(&segment.payload).is_some() {
                self.client = Some(src);
                self.is_http = true;
            } else if framing::response_title(&segment.payload).is_some() {
                self.client = Some(dst);
                self.is_http = true;
            } else {
                return;
            }
        }

        let from_client = self.client == Some(src);
        if from_client {
            ConnTimestamps::store(&self.times.last_req, segment.ts);
        } else {
            ConnTimestamps::store(&self.times.last_rsp, segment.ts);
        }
        let (send, confirm) = if from_client {
            (&mut self.request_stream, &mut self.response_stream)
        } else {
            (&mut self.response_stream, &mut self.request_stream)
        };

        let has_ack = segment.has_ack();
        let ack = segment.ack;
        let terminal = segment.fin() || segment.rst();

        send.append_segment(segment);
        if has_ack {
            confirm.confirm(ack);
        }
        if terminal {
            send.set_closed(true);
        }
    }

    /// `true` once FIN/RST has been observed on both directions.
    pub(crate) fn closed(&self) -> bool {
        self.request_stream.is_closed() && self.response_stream.is_closed()
    }

    /// Marks both directions closed and wakes their readers; used on idle
    /// eviction.
    pub(crate) fn evict(&mut self) {
        self.request_stream.set_closed(true);
        self.response_stream.set_closed(true);
        self.finish();
    }

    /// Closes both segment channels, signaling end-of-stream to the readers.
    pub(crate) fn finish(&mut self) {
        self.request_stream.finish();
        self.response_stream.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::packet::tcp::{ACK, FIN};
    use std::net::SocketAddr;

    fn addrs() -> (SocketAddr, SocketAddr) {
        ("10.0.0.1:51000".parse().unwrap(), "10.0.0.2:80".parse().unwrap())
    }

    fn seg(seq: u32, ack: u32, flags: u8, payload: &[u8]) -> TcpSegment {
        TcpSegment {
            seq,
            ack,
            flags,
            payload: payload.to_vec(),
            ts: Utc::now(),
        }
    }

    #[test]
    fn request_title_fixes_client_side() {
        let (a, b) = addrs();
        let (mut conn, duplex) = TcpConnection::new(ConnKey { src: a, dst: b }, 16, true);

        conn.on_receive(a, b, seg(1, 1, ACK, b"GET / HTTP/1.1\r\nHost: h\r\n\r\n"));
        assert_eq!(conn.client, Some(a));
        assert!(conn.is_http);

        // the server ack releases the request bytes to the request reader
        conn.on_receive(b, a, seg(500, 29, ACK, b""));
        let released = duplex.request.next_segment().expect("request segment");
        assert!(released.payload.starts_with(b"GET /"));
    }

    #[test]
    fn response_title_fixes_client_as_receiver() {
        let (a, b) = addrs();
        let (mut conn, _duplex) = TcpConnection::new(ConnKey { src: b, dst: a }, 16, true);

        // first recognizable payload flows server -> client
        conn.on_receive(b, a, seg(1, 1, ACK, b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"));
        assert_eq!(conn.client, Some(a));
        assert!(conn.is_http);
    }

    #[test]
    fn unrecognized_payload_is_ignored() {
        let (a, b) = addrs();
        let (mut conn, _duplex) = TcpConnection::new(ConnKey { src: a, dst: b }, 16, true);

        conn.on_receive(a, b, seg(1, 1, ACK, b"\x16\x03\x01\x02\x00tls client hello"));
        assert!(!conn.is_http);
        assert_eq!(conn.client, None);
    }

    #[test]
    fn fin_on_both_sides_closes() {
        let (a, b) = addrs();
        let (mut conn, _duplex) = TcpConnection::new(ConnKey { src: a, dst: b }, 16, true);

        conn.on_receive(a, b, seg(1, 1, ACK, b"GET / HTTP/1.1\r\nHost: h\r\n\r\n"));
        assert!(!conn.closed());
        conn.on_receive(a, b, seg(29, 1, ACK | FIN, b""));
        assert!(!conn.closed());
        conn.on_receive(b, a, seg(1, 30, ACK | FIN, b""));
        assert!(conn.closed());
    }
}
