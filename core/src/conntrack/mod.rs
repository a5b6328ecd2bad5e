//! Connection state management.
//!
//! The assembler demultiplexes captured TCP segments into per-flow connection
//! state. Both directions of a flow share one table entry; the table lock
//! covers only lookup, insert, and delete, never per-segment processing.

pub mod conn;
pub mod conn_id;
pub mod pdu;

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use hashlink::LinkedHashMap;

use self::conn::{ConnDuplex, TcpConnection};
use self::conn_id::{ConnId, ConnKey};
use self::pdu::{L4Context, TcpSegment};
use crate::protocols::stream::http::framing;

/// Receives ownership of the reader side of each new connection.
///
/// `handle` is called once per connection, outside the table lock, before any
/// segment is released; `finish` blocks until all per-connection work drains.
pub trait ConnectionHandler: Send + Sync {
    fn handle(&self, key: ConnKey, duplex: ConnDuplex);
    fn finish(&self);
}

impl ConnectionHandler for Box<dyn ConnectionHandler> {
    fn handle(&self, key: ConnKey, duplex: ConnDuplex) {
        (**self).handle(key, duplex)
    }

    fn finish(&self) {
        (**self).finish()
    }
}

/// Configurable options for a [`TcpAssembler`].
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Capacity of each direction's released-segment channel.
    pub chan_size: usize,
    /// Whether the response direction is captured at all.
    pub parse_response: bool,
    /// Process only packets where either endpoint matches one of these IPs.
    pub filter_ip: Vec<IpAddr>,
    /// Process only packets where either endpoint matches one of these ports.
    pub filter_port: Vec<u16>,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        AssemblerConfig {
            chan_size: 10240,
            parse_response: true,
            filter_ip: Vec::new(),
            filter_port: Vec::new(),
        }
    }
}

/// Groups TCP segments into per-flow connection state.
pub struct TcpAssembler<H: ConnectionHandler> {
    config: AssemblerConfig,
    connections: Mutex<LinkedHashMap<ConnId, Arc<Mutex<TcpConnection>>>>,
    handler: H,
}

impl<H: ConnectionHandler> TcpAssembler<H> {
    pub fn new(handler: H, config: AssemblerConfig) -> Self {
        TcpAssembler {
            config,
            connections: Mutex::new(LinkedHashMap::new()),
            handler,
        }
    }

    /// Number of tracked connections.
    pub fn size(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// Parses one captured frame and dispatches its segment.
    pub fn assemble(&self, frame: &[u8], ts: DateTime<Utc>) {
        if let Ok(ctxt) = L4Context::new(frame) {
            self.assemble_segment(ctxt.src, ctxt.dst, ctxt.segment(frame, ts));
        }
    }

    /// Dispatches one segment to its connection, creating the connection when
    /// the segment may legitimately start one (`SYN` without `ACK`, or a
    /// payload that begins with an HTTP request title).
    pub fn assemble_segment(&self, src: SocketAddr, dst: SocketAddr, segment: TcpSegment) {
        if !self.permits(&src, &dst) {
            return;
        }

        let create = (segment.syn() && !segment.has_ack())
            || framing::request_title(&segment.payload).is_some();
        let conn = match self.retrieve(src, dst, create) {
            Some(conn) => conn,
            None => return,
        };

        let closed = {
            let mut conn = conn.lock().unwrap();
            conn.on_receive(src, dst, segment);
            conn.closed()
        };

        if closed {
            self.delete(ConnId::new(src, dst));
            conn.lock().unwrap().finish();
        }
    }

    fn permits(&self, src: &SocketAddr, dst: &SocketAddr) -> bool {
        if !self.config.filter_ip.is_empty()
            && !self.config.filter_ip.contains(&src.ip())
            && !self.config.filter_ip.contains(&dst.ip())
        {
            return false;
        }
        if !self.config.filter_port.is_empty()
            && !self.config.filter_port.contains(&src.port())
            && !self.config.filter_port.contains(&dst.port())
        {
            return false;
        }
        true
    }

    /// Looks up the connection for this packet; creates it when `init` is set.
    fn retrieve(
        &self,
        src: SocketAddr,
        dst: SocketAddr,
        init: bool,
    ) -> Option<Arc<Mutex<TcpConnection>>> {
        let conn_id = ConnId::new(src, dst);
        let key = ConnKey { src, dst };
        let (conn, duplex) = {
            let mut table = self.connections.lock().unwrap();
            if let Some(conn) = table.get(&conn_id) {
                return Some(Arc::clone(conn));
            }
            if !init {
                return None;
            }
            let (conn, duplex) =
                TcpConnection::new(key, self.config.chan_size, self.config.parse_response);
            let conn = Arc::new(Mutex::new(conn));
            table.insert(conn_id, Arc::clone(&conn));
            (conn, duplex)
        };
        // spawning the handler happens outside the table lock
        self.handler.handle(key, duplex);
        Some(conn)
    }

    fn delete(&self, conn_id: ConnId) {
        self.connections.lock().unwrap().remove(&conn_id);
    }

    /// Evicts every connection idle since before `t`.
    pub fn flush_older_than(&self, t: DateTime<Utc>) {
        let stale: Vec<Arc<Mutex<TcpConnection>>> = {
            let mut table = self.connections.lock().unwrap();
            let ids: Vec<ConnId> = table
                .iter()
                .filter(|(_, conn)| conn.lock().unwrap().last_timestamp() < t)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| table.remove(id)).collect()
        };

        for conn in stale {
            conn.lock().unwrap().evict();
        }
    }

    /// Closes every connection and waits for the handler to drain.
    pub fn finish_all(&self) {
        let drained: Vec<Arc<Mutex<TcpConnection>>> = {
            let mut table = self.connections.lock().unwrap();
            let mut all = Vec::with_capacity(table.len());
            while let Some((_, conn)) = table.pop_front() {
                all.push(conn);
            }
            all
        };
        for conn in drained {
            conn.lock().unwrap().finish();
        }
        self.handler.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::packet::tcp::{ACK, FIN, SYN};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHandler {
        handled: AtomicUsize,
    }

    impl ConnectionHandler for &CountingHandler {
        fn handle(&self, _key: ConnKey, _duplex: ConnDuplex) {
            self.handled.fetch_add(1, Ordering::SeqCst);
        }

        fn finish(&self) {}
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

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn creates_only_on_syn_or_request_title() {
        let handler = CountingHandler::default();
        let assembler = TcpAssembler::new(&handler, AssemblerConfig::default());
        let (a, b) = (addr("10.0.0.1:51000"), addr("10.0.0.2:80"));

        // a bare ACK mid-connection never creates state
        assembler.assemble_segment(a, b, seg(1, 1, ACK, b""));
        assert_eq!(assembler.size(), 0);
        // neither does an isolated response-side segment
        assembler.assemble_segment(b, a, seg(1, 1, ACK, b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"));
        assert_eq!(assembler.size(), 0);

        assembler.assemble_segment(a, b, seg(1, 0, SYN, b""));
        assert_eq!(assembler.size(), 1);
        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);

        // both directions map to the same entry
        assembler.assemble_segment(b, a, seg(1, 2, ACK, b""));
        assert_eq!(assembler.size(), 1);
        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn request_title_creates_mid_stream() {
        let handler = CountingHandler::default();
        let assembler = TcpAssembler::new(&handler, AssemblerConfig::default());
        let (a, b) = (addr("10.0.0.1:51000"), addr("10.0.0.2:80"));

        assembler.assemble_segment(a, b, seg(50, 1, ACK, b"GET / HTTP/1.1\r\nHost: h\r\n\r\n"));
        assert_eq!(assembler.size(), 1);
    }

    #[test]
    fn ip_and_port_filters_drop_unmatched_packets() {
        let handler = CountingHandler::default();
        let assembler = TcpAssembler::new(
            &handler,
            AssemblerConfig {
                filter_ip: vec!["10.0.0.9".parse().unwrap()],
                filter_port: vec![8080],
                ..Default::default()
            },
        );
        let (a, b) = (addr("10.0.0.1:51000"), addr("10.0.0.2:80"));
        assembler.assemble_segment(a, b, seg(1, 0, SYN, b""));
        assert_eq!(assembler.size(), 0);

        // matching either endpoint's ip and port passes
        let (c, d) = (addr("10.0.0.9:51000"), addr("10.0.0.2:8080"));
        assembler.assemble_segment(c, d, seg(1, 0, SYN, b""));
        assert_eq!(assembler.size(), 1);
    }

    #[test]
    fn fin_on_both_directions_removes_connection() {
        let handler = CountingHandler::default();
        let assembler = TcpAssembler::new(&handler, AssemblerConfig::default());
        let (a, b) = (addr("10.0.0.1:51000"), addr("10.0.0.2:80"));

        assembler.assemble_segment(a, b, seg(1, 1, ACK, b"GET / HTTP/1.1\r\nHost: h\r\n\r\n"));
        assert_eq!(assembler.size(), 1);
        assembler.assemble_segment(a, b, seg(29, 1, ACK | FIN, b""));
        assert_eq!(assembler.size(), 1);
        assembler.assemble_segment(b, a, seg(1, 30, ACK | FIN, b""));
        assert_eq!(assembler.size(), 0);
    }
}
