//! End-to-end pipeline scenarios: synthesized segments through the assembler,
//! connection workers, and a collecting sink.

use httptap_core::config::Level;
use httptap_core::conntrack::pdu::TcpSegment;
use httptap_core::conntrack::{AssemblerConfig, ConnectionHandler, TcpAssembler};
use httptap_core::filter::Policy;
use httptap_core::handler::pair::PairConnectionHandler;
use httptap_core::handler::HttpConnectionHandler;
use httptap_core::protocols::packet::tcp::{ACK, FIN, SYN};
use httptap_core::sink::{Senders, Sink};

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};

/// Sink that remembers every record it receives.
#[derive(Clone, Default)]
struct CollectSink {
    records: Arc<Mutex<Vec<String>>>,
}

impl CollectSink {
    fn records(&self) -> Vec<String> {
        self.records.lock().unwrap().clone()
    }
}

impl Sink for CollectSink {
    fn send(&self, msg: &str, _count_discards: bool) {
        self.records.lock().unwrap().push(msg.to_owned());
    }

    fn close(&self) {}
}

struct Harness {
    assembler: TcpAssembler<Box<dyn ConnectionHandler>>,
    sink: CollectSink,
    client: SocketAddr,
    server: SocketAddr,
}

impl Harness {
    fn new(policy: Policy) -> Self {
        Self::with_engine(policy, false)
    }

    fn pair(policy: Policy) -> Self {
        Self::with_engine(policy, true)
    }

    fn with_engine(policy: Policy, pair: bool) -> Self {
        policy.reset_quota();
        let sink = CollectSink::default();
        let mut senders = Senders::new();
        senders.push(Box::new(sink.clone()));
        let parse_response = policy.resp;
        let policy = Arc::new(policy);
        let senders = Arc::new(senders);
        let handler: Box<dyn ConnectionHandler> = if pair {
            Box::new(PairConnectionHandler::new(policy, senders))
        } else {
            Box::new(HttpConnectionHandler::new(policy, senders))
        };
        let assembler = TcpAssembler::new(
            handler,
            AssemblerConfig {
                chan_size: 256,
                parse_response,
                ..Default::default()
            },
        );
        Harness {
            assembler,
            sink,
            client: "10.0.0.1:51000".parse().unwrap(),
            server: "10.0.0.2:80".parse().unwrap(),
        }
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

    fn from_client(&self, seq: u32, ack: u32, flags: u8, payload: &[u8]) {
        self.assembler
            .assemble_segment(self.client, self.server, Self::seg(seq, ack, flags, payload));
    }

    fn from_server(&self, seq: u32, ack: u32, flags: u8, payload: &[u8]) {
        self.assembler
            .assemble_segment(self.server, self.client, Self::seg(seq, ack, flags, payload));
    }

    fn finish(&self) -> Vec<String> {
        self.assembler.finish_all();
        self.sink.records()
    }
}

fn records_with(records: &[String], marker: &str) -> Vec<String> {
    records
        .iter()
        .filter(|r| r.contains(marker))
        .cloned()
        .collect()
}

#[test]
fn simple_get_and_200() {
    let harness = Harness::new(Policy {
        resp: true,
        level: Level::All,
        src_ratio: 1.0,
        ..Default::default()
    });

    let req = b"GET /a HTTP/1.1\r\nHost: h\r\n\r\n";
    let rsp = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi";

    harness.from_client(100, 0, SYN, b"");
    harness.from_client(101, 501, ACK, req);
    harness.from_server(501, 101 + req.len() as u32, ACK, rsp);
    harness.from_client(101 + req.len() as u32, 501 + rsp.len() as u32, ACK, b"");

    let records = harness.finish();
    let req_records = records_with(&records, "### #1 REQ ");
    assert_eq!(req_records.len(), 1, "records: {:?}", records);
    assert!(req_records[0].contains("GET /a HTTP/1.1"));
    assert!(req_records[0].contains("10.0.0.1:51000-10.0.0.2:80"));

    let rsp_records = records_with(&records, "### #1 RSP ");
    assert_eq!(rsp_records.len(), 1, "records: {:?}", records);
    assert!(rsp_records[0].contains("HTTP/1.1 200 OK"));
    assert!(rsp_records[0].contains("10.0.0.1:51000-10.0.0.2:80"));
}

#[test]
fn out_of_order_body_reassembles() {
    let harness = Harness::new(Policy {
        level: Level::All,
        src_ratio: 1.0,
        ..Default::default()
    });

    let head =
        b"POST /p HTTP/1.1\r\nHost: h\r\nContent-Type: text/plain\r\nContent-Length: 6\r\n\r\n";
    let head_len = head.len() as u32;

    harness.from_client(101, 501, ACK, head);
    // body arrives B2, B0, B1
    harness.from_client(101 + head_len + 4, 501, ACK, b"ef");
    harness.from_client(101 + head_len, 501, ACK, b"ab");
    harness.from_client(101 + head_len + 2, 501, ACK, b"cd");
    // server acknowledges everything
    harness.from_server(501, 101 + head_len + 6, ACK, b"");

    let records = harness.finish();
    let req_records = records_with(&records, "### #1 REQ ");
    assert_eq!(req_records.len(), 1, "records: {:?}", records);
    assert!(req_records[0].contains("abcdef"), "got: {}", req_records[0]);
}

#[test]
fn chunked_response_body() {
    let harness = Harness::new(Policy {
        resp: true,
        level: Level::All,
        src_ratio: 1.0,
        ..Default::default()
    });

    let req = b"GET /chunked HTTP/1.1\r\nHost: h\r\n\r\n";
    let rsp = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nTransfer-Encoding: chunked\r\n\r\n\
                7\r\nMozilla\r\n9\r\nDeveloper\r\n7\r\nNetwork\r\n0\r\n\r\n";

    harness.from_client(101, 501, ACK, req);
    harness.from_server(501, 101 + req.len() as u32, ACK, rsp);
    harness.from_client(101 + req.len() as u32, 501 + rsp.len() as u32, ACK, b"");

    let records = harness.finish();
    let rsp_records = records_with(&records, "### #1 RSP ");
    assert_eq!(rsp_records.len(), 1, "records: {:?}", records);
    assert!(
        rsp_records[0].contains("MozillaDeveloperNetwork"),
        "got: {}",
        rsp_records[0]
    );
}

#[test]
fn wrap_around_sequence_released_once() {
    let harness = Harness::new(Policy {
        level: Level::All,
        src_ratio: 1.0,
        ..Default::default()
    });

    let req = b"GET /wrap HTTP/1.1\r\nHost: h\r\n\r\n";
    let start: u32 = 0xFFFF_FFF0;
    let end = start.wrapping_add(req.len() as u32);

    harness.from_client(start, 501, ACK, req);
    harness.from_server(501, end, ACK, b"");
    // duplicate delivery of the same segment and ack
    harness.from_client(start, 501, ACK, req);
    harness.from_server(501, end, ACK, b"");

    let records = harness.finish();
    let req_records = records_with(&records, "GET /wrap");
    assert_eq!(req_records.len(), 1, "records: {:?}", records);
}

#[test]
fn idle_eviction_emits_eof() {
    let harness = Harness::new(Policy {
        level: Level::All,
        eof: true,
        src_ratio: 1.0,
        ..Default::default()
    });

    // one unacknowledged request segment, then silence
    harness.from_client(101, 501, ACK, b"GET /idle HTTP/1.1\r\nHost: h\r\n\r\n");
    assert_eq!(harness.assembler.size(), 1);

    harness.assembler.flush_older_than(Utc::now() + Duration::seconds(1));
    assert_eq!(harness.assembler.size(), 0);

    let records = harness.finish();
    let eof_records = records_with(&records, "### EOF#");
    assert_eq!(eof_records.len(), 1, "records: {:?}", records);
    assert!(eof_records[0].contains(" REQ "));
}

#[test]
fn status_filter_ranges() {
    let policy = Policy {
        resp: true,
        level: Level::Header,
        status: "200, 400-499".parse().unwrap(),
        src_ratio: 1.0,
        ..Default::default()
    };
    let harness = Harness::new(policy);

    let statuses: &[(u16, &str)] = &[
        (199, "199 Whatever"),
        (200, "200 OK"),
        (302, "302 Found"),
        (404, "404 Not Found"),
        (500, "500 Internal Server Error"),
    ];

    let mut client_seq: u32 = 1000;
    let mut server_seq: u32 = 9000;
    for (i, (_, status_line)) in statuses.iter().enumerate() {
        // one request/response exchange per port so each gets its own connection
        let client: SocketAddr = format!("10.0.0.1:{}", 52000 + i).parse().unwrap();
        let req = format!("GET /s{} HTTP/1.1\r\nHost: h\r\n\r\n", i).into_bytes();
        let rsp = format!("HTTP/1.1 {}\r\nContent-Length: 0\r\n\r\n", status_line).into_bytes();

        harness.assembler.assemble_segment(
            client,
            harness.server,
            Harness::seg(client_seq, server_seq, ACK, &req),
        );
        harness.assembler.assemble_segment(
            harness.server,
            client,
            Harness::seg(server_seq, client_seq + req.len() as u32, ACK, &rsp),
        );
        harness.assembler.assemble_segment(
            client,
            harness.server,
            Harness::seg(
                client_seq + req.len() as u32,
                server_seq + rsp.len() as u32,
                ACK | FIN,
                &[],
            ),
        );
        client_seq += 10_000;
        server_seq += 10_000;
    }

    let records = harness.finish();
    let rsp_records: Vec<String> = records
        .iter()
        .filter(|r| r.contains(" RSP ") && !r.contains("EOF#") && !r.contains("ERR#"))
        .cloned()
        .collect();
    assert_eq!(rsp_records.len(), 2, "records: {:?}", records);
    assert!(rsp_records.iter().any(|r| r.contains("HTTP/1.1 200 OK")));
    assert!(rsp_records.iter().any(|r| r.contains("HTTP/1.1 404 Not Found")));
}

#[test]
fn pair_mode_emits_correlated_exchange() {
    let harness = Harness::pair(Policy {
        resp: true,
        level: Level::All,
        src_ratio: 1.0,
        ..Default::default()
    });

    let req = b"GET /a HTTP/1.1\r\nHost: h\r\n\r\n";
    let rsp = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi";

    harness.from_client(100, 0, SYN, b"");
    harness.from_client(101, 501, ACK, req);
    harness.from_server(501, 101 + req.len() as u32, ACK, rsp);
    harness.from_client(101 + req.len() as u32, 501 + rsp.len() as u32, ACK, b"");

    let records = harness.finish();
    let req_idx = records
        .iter()
        .position(|r| r.contains("### #1 REQ "))
        .expect("request record");
    let rsp_idx = records
        .iter()
        .position(|r| r.contains("### #1 RSP "))
        .expect("response record");
    // pair mode emits the exchange back to back
    assert_eq!(rsp_idx, req_idx + 1, "records: {:?}", records);
    assert!(records[req_idx].contains("GET /a HTTP/1.1"));
    assert!(records[rsp_idx].contains("HTTP/1.1 200 OK"));
}

#[test]
fn quota_limits_emitted_requests() {
    let policy = Policy {
        level: Level::Url,
        n: 2,
        src_ratio: 1.0,
        ..Default::default()
    };
    let harness = Harness::new(policy);

    for i in 0..5u32 {
        let client: SocketAddr = format!("10.0.0.1:{}", 53000 + i).parse().unwrap();
        let req = format!("GET /q{} HTTP/1.1\r\nHost: h\r\n\r\n", i).into_bytes();
        let seq = 1000 + i * 10_000;
        harness
            .assembler
            .assemble_segment(client, harness.server, Harness::seg(seq, 1, ACK, &req));
        harness.assembler.assemble_segment(
            harness.server,
            client,
            Harness::seg(1, seq + req.len() as u32, ACK, &[]),
        );
    }

    let records = harness.finish();
    let req_records: Vec<&String> = records
        .iter()
        .filter(|r| r.contains(" REQ ") && !r.contains("EOF#") && !r.contains("ERR#"))
        .collect();
    assert_eq!(req_records.len(), 2, "records: {:?}", records);
}
