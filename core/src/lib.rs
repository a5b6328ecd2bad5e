//! Passive HTTP/1.x traffic reconstruction.
//!
//! `httptap-core` observes network traffic on live interfaces or saved pcap
//! files, reassembles bidirectional TCP byte streams from out-of-order and
//! duplicated segments, detects HTTP/1.x message boundaries, and emits
//! structured per-transaction records to rotating files, an upstream replay
//! endpoint, or a server-sent-events stream.
//!
//! The pipeline, leaves first:
//!
//! - [`protocols::packet`] — header views over captured frames
//! - [`conntrack`] — flow demultiplexing and per-direction reassembly
//! - [`protocols::stream::http`] — framing detection and message parsing
//! - [`filter`] / [`format`] — emission policy and record rendering
//! - [`sink`] — rotating files, replay, SSE
//! - [`runtime`] — thread orchestration and shutdown
//!
//! ```no_run
//! use httptap_core::config::Options;
//! use httptap_core::runtime::Runtime;
//!
//! fn main() -> anyhow::Result<()> {
//!     let options = Options {
//!         input: "eth0".to_owned(),
//!         resp: true,
//!         ..Default::default()
//!     };
//!     Runtime::new(options)?.run()
//! }
//! ```

pub mod capture;
pub mod config;
pub mod conntrack;
pub mod filter;
pub mod format;
pub mod handler;
pub mod protocols;
pub mod runtime;
pub mod sink;

pub use self::config::{load_config, Level, Mode, Options};
pub use self::conntrack::conn_id::{ConnId, ConnKey};
pub use self::conntrack::pdu::{L4Context, TcpSegment};
pub use self::runtime::{CancelToken, Runtime};
