//! Transport-layer protocol data unit for stream reassembly and HTTP parsing.

use crate::protocols::packet::ethernet::Ethernet;
use crate::protocols::packet::ipv4::Ipv4;
use crate::protocols::packet::ipv6::Ipv6;
use crate::protocols::packet::tcp::{Tcp, ACK, FIN, RST, SYN};
use crate::protocols::packet::{Frame, Packet};

use std::net::{IpAddr, SocketAddr};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

/// One observed TCP segment: the header fields the pipeline needs plus its payload.
#[derive(Debug, Clone)]
pub struct TcpSegment {
    /// Raw sequence number.
    pub seq: u32,
    /// Raw acknowledgment number.
    pub ack: u32,
    /// TCP flag bits.
    pub flags: u8,
    /// Payload bytes.
    pub payload: Vec<u8>,
    /// Capture timestamp.
    pub ts: DateTime<Utc>,
}

impl TcpSegment {
    #[inline]
    pub fn syn(&self) -> bool {
        self.flags & SYN != 0
    }

    #[inline]
    pub fn has_ack(&self) -> bool {
        self.flags & ACK != 0
    }

    #[inline]
    pub fn fin(&self) -> bool {
        self.flags & FIN != 0
    }

    #[inline]
    pub fn rst(&self) -> bool {
        self.flags & RST != 0
    }
}

/// Parsed transport-layer context of one captured frame.
#[derive(Debug, Clone, Copy)]
pub struct L4Context {
    /// Source socket address.
    pub src: SocketAddr,
    /// Destination socket address.
    pub dst: SocketAddr,
    /// Offset into the frame where the TCP payload begins.
    pub offset: usize,
    /// Length of the payload in bytes.
    pub length: usize,
    /// Raw sequence number.
    pub seq_no: u32,
    /// Raw acknowledgment number.
    pub ack_no: u32,
    /// TCP flags.
    pub flags: u8,
}

impl L4Context {
    /// Walks ethernet → ipv4/ipv6 → tcp and extracts addressing and payload bounds.
    pub fn new(data: &[u8]) -> Result<Self> {
        let frame = Frame(data);
        let eth = frame.parse_to::<Ethernet>()?;
        if let Ok(ipv4) = eth.parse_to::<Ipv4>() {
            let tcp = ipv4.parse_to::<Tcp>()?;
            if let Some(payload_size) =
                (ipv4.total_length() as usize).checked_sub(ipv4.header_len() + tcp.header_len())
            {
                Ok(L4Context {
                    src: SocketAddr::new(IpAddr::V4(ipv4.src_addr()), tcp.src_port()),
                    dst: SocketAddr::new(IpAddr::V4(ipv4.dst_addr()), tcp.dst_port()),
                    offset: tcp.next_header_offset(),
                    length: payload_size.min(data.len().saturating_sub(tcp.next_header_offset())),
                    seq_no: tcp.seq_no(),
                    ack_no: tcp.ack_no(),
                    flags: tcp.flags(),
                })
            } else {
                bail!("Malformed packet");
            }
        } else if let Ok(ipv6) = eth.parse_to::<Ipv6>() {
            let tcp = ipv6.parse_to::<Tcp>()?;
            if let Some(payload_size) =
                (ipv6.payload_length() as usize).checked_sub(tcp.header_len())
            {
                Ok(L4Context {
                    src: SocketAddr::new(IpAddr::V6(ipv6.src_addr()), tcp.src_port()),
                    dst: SocketAddr::new(IpAddr::V6(ipv6.dst_addr()), tcp.dst_port()),
                    offset: tcp.next_header_offset(),
                    length: payload_size.min(data.len().saturating_sub(tcp.next_header_offset())),
                    seq_no: tcp.seq_no(),
                    ack_no: tcp.ack_no(),
                    flags: tcp.flags(),
                })
            } else {
                bail!("Malformed packet");
            }
        } else {
            bail!("Not IP");
        }
    }

    /// Copies the payload out of `data` into an owned segment stamped with `ts`.
    pub fn segment(&self, data: &[u8], ts: DateTime<Utc>) -> TcpSegment {
        let start = self.offset.min(data.len());
        let end = (self.offset + self.length).min(data.len());
        TcpSegment {
            seq: self.seq_no,
            ack: self.ack_no,
            flags: self.flags,
            payload: data[start..end].to_vec(),
            ts,
        }
    }
}
