//! IPv6 packet.

use crate::protocols::packet::{read_u16, Packet, PacketParseError};

use std::net::Ipv6Addr;

use anyhow::{bail, Result};

/// IPv6 EtherType.
pub const IPV6_PROTOCOL: usize = 0x86dd;

const HDR_SIZE: usize = 40;

/// An IPv6 packet.
///
/// Extension headers are not walked; only transport protocols carried directly
/// after the fixed header are reachable.
#[derive(Debug)]
pub struct Ipv6<'a> {
    /// Offset to the header from the start of the frame.
    offset: usize,
    /// Frame buffer.
    data: &'a [u8],
}

impl Ipv6<'_> {
    /// Returns the payload length in bytes.
    #[inline]
    pub fn payload_length(&self) -> u16 {
        read_u16(self.data, self.offset + 4).unwrap_or(0)
    }

    /// Returns the next header identifier.
    #[inline]
    pub fn next_header_id(&self) -> u8 {
        self.data[self.offset + 6]
    }

    /// Returns the source IPv6 address.
    #[inline]
    pub fn src_addr(&self) -> Ipv6Addr {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.data[self.offset + 8..self.offset + 24]);
        Ipv6Addr::from(octets)
    }

    /// Returns the destination IPv6 address.
    #[inline]
    pub fn dst_addr(&self) -> Ipv6Addr {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.data[self.offset + 24..self.offset + 40]);
        Ipv6Addr::from(octets)
    }
}

impl<'a> Packet<'a> for Ipv6<'a> {
    fn frame(&self) -> &'a [u8] {
        self.data
    }

    fn header_len(&self) -> usize {
        HDR_SIZE
    }

    fn next_header_offset(&self) -> usize {
        self.offset + self.header_len()
    }

    fn next_header(&self) -> Option<usize> {
        Some(self.next_header_id().into())
    }

    fn parse_from(outer: &'a impl Packet<'a>) -> Result<Self>
    where
        Self: Sized,
    {
        if outer.next_header() != Some(IPV6_PROTOCOL) {
            bail!(PacketParseError::InvalidProtocol);
        }
        let offset = outer.next_header_offset();
        let data = outer.frame();
        if data.len() < offset + HDR_SIZE {
            bail!(PacketParseError::InvalidRead);
        }
        if (data[offset] & 0xf0) >> 4 != 6 {
            bail!(PacketParseError::InvalidProtocol);
        }
        Ok(Ipv6 { offset, data })
    }
}
