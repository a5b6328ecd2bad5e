//! IPv4 packet.

use crate::protocols::packet::{read_u16, read_u32, Packet, PacketParseError};

use std::net::Ipv4Addr;

use anyhow::{bail, Result};

/// IPv4 EtherType.
pub const IPV4_PROTOCOL: usize = 0x0800;

/// An IPv4 packet.
///
/// IPv4 options are counted toward the header length but not parsed.
#[derive(Debug)]
pub struct Ipv4<'a> {
    /// Version and IHL byte.
    version_ihl: u8,
    /// Offset to the header from the start of the frame.
    offset: usize,
    /// Frame buffer.
    data: &'a [u8],
}

impl Ipv4<'_> {
    /// Returns the IP protocol version.
    #[inline]
    pub fn version(&self) -> u8 {
        (self.version_ihl & 0xf0) >> 4
    }

    /// Returns the header length measured in 32-bit words (IHL).
    #[inline]
    pub fn ihl(&self) -> u8 {
        self.version_ihl & 0x0f
    }

    /// Returns the total length of the packet in bytes, including the header and data.
    #[inline]
    pub fn total_length(&self) -> u16 {
        read_u16(self.data, self.offset + 2).unwrap_or(0)
    }

    /// Returns the encapsulated protocol identifier.
    #[inline]
    pub fn protocol(&self) -> u8 {
        self.data[self.offset + 9]
    }

    /// Returns the source IPv4 address.
    #[inline]
    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(read_u32(self.data, self.offset + 12).unwrap_or(0))
    }

    /// Returns the destination IPv4 address.
    #[inline]
    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(read_u32(self.data, self.offset + 16).unwrap_or(0))
    }
}

impl<'a> Packet<'a> for Ipv4<'a> {
    fn frame(&self) -> &'a [u8] {
        self.data
    }

    fn header_len(&self) -> usize {
        self.ihl() as usize * 4
    }

    fn next_header_offset(&self) -> usize {
        self.offset + self.header_len()
    }

    fn next_header(&self) -> Option<usize> {
        Some(self.protocol().into())
    }

    fn parse_from(outer: &'a impl Packet<'a>) -> Result<Self>
    where
        Self: Sized,
    {
        if outer.next_header() != Some(IPV4_PROTOCOL) {
            bail!(PacketParseError::InvalidProtocol);
        }
        let offset = outer.next_header_offset();
        let data = outer.frame();
        if data.len() < offset + 20 {
            bail!(PacketParseError::InvalidRead);
        }
        let version_ihl = data[offset];
        if (version_ihl & 0xf0) >> 4 != 4 || (version_ihl & 0x0f) < 5 {
            bail!(PacketParseError::InvalidProtocol);
        }
        Ok(Ipv4 {
            version_ihl,
            offset,
            data,
        })
    }
}
