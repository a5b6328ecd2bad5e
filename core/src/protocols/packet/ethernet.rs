//! Ethernet frame.

use crate::protocols::packet::{read_u16, Packet, PacketParseError};

use anyhow::{bail, Result};

const VLAN_802_1Q: u16 = 0x8100;
const VLAN_802_1AD: u16 = 0x88a8;

const TAG_SIZE: usize = 4;
const HDR_SIZE: usize = 14;
const HDR_SIZE_802_1Q: usize = HDR_SIZE + TAG_SIZE;

/// An Ethernet frame.
///
/// Single-tagged 802.1Q frames are unwrapped to the inner EtherType. Double-tagged
/// frames (QinQ) are not supported.
#[derive(Debug)]
pub struct Ethernet<'a> {
    /// EtherType from the fixed header, before VLAN unwrapping.
    ether_type: u16,
    /// Offset to the header from the start of the frame.
    offset: usize,
    /// Frame buffer.
    data: &'a [u8],
}

impl Ethernet<'_> {
    /// Returns the destination MAC address.
    #[inline]
    pub fn dst(&self) -> [u8; 6] {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.data[self.offset..self.offset + 6]);
        mac
    }

    /// Returns the source MAC address.
    #[inline]
    pub fn src(&self) -> [u8; 6] {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.data[self.offset + 6..self.offset + 12]);
        mac
    }

    /// Returns the encapsulated protocol identifier for untagged and single-tagged
    /// frames, and `0` for unsupported tagging.
    #[inline]
    pub fn ether_type(&self) -> u16 {
        self.next_header().unwrap_or(0) as u16
    }
}

impl<'a> Packet<'a> for Ethernet<'a> {
    fn frame(&self) -> &'a [u8] {
        self.data
    }

    fn header_len(&self) -> usize {
        match self.ether_type {
            VLAN_802_1Q => HDR_SIZE_802_1Q,
            _ => HDR_SIZE,
        }
    }

    fn next_header_offset(&self) -> usize {
        self.offset + self.header_len()
    }

    fn next_header(&self) -> Option<usize> {
        match self.ether_type {
            VLAN_802_1Q => read_u16(self.data, self.offset + HDR_SIZE + 2).map(usize::from),
            VLAN_802_1AD => None,
            _ => Some(self.ether_type.into()),
        }
    }

    fn parse_from(outer: &'a impl Packet<'a>) -> Result<Self>
    where
        Self: Sized,
    {
        let data = outer.frame();
        match read_u16(data, 12) {
            Some(ether_type) => Ok(Ethernet {
                ether_type,
                offset: 0,
                data,
            }),
            None => bail!(PacketParseError::InvalidRead),
        }
    }
}
