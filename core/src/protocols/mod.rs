//! Packet-level and stream-level protocol parsing.

pub mod packet;
pub mod stream;
