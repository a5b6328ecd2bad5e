//! Bidirectional connection identifiers.
//!
//! Provides a direction-independent table key plus the directional endpoint pair
//! used in record headers.

use std::cmp;
use std::fmt;
use std::net::SocketAddr;

use serde::Serialize;

/// The two endpoints of a connection in the direction the connection was first seen.
///
/// `src` is the endpoint that sent the packet which created the connection entry;
/// the HTTP client side is determined later from payload content, not from this
/// ordering.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Serialize)]
pub struct ConnKey {
    /// Endpoint that sent the first observed packet.
    pub src: SocketAddr,
    /// Endpoint that received the first observed packet.
    pub dst: SocketAddr,
}

impl ConnKey {
    /// Converts to a direction-independent connection identifier.
    pub fn conn_id(&self) -> ConnId {
        ConnId::new(self.src, self.dst)
    }
}

impl fmt::Display for ConnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.src, self.dst)
    }
}

/// A generic connection identifier.
///
/// Identifies a connection independent of the source and destination address
/// order, so both directions of the same flow map to the same table bucket.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct ConnId(SocketAddr, SocketAddr);

impl ConnId {
    /// Returns the connection ID of a packet with `src` and `dst` address/port pairs.
    pub fn new(src: SocketAddr, dst: SocketAddr) -> Self {
        ConnId(cmp::min(src, dst), cmp::max(src, dst))
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.0, self.1)
    }
}
