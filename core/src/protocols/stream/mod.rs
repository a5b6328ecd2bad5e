//! Stream-level (application-layer) protocol parsing over reassembled bytes.

pub mod http;
