//! One direction of a connection as an ordered byte stream.

use crate::conntrack::conn::window::ReceiveWindow;
use crate::conntrack::pdu::TcpSegment;

use std::io;

use crossbeam_channel::{bounded, Receiver, Sender};

const WINDOW_INITIAL_SIZE: usize = 64;

/// Write side of one direction: receive window plus the channel of released
/// segments feeding the direction's reader task.
///
/// A stream constructed with [`DirectionalStream::null`] swallows inserts,
/// never buffers, and never produces bytes; it exists so that a disabled
/// response direction still participates in closure tracking.
#[derive(Debug)]
pub struct DirectionalStream {
    window: Option<ReceiveWindow>,
    tx: Option<Sender<TcpSegment>>,
    closed: bool,
}

impl DirectionalStream {
    /// Creates a live stream and the reader for its released segments.
    pub(crate) fn new(chan_size: usize) -> (Self, StreamReader) {
        let (tx, rx) = bounded(chan_size);
        (
            DirectionalStream {
                window: Some(ReceiveWindow::new(WINDOW_INITIAL_SIZE)),
                tx: Some(tx),
                closed: false,
            },
            StreamReader {
                rx,
                remain: Vec::new(),
                pos: 0,
            },
        )
    }

    /// Creates a null sink.
    pub(crate) fn null() -> Self {
        DirectionalStream {
            window: None,
            tx: None,
            closed: false,
        }
    }

    pub(crate) fn append_segment(&mut self, segment: TcpSegment) {
        if let Some(window) = self.window.as_mut() {
            window.insert(segment);
        }
    }

    pub(crate) fn confirm(&mut self, ack: u32) {
        if let (Some(window), Some(tx)) = (self.window.as_mut(), self.tx.as_ref()) {
            window.confirm(ack, tx);
        }
    }

    pub fn set_closed(&mut self, closed: bool) {
        self.closed = closed;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Sequence gaps observed on this direction.
    pub fn gaps(&self) -> u64 {
        self.window.as_ref().map(|w| w.gaps()).unwrap_or(0)
    }

    /// Closes the segment channel, waking a blocked reader.
    pub(crate) fn finish(&mut self) {
        self.tx = None;
    }
}

/// Read side of one direction: pulls released segments and exposes the
/// concatenated payload bytes as `io::Read`.
#[derive(Debug)]
pub struct StreamReader {
    rx: Receiver<TcpSegment>,
    remain: Vec<u8>,
    pos: usize,
}

impl StreamReader {
    /// Blocks for the next released segment; `None` once the stream finished.
    pub fn next_segment(&self) -> Option<TcpSegment> {
        self.rx.recv().ok()
    }

    /// Iterator over released segments until the stream finishes.
    pub fn segments(&self) -> impl Iterator<Item = TcpSegment> + '_ {
        self.rx.iter()
    }
}

impl io::Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.remain.len() {
            match self.rx.recv() {
                Ok(segment) => {
                    self.remain = segment.payload;
                    self.pos = 0;
                }
                // channel closed: end of stream
                Err(_) => return Ok(0),
            }
        }
        let n = (self.remain.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.remain[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::io::Read;

    fn seg(seq: u32, payload: &[u8]) -> TcpSegment {
        TcpSegment {
            seq,
            ack: 0,
            flags: 0,
            payload: payload.to_vec(),
            ts: Utc::now(),
        }
    }

    #[test]
    fn reader_sees_released_bytes_in_order() {
        let (mut stream, mut reader) = DirectionalStream::new(16);
        stream.append_segment(seg(12, b"world"));
        stream.append_segment(seg(7, b"hello"));
        stream.confirm(17);
        stream.finish();

        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "helloworld");
    }

    #[test]
    fn null_stream_swallows_everything() {
        let mut stream = DirectionalStream::null();
        stream.append_segment(seg(1, b"data"));
        stream.confirm(5);
        assert!(!stream.is_closed());
        stream.set_closed(true);
        assert!(stream.is_closed());
    }

    #[test]
    fn finish_wakes_reader_with_eof() {
        let (mut stream, mut reader) = DirectionalStream::new(4);
        stream.finish();
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }
}
