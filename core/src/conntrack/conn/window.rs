//! Per-direction receive window.
//!
//! A bounded in-memory reorder buffer for observed segments. A passive observer
//! cannot solicit retransmission, so the window stays small: segments are held
//! only until the opposite direction acknowledges them, then released in
//! sequence order.

use crate::conntrack::pdu::TcpSegment;

use crossbeam_channel::Sender;

const MAX_TCP_SEQ: u32 = 0xFFFF_FFFF;
const TCP_SEQ_WINDOW: u32 = 0x0000_FFFF;

/// Compares two TCP sequence numbers under 32-bit wrap-around.
///
/// Negative when `seq1` is earlier, zero when equal, positive when later.
pub(crate) fn compare_tcp_seq(seq1: u32, seq2: u32) -> i32 {
    if seq1 < TCP_SEQ_WINDOW && seq2 > MAX_TCP_SEQ - TCP_SEQ_WINDOW {
        seq1.wrapping_add(MAX_TCP_SEQ).wrapping_sub(seq2) as i32
    } else if seq2 < TCP_SEQ_WINDOW && seq1 > MAX_TCP_SEQ - TCP_SEQ_WINDOW {
        seq1.wrapping_sub(MAX_TCP_SEQ.wrapping_add(seq2)) as i32
    } else {
        seq1.wrapping_sub(seq2) as i32
    }
}

/// Ordered buffer of out-of-order segments for one direction.
#[derive(Debug)]
pub(crate) struct ReceiveWindow {
    /// Ring start index.
    start: usize,
    /// Number of buffered segments.
    size: usize,
    /// Ring storage, ordered by sequence number; grows by doubling.
    buffer: Vec<Option<TcpSegment>>,
    /// Largest ACK observed for this direction.
    last_ack: u32,
    /// Next sequence number expected to release; 0 until the first release.
    expect_begin: u32,
    /// Sequence gaps observed at release time (capture loss).
    gaps: u64,
}

impl ReceiveWindow {
    pub(crate) fn new(initial_size: usize) -> Self {
        ReceiveWindow {
            start: 0,
            size: 0,
            buffer: (0..initial_size).map(|_| None).collect(),
            last_ack: 0,
            expect_begin: 0,
            gaps: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.size
    }

    /// Number of sequence gaps seen when releasing segments.
    pub(crate) fn gaps(&self) -> u64 {
        self.gaps
    }

    /// Inserts a segment in sequence order.
    ///
    /// Empty payloads, exact duplicates, and segments lying entirely before the
    /// release point are dropped.
    pub(crate) fn insert(&mut self, segment: TcpSegment) {
        if segment.payload.is_empty() {
            return;
        }
        if self.expect_begin != 0
            && compare_tcp_seq(
                self.expect_begin,
                segment.seq.wrapping_add(segment.payload.len() as u32),
            ) >= 0
        {
            log::debug!("dropping old segment, seq {}", segment.seq);
            return;
        }

        // scan from the newest end for the insertion point
        let cap = self.buffer.len();
        let mut idx = self.size;
        while idx > 0 {
            let index = (idx - 1 + self.start) % cap;
            let prev = self.buffer[index]
                .as_ref()
                .map(|s| s.seq)
                .unwrap_or_default();
            let result = compare_tcp_seq(prev, segment.seq);
            if result == 0 {
                // duplicated
                return;
            }
            if result < 0 {
                break;
            }
            idx -= 1;
        }

        if self.size == self.buffer.len() {
            self.expand();
        }
        let cap = self.buffer.len();

        if idx == self.size {
            // append at last
            self.buffer[(idx + self.start) % cap] = Some(segment);
        } else {
            // shift later segments forward to keep the ring sorted
            let mut i = self.size;
            while i > idx {
                let next = (i + self.start) % cap;
                let current = (i - 1 + self.start) % cap;
                self.buffer[next] = self.buffer[current].take();
                i -= 1;
            }
            self.buffer[(idx + self.start) % cap] = Some(segment);
        }

        self.size += 1;
    }

    /// Releases buffered segments acknowledged by `ack` to the reader, trimming
    /// overlap with already-released bytes.
    pub(crate) fn confirm(&mut self, ack: u32, tx: &Sender<TcpSegment>) {
        let cap = self.buffer.len();
        let mut idx = 0;
        while idx < self.size {
            let index = (idx + self.start) % cap;
            let seq = self.buffer[index]
                .as_ref()
                .map(|s| s.seq)
                .unwrap_or_default();
            if compare_tcp_seq(seq, ack) >= 0 {
                break;
            }
            let mut segment = match self.buffer[index].take() {
                Some(s) => s,
                None => break,
            };
            idx += 1;

            let new_expect = segment.seq.wrapping_add(segment.payload.len() as u32);
            if self.expect_begin != 0 {
                let diff = compare_tcp_seq(self.expect_begin, segment.seq);
                if diff > 0 {
                    // overlap with bytes already released
                    let duplicated = self.expect_begin.wrapping_sub(segment.seq) as usize;
                    if duplicated >= segment.payload.len() {
                        continue;
                    }
                    segment.payload.drain(..duplicated);
                } else if diff < 0 {
                    // a passive observer cannot request retransmission; release
                    // across the gap and account for the loss
                    self.gaps += 1;
                    log::debug!(
                        "sequence gap: expected {}, releasing {}",
                        self.expect_begin,
                        segment.seq
                    );
                }
            }
            // reader may already be gone on shutdown
            let _ = tx.send(segment);
            self.expect_begin = new_expect;
        }
        self.start = (self.start + idx) % cap;
        self.size -= idx;

        if self.last_ack == 0 || compare_tcp_seq(self.last_ack, ack) < 0 {
            self.last_ack = ack;
        }
    }

    fn expand(&mut self) {
        let old_cap = self.buffer.len();
        let mut buffer: Vec<Option<TcpSegment>> = (0..old_cap * 2).map(|_| None).collect();
        for (i, slot) in buffer.iter_mut().take(self.size).enumerate() {
            *slot = self.buffer[(self.start + i) % old_cap].take();
        }
        self.start = 0;
        self.buffer = buffer;
    }
}
