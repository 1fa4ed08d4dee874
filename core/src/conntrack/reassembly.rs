//! Out-of-order segment buffering and in-order byte-stream reassembly for one direction of a TCP
//! connection.
//!
//! Segments are delivered to the application layer in byte order as soon as they become
//! contiguous with what has already been delivered. Segments that arrive out of order are held in
//! [`Reassembler::segments`] until the gap closes; segments that overlap bytes already buffered or
//! delivered are resolved according to the destination host's [`OsPolicy`], since different TCP
//! stacks disagree about which copy of overlapping data is authoritative.

use super::ospolicy::OsPolicy;
use super::tcp_sm::{seq_ahead, seq_lt};

/// A run of reassembled bytes ready for application-layer inspection, with a connection-relative
/// byte offset that increases monotonically regardless of TCP sequence-number wraparound.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub data: Vec<u8>,
    pub offset: u64,
}

/// Reassembles one direction of a TCP byte stream.
#[derive(Debug)]
pub struct Reassembler {
    os_policy: OsPolicy,
    /// Next in-order sequence number expected; `None` until initialized from the handshake.
    next_seq: Option<u32>,
    /// Running count of bytes delivered so far, used as the absolute offset in emitted messages.
    offset: u64,
    /// Out-of-order segments, sorted by sequence number, with no two segments overlapping.
    segments: Vec<(u32, Vec<u8>)>,
    /// Bytes currently held in `segments`.
    buffered_bytes: usize,
    /// Maximum bytes that may be held out of order before new segments are dropped.
    depth_cap: usize,
}

impl Reassembler {
    pub fn new(os_policy: OsPolicy, depth_cap: usize) -> Self {
        Reassembler {
            os_policy,
            next_seq: None,
            offset: 0,
            segments: Vec::new(),
            buffered_bytes: 0,
            depth_cap,
        }
    }

    /// Sets the sequence number of the first in-order byte this side will ever send (the ISN + 1
    /// for the handshake initiator, or the first observed sequence number for a midstream pickup).
    pub fn init(&mut self, next_seq: u32) {
        if self.next_seq.is_none() {
            self.next_seq = Some(next_seq);
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.next_seq.is_some()
    }

    /// Feeds one segment's payload. Returns zero or more contiguous runs now ready for inspection,
    /// in delivery order.
    pub fn insert(&mut self, seq: u32, mut data: Vec<u8>) -> Vec<StreamMessage> {
        let mut out = Vec::new();
        if data.is_empty() {
            return out;
        }
        let Some(next_seq) = self.next_seq else {
            return out;
        };

        if seq == next_seq {
            self.deliver(data, &mut out);
            self.flush_ooo(&mut out);
        } else if seq_ahead(seq, next_seq) {
            self.buffer_ooo(seq, data);
        } else {
            // Segment starts at or before bytes already delivered; it may still carry a tail of
            // new data past `next_seq`.
            let end = seq.wrapping_add(data.len() as u32);
            if seq_ahead(end, next_seq) {
                let overlap_len = next_seq.wrapping_sub(seq) as usize;
                data.drain(..overlap_len.min(data.len()));
                if !data.is_empty() {
                    self.deliver(data, &mut out);
                    self.flush_ooo(&mut out);
                }
            }
            // Otherwise the segment is entirely old data; drop it.
        }
        out
    }

    fn deliver(&mut self, data: Vec<u8>, out: &mut Vec<StreamMessage>) {
        let len = data.len() as u32;
        let msg_offset = self.offset;
        self.offset += data.len() as u64;
        self.next_seq = Some(self.next_seq.unwrap().wrapping_add(len));
        out.push(StreamMessage {
            data,
            offset: msg_offset,
        });
    }

    fn buffer_ooo(&mut self, seq: u32, data: Vec<u8>) {
        if self.buffered_bytes.saturating_add(data.len()) > self.depth_cap {
            log::warn!(
                "reassembly depth cap ({} bytes) reached, dropping out-of-order segment",
                self.depth_cap
            );
            crate::stats::record_reassembly_drop();
            return;
        }
        let end = seq.wrapping_add(data.len() as u32);
        let mut keep = true;
        let mut i = 0;
        while i < self.segments.len() {
            let (oseq, odata) = &self.segments[i];
            let oend = oseq.wrapping_add(odata.len() as u32);
            let overlaps = seq_lt(seq, oend) && seq_lt(*oseq, end);
            if overlaps {
                if self.os_policy.new_data_wins(seq, data.len(), *oseq, odata.len()) {
                    self.buffered_bytes -= odata.len();
                    self.segments.remove(i);
                    continue;
                } else {
                    keep = false;
                    break;
                }
            }
            i += 1;
        }
        if keep {
            self.buffered_bytes += data.len();
            let pos = self
                .segments
                .iter()
                .position(|(s, _)| seq_lt(seq, *s))
                .unwrap_or(self.segments.len());
            self.segments.insert(pos, (seq, data));
        }
    }

    fn flush_ooo(&mut self, out: &mut Vec<StreamMessage>) {
        loop {
            let next_seq = self.next_seq.unwrap();
            match self.segments.iter().position(|(s, _)| *s == next_seq) {
                Some(pos) => {
                    let (_, data) = self.segments.remove(pos);
                    self.buffered_bytes -= data.len();
                    self.deliver(data, out);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_segments_deliver_immediately() {
        let mut r = Reassembler::new(OsPolicy::Linux, 65536);
        r.init(100);
        let msgs = r.insert(100, b"hello".to_vec());
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].data, b"hello");
        assert_eq!(msgs[0].offset, 0);
        let msgs = r.insert(105, b" world".to_vec());
        assert_eq!(msgs[0].data, b" world");
        assert_eq!(msgs[0].offset, 5);
    }

    #[test]
    fn out_of_order_segment_is_buffered_then_flushed() {
        let mut r = Reassembler::new(OsPolicy::Linux, 65536);
        r.init(100);
        let msgs = r.insert(106, b"world".to_vec());
        assert!(msgs.is_empty());
        let msgs = r.insert(100, b"hello ".to_vec());
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].data, b"hello ");
        assert_eq!(msgs[1].data, b"world");
    }

    #[test]
    fn fully_old_segment_is_dropped() {
        let mut r = Reassembler::new(OsPolicy::Linux, 65536);
        r.init(100);
        r.insert(100, b"hello".to_vec());
        let msgs = r.insert(100, b"hello".to_vec());
        assert!(msgs.is_empty());
    }

    #[test]
    fn overlapping_segment_delivers_only_new_tail() {
        let mut r = Reassembler::new(OsPolicy::Linux, 65536);
        r.init(100);
        r.insert(100, b"abc".to_vec());
        let msgs = r.insert(101, b"bcdef".to_vec());
        assert_eq!(msgs[0].data, b"def");
    }

    #[test]
    fn linux_policy_prefers_longer_overlapping_ooo_segment() {
        let mut r = Reassembler::new(OsPolicy::Linux, 65536);
        r.init(100);
        r.insert(110, b"short".to_vec());
        r.insert(110, b"longerdata".to_vec());
        let msgs = r.insert(100, vec![b'.'; 10]);
        let all: Vec<u8> = msgs.into_iter().flat_map(|m| m.data).collect();
        assert!(all.windows(b"longerdata".len()).any(|w| w == b"longerdata"));
    }

    #[test]
    fn depth_cap_drops_excess_out_of_order_data() {
        let mut r = Reassembler::new(OsPolicy::Linux, 8);
        r.init(100);
        let msgs = r.insert(200, vec![0u8; 16]);
        assert!(msgs.is_empty());
        assert_eq!(r.buffered_bytes, 0);
    }
}
