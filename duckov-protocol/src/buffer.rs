//! Send and receive segment storage
//!
//! The send side keeps segments waiting for their first transmission
//! (`queue`) and segments in flight waiting for an ACK (`buf`). The receive
//! side keeps out-of-order segments (`buf`) and the ordered, gap-free run
//! ready for reassembly (`queue`).

use crate::segment::Segment;
use crate::sequence::SeqNumber;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::VecDeque;
use thiserror::Error;

/// Buffer errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    #[error("No message available")]
    Empty,

    #[error("Message fragments still missing")]
    Incomplete,
}

/// Sender-side segment queues
#[derive(Debug, Default)]
pub struct SendBuffer {
    /// Segments not yet transmitted
    queue: VecDeque<Segment>,
    /// Transmitted, unacknowledged segments ordered by `sn`
    buf: VecDeque<Segment>,
    /// Oldest unacknowledged sequence number
    snd_una: SeqNumber,
    /// Next sequence number to assign
    snd_nxt: SeqNumber,
}

impl SendBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment for first transmission
    pub fn enqueue(&mut self, segment: Segment) {
        self.queue.push_back(segment);
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Number of segments in flight
    pub fn inflight_len(&self) -> usize {
        self.buf.len()
    }

    /// Segments queued or in flight
    pub fn pending(&self) -> usize {
        self.queue.len() + self.buf.len()
    }

    pub fn snd_una(&self) -> SeqNumber {
        self.snd_una
    }

    pub fn snd_nxt(&self) -> SeqNumber {
        self.snd_nxt
    }

    /// Whether another queued segment fits in `window`
    pub fn can_promote(&self, window: u32) -> bool {
        !self.queue.is_empty() && self.snd_nxt.lt(self.snd_una + window)
    }

    /// Move the next queued segment into flight, assigning its sequence number
    pub fn promote(&mut self) -> Option<&mut Segment> {
        let mut segment = self.queue.pop_front()?;
        segment.sn = self.snd_nxt.post_increment();
        self.buf.push_back(segment);
        self.buf.back_mut()
    }

    /// Remove the in-flight segment `sn`, if present
    pub fn acknowledge(&mut self, sn: SeqNumber) -> bool {
        if sn.lt(self.snd_una) || sn.ge(self.snd_nxt) {
            return false;
        }

        for i in 0..self.buf.len() {
            let seg_sn = self.buf[i].sn;
            if seg_sn == sn {
                self.buf.remove(i);
                return true;
            }
            if sn.lt(seg_sn) {
                break;
            }
        }
        false
    }

    /// Remove every in-flight segment below the cumulative ack `una`
    pub fn acknowledge_up_to(&mut self, una: SeqNumber) {
        while let Some(front) = self.buf.front() {
            if front.sn.lt(una) {
                self.buf.pop_front();
            } else {
                break;
            }
        }
    }

    /// Recompute `snd_una` from the oldest in-flight segment
    pub fn shrink(&mut self) {
        self.snd_una = match self.buf.front() {
            Some(front) => front.sn,
            None => self.snd_nxt,
        };
    }

    /// Count one skip for every in-flight segment older than `max_ack`
    pub fn mark_fast_ack(&mut self, max_ack: SeqNumber) {
        if max_ack.lt(self.snd_una) || max_ack.ge(self.snd_nxt) {
            return;
        }

        for segment in self.buf.iter_mut() {
            if max_ack.le(segment.sn) {
                break;
            }
            segment.fastack += 1;
        }
    }

    /// Mutable access to the in-flight segments
    pub fn inflight_mut(&mut self) -> impl Iterator<Item = &mut Segment> {
        self.buf.iter_mut()
    }

    pub fn inflight(&self) -> impl Iterator<Item = &Segment> {
        self.buf.iter()
    }
}

/// Receiver-side segment queues
#[derive(Debug)]
pub struct ReceiveBuffer {
    /// Out-of-order segments sorted by `sn`
    buf: VecDeque<Segment>,
    /// In-order segments ready for reassembly
    queue: VecDeque<Segment>,
    /// Next expected sequence number
    rcv_nxt: SeqNumber,
    /// Receive window (segments)
    rcv_wnd: u32,
}

impl ReceiveBuffer {
    pub fn new(rcv_wnd: u32) -> Self {
        ReceiveBuffer {
            buf: VecDeque::new(),
            queue: VecDeque::new(),
            rcv_nxt: SeqNumber::ZERO,
            rcv_wnd,
        }
    }

    pub fn rcv_nxt(&self) -> SeqNumber {
        self.rcv_nxt
    }

    pub fn window(&self) -> u32 {
        self.rcv_wnd
    }

    pub fn set_window(&mut self, rcv_wnd: u32) {
        self.rcv_wnd = rcv_wnd;
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the ready queue has reached the receive window
    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.rcv_wnd as usize
    }

    /// Free receive window advertised to the peer
    pub fn free_window(&self) -> u16 {
        let used = self.queue.len() as u32;
        self.rcv_wnd.saturating_sub(used).min(u16::MAX as u32) as u16
    }

    /// Whether `sn` falls inside the receive window
    pub fn in_window(&self, sn: SeqNumber) -> bool {
        sn.lt(self.rcv_nxt + self.rcv_wnd)
    }

    /// Insert a received segment and promote any newly contiguous run.
    ///
    /// Returns `false` when the segment is a duplicate or outside the window.
    pub fn insert(&mut self, segment: Segment) -> bool {
        let sn = segment.sn;
        if !self.in_window(sn) || sn.lt(self.rcv_nxt) {
            return false;
        }

        let mut pos = self.buf.len();
        while pos > 0 {
            let existing = self.buf[pos - 1].sn;
            if existing == sn {
                return false;
            }
            if existing.lt(sn) {
                break;
            }
            pos -= 1;
        }
        self.buf.insert(pos, segment);

        self.promote();
        true
    }

    /// Move in-order segments from `buf` to `queue`
    pub fn promote(&mut self) {
        while let Some(front) = self.buf.front() {
            if front.sn != self.rcv_nxt || self.is_full() {
                break;
            }
            if let Some(segment) = self.buf.pop_front() {
                self.queue.push_back(segment);
                self.rcv_nxt = self.rcv_nxt.next();
            }
        }
    }

    /// Size of the next complete message
    pub fn peek_size(&self) -> Result<usize, BufferError> {
        let front = self.queue.front().ok_or(BufferError::Empty)?;
        if front.frg == 0 {
            return Ok(front.payload.len());
        }

        if self.queue.len() < front.frg as usize + 1 {
            return Err(BufferError::Incomplete);
        }

        let mut size = 0;
        for segment in self.queue.iter() {
            size += segment.payload.len();
            if segment.frg == 0 {
                break;
            }
        }
        Ok(size)
    }

    /// Pop the next complete message into `out`, returning its length.
    ///
    /// The caller checks the size with [`peek_size`](Self::peek_size) first.
    pub fn pop_message_into(&mut self, out: &mut [u8]) -> usize {
        let mut written = 0;
        while let Some(segment) = self.queue.pop_front() {
            let len = segment.payload.len();
            out[written..written + len].copy_from_slice(&segment.payload);
            written += len;
            if segment.frg == 0 {
                break;
            }
        }
        written
    }

    /// Pop the next complete message as owned bytes
    pub fn pop_message(&mut self) -> Result<Bytes, BufferError> {
        let size = self.peek_size()?;

        // Single-fragment messages share the segment payload
        if let Some(front) = self.queue.front() {
            if front.frg == 0 {
                return Ok(self.queue.pop_front().map(|s| s.payload).unwrap_or_default());
            }
        }

        let mut out = BytesMut::with_capacity(size);
        while let Some(segment) = self.queue.pop_front() {
            out.put_slice(&segment.payload);
            if segment.frg == 0 {
                break;
            }
        }
        Ok(out.freeze())
    }
}
