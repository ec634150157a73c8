//! ARQ Segment Structures and Serialization
//!
//! Every segment starts with a 24-byte little-endian header:
//!
//! ```text
//!  0               4   5   6       8               12
//! +---------------+---+---+-------+---------------+
//! |     conv      |cmd|frg|  wnd  |      ts       |
//! +---------------+---+---+-------+---------------+
//! |      sn       |      una      |      len      |
//! +---------------+---------------+---------------+
//! 12              16              20              24
//! ```
//!
//! followed by `len` payload bytes. Several segments may be concatenated in
//! one datagram.

use crate::sequence::SeqNumber;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Size of the segment header in bytes
pub const HEADER_SIZE: usize = 24;

/// Default MTU used by the engine
pub const DEFAULT_MTU: usize = 1400;

/// Segment commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Data push
    Push = 81,
    /// Acknowledgement of a single sequence number
    Ack = 82,
    /// Window probe (ask)
    WindowAsk = 83,
    /// Window size report (tell)
    WindowTell = 84,
}

impl Command {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            81 => Some(Command::Push),
            82 => Some(Command::Ack),
            83 => Some(Command::WindowAsk),
            84 => Some(Command::WindowTell),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Push => "PUSH",
            Command::Ack => "ACK",
            Command::WindowAsk => "WASK",
            Command::WindowTell => "WINS",
        };
        write!(f, "{}", name)
    }
}

/// Segment parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SegmentError {
    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Invalid command: {0}")]
    InvalidCommand(u8),

    #[error("Negative payload length: {0}")]
    NegativeLength(i32),
}

/// Raw 24-byte segment header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub conv: u32,
    pub cmd: u8,
    pub frg: u8,
    pub wnd: u16,
    pub ts: u32,
    pub sn: u32,
    pub una: u32,
    pub len: i32,
}

impl SegmentHeader {
    /// Parse a header from the front of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SegmentError> {
        if bytes.len() < HEADER_SIZE {
            return Err(SegmentError::InsufficientData {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..HEADER_SIZE];
        Ok(SegmentHeader {
            conv: buf.get_u32_le(),
            cmd: buf.get_u8(),
            frg: buf.get_u8(),
            wnd: buf.get_u16_le(),
            ts: buf.get_u32_le(),
            sn: buf.get_u32_le(),
            una: buf.get_u32_le(),
            len: buf.get_i32_le(),
        })
    }

    /// Serialize the header (little-endian)
    pub fn to_bytes(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.conv);
        buf.put_u8(self.cmd);
        buf.put_u8(self.frg);
        buf.put_u16_le(self.wnd);
        buf.put_u32_le(self.ts);
        buf.put_u32_le(self.sn);
        buf.put_u32_le(self.una);
        buf.put_i32_le(self.len);
    }

    /// Payload length, rejecting negative values
    pub fn payload_len(&self) -> Result<usize, SegmentError> {
        if self.len < 0 {
            return Err(SegmentError::NegativeLength(self.len));
        }
        Ok(self.len as usize)
    }
}

/// One ARQ protocol data unit plus the sender-side retransmission state
#[derive(Clone, PartialEq, Eq)]
pub struct Segment {
    pub conv: u32,
    pub cmd: Command,
    /// Fragments remaining after this one in the same message
    pub frg: u8,
    /// Advertised free receive window (segments)
    pub wnd: u16,
    /// Send timestamp (milliseconds), echoed back in the ACK
    pub ts: u32,
    pub sn: SeqNumber,
    /// Cumulative ack: everything below this has been received
    pub una: SeqNumber,
    /// Next retransmission time
    pub resend_ts: u32,
    /// Retransmission timeout for this segment
    pub rto: u32,
    /// Number of ACKs seen for later sequence numbers
    pub fastack: u32,
    /// Transmit count
    pub xmit: u32,
    pub payload: Bytes,
}

impl Segment {
    /// Create a segment with zeroed header fields
    pub fn new(cmd: Command, payload: Bytes) -> Self {
        Segment {
            conv: 0,
            cmd,
            frg: 0,
            wnd: 0,
            ts: 0,
            sn: SeqNumber::ZERO,
            una: SeqNumber::ZERO,
            resend_ts: 0,
            rto: 0,
            fastack: 0,
            xmit: 0,
            payload,
        }
    }

    /// Header as it appears on the wire
    pub fn header(&self) -> SegmentHeader {
        SegmentHeader {
            conv: self.conv,
            cmd: self.cmd.as_u8(),
            frg: self.frg,
            wnd: self.wnd,
            ts: self.ts,
            sn: self.sn.as_raw(),
            una: self.una.as_raw(),
            len: self.payload.len() as i32,
        }
    }

    /// Encoded size (header + payload)
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Append the encoded segment to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        self.header().to_bytes(buf);
        buf.put_slice(&self.payload);
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());
        self.encode(&mut buf);
        buf
    }

    /// Decode one segment from the front of `bytes`.
    ///
    /// Returns the segment and the number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Segment, usize), SegmentError> {
        let header = SegmentHeader::from_bytes(bytes)?;
        let len = header.payload_len()?;
        let cmd = Command::from_u8(header.cmd).ok_or(SegmentError::InvalidCommand(header.cmd))?;

        let total = HEADER_SIZE + len;
        if bytes.len() < total {
            return Err(SegmentError::InsufficientData {
                expected: total,
                actual: bytes.len(),
            });
        }

        let segment = Segment {
            conv: header.conv,
            cmd,
            frg: header.frg,
            wnd: header.wnd,
            ts: header.ts,
            sn: SeqNumber::new(header.sn),
            una: SeqNumber::new(header.una),
            resend_ts: 0,
            rto: 0,
            fastack: 0,
            xmit: 0,
            payload: Bytes::copy_from_slice(&bytes[HEADER_SIZE..total]),
        };
        Ok((segment, total))
    }

    /// Iterate over every segment concatenated in a datagram
    pub fn iter_datagram(datagram: &[u8]) -> Segments<'_> {
        Segments {
            remaining: datagram,
        }
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("conv", &self.conv)
            .field("cmd", &self.cmd)
            .field("frg", &self.frg)
            .field("wnd", &self.wnd)
            .field("ts", &self.ts)
            .field("sn", &self.sn)
            .field("una", &self.una)
            .field("xmit", &self.xmit)
            .field("len", &self.payload.len())
            .finish()
    }
}

/// Iterator over the segments of one datagram.
///
/// Stops after the first error.
pub struct Segments<'a> {
    remaining: &'a [u8],
}

impl<'a> Iterator for Segments<'a> {
    type Item = Result<Segment, SegmentError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }
        match Segment::decode(self.remaining) {
            Ok((segment, consumed)) => {
                self.remaining = &self.remaining[consumed..];
                Some(Ok(segment))
            }
            Err(e) => {
                self.remaining = &[];
                Some(Err(e))
            }
        }
    }
}
