//! DuckovNet Protocol Core
//!
//! This crate implements the transport's wire-level pieces: the little-endian
//! binary codec, the ARQ segment format, sequence arithmetic, RTT estimation,
//! the congestion window, send/receive buffers, the KCP-style ARQ engine and
//! the session message framing.

pub mod buffer;
pub mod congestion;
pub mod kcp;
pub mod message;
pub mod rtt;
pub mod segment;
pub mod sequence;
pub mod wire;

pub use buffer::{BufferError, ReceiveBuffer, SendBuffer};
pub use congestion::CongestionWindow;
pub use kcp::{Kcp, KcpConfig, KcpError, KcpState, KcpStats, OutputFn, MAX_MTU};
pub use message::{Message, MessageError, MessageType, DEFAULT_CONNECTION_KEY};
pub use rtt::RttEstimator;
pub use segment::{Command, Segment, SegmentError, SegmentHeader, HEADER_SIZE};
pub use sequence::{time_diff, SeqNumber};
pub use wire::{Reader, WireError, Writer};
