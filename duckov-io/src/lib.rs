//! DuckovNet I/O and Platform Abstraction
//!
//! This crate provides the UDP socket wrapper used by sessions and the
//! monotonic millisecond clock that drives the ARQ engine.

pub mod socket;
pub mod time;

pub use socket::{NetSocket, SocketError, SocketOptions};
pub use time::{Clock, Timer};
