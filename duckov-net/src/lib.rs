//! DuckovNet - Reliable UDP Transport
//!
//! High-level session API: a KCP-style reliable channel over UDP with a
//! key-checked handshake, keepalive pings and an unreliable side channel.
//!
//! ```no_run
//! use duckov_net::{DeliveryMode, EventChannel, KcpClient, SessionEvent};
//! use std::sync::Arc;
//!
//! let (handler, events) = EventChannel::new();
//! let client = KcpClient::new(Arc::new(handler));
//! client.connect("127.0.0.1", 9050)?;
//! client.send(b"hello", DeliveryMode::Reliable)?;
//!
//! if let Ok(SessionEvent::Data { data, .. }) = events.recv() {
//!     println!("{} bytes", data.len());
//! }
//! # Ok::<(), duckov_net::SessionError>(())
//! ```

pub use duckov_io as io;
pub use duckov_protocol as protocol;

pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod server;
pub mod stats;

pub use channel::{KcpChannel, DEFAULT_CONV};
pub use client::{ConnectionState, KcpClient};
pub use config::SessionConfig;
pub use error::SessionError;
pub use event::{
    DeliveryMode, DisconnectReason, EventChannel, EventHandler, NoopHandler, ServerEvent,
    ServerEventChannel, ServerHandler, SessionEvent,
};
pub use server::KcpServer;
pub use stats::SessionStats;

// Re-export commonly used types
pub use protocol::{KcpConfig, KcpError, KcpStats, Reader, Writer};
