//! Session events
//!
//! Sessions report lifecycle changes and received payloads through an
//! [`EventHandler`] (client) or [`ServerHandler`] (server). Callbacks run on
//! the session's background threads with no internal lock held, so a handler
//! may call back into the session, including `disconnect`.
//!
//! [`EventChannel`] and [`ServerEventChannel`] turn callbacks into a
//! `crossbeam` stream for callers who prefer polling.

use bytes::Bytes;
use crossbeam::channel::{unbounded, Receiver, Sender};
use duckov_protocol::Reader;
use std::fmt;
use std::net::SocketAddr;

/// Delivery guarantee requested for an outgoing payload
///
/// `Unreliable` payloads may be lost, duplicated or reordered; they are not
/// deduplicated or sequenced in any way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryMode {
    Unreliable,
    Reliable,
    ReliableOrdered,
}

impl DeliveryMode {
    pub fn is_reliable(self) -> bool {
        !matches!(self, DeliveryMode::Unreliable)
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Closed locally with the given reason
    Local(String),
    /// Peer sent `DISCONNECT` with the given reason
    Remote(String),
    /// No datagram from the peer within the inactivity timeout
    Timeout,
    /// No `ACCEPT` within the connect timeout
    ConnectTimeout,
    /// Peer refused the connection request
    Rejected(String),
    /// A reliable segment hit the retransmission limit
    DeadLink,
    /// Socket failure
    Io(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Local(reason) | DisconnectReason::Remote(reason) => {
                write!(f, "{}", reason)
            }
            DisconnectReason::Timeout => write!(f, "timeout"),
            DisconnectReason::ConnectTimeout => write!(f, "connect timeout"),
            DisconnectReason::Rejected(reason) => write!(f, "rejected: {}", reason),
            DisconnectReason::DeadLink => write!(f, "dead link"),
            DisconnectReason::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

/// Client-side session callbacks
pub trait EventHandler: Send + Sync {
    fn on_connected(&self) {}

    /// Raised once when an established session ends
    fn on_disconnected(&self, _reason: &DisconnectReason) {}

    /// Raised once when `connect` does not reach the connected state
    fn on_connection_failed(&self, _reason: &DisconnectReason) {}

    fn on_data(&self, _data: Bytes, _mode: DeliveryMode) {}

    /// Unreliable payload, positioned after the channel byte.
    ///
    /// The default forwards the remaining bytes to [`on_data`](Self::on_data).
    fn on_unreliable(&self, _channel: u8, reader: &mut Reader<'_>) {
        let payload = Bytes::copy_from_slice(reader.get_remaining_bytes());
        self.on_data(payload, DeliveryMode::Unreliable);
    }

    fn on_latency_update(&self, _latency_ms: u32) {}
}

/// Server-side peer callbacks
pub trait ServerHandler: Send + Sync {
    fn on_peer_connected(&self, _peer: SocketAddr) {}

    fn on_peer_disconnected(&self, _peer: SocketAddr, _reason: &DisconnectReason) {}

    fn on_data(&self, _peer: SocketAddr, _data: Bytes, _mode: DeliveryMode) {}
}

/// Handler that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl EventHandler for NoopHandler {}

impl ServerHandler for NoopHandler {}

/// Client event as delivered by [`EventChannel`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    Disconnected(DisconnectReason),
    ConnectionFailed(DisconnectReason),
    Data { data: Bytes, mode: DeliveryMode },
    Latency(u32),
}

/// [`EventHandler`] that forwards every event into a channel
#[derive(Debug, Clone)]
pub struct EventChannel {
    tx: Sender<SessionEvent>,
}

impl EventChannel {
    pub fn new() -> (Self, Receiver<SessionEvent>) {
        let (tx, rx) = unbounded();
        (EventChannel { tx }, rx)
    }

    fn emit(&self, event: SessionEvent) {
        // Receiver gone means nobody is listening anymore
        let _ = self.tx.send(event);
    }
}

impl EventHandler for EventChannel {
    fn on_connected(&self) {
        self.emit(SessionEvent::Connected);
    }

    fn on_disconnected(&self, reason: &DisconnectReason) {
        self.emit(SessionEvent::Disconnected(reason.clone()));
    }

    fn on_connection_failed(&self, reason: &DisconnectReason) {
        self.emit(SessionEvent::ConnectionFailed(reason.clone()));
    }

    fn on_data(&self, data: Bytes, mode: DeliveryMode) {
        self.emit(SessionEvent::Data { data, mode });
    }

    fn on_latency_update(&self, latency_ms: u32) {
        self.emit(SessionEvent::Latency(latency_ms));
    }
}

/// Server event as delivered by [`ServerEventChannel`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    PeerConnected(SocketAddr),
    PeerDisconnected(SocketAddr, DisconnectReason),
    Data {
        peer: SocketAddr,
        data: Bytes,
        mode: DeliveryMode,
    },
}

/// [`ServerHandler`] that forwards every event into a channel
#[derive(Debug, Clone)]
pub struct ServerEventChannel {
    tx: Sender<ServerEvent>,
}

impl ServerEventChannel {
    pub fn new() -> (Self, Receiver<ServerEvent>) {
        let (tx, rx) = unbounded();
        (ServerEventChannel { tx }, rx)
    }
}

impl ServerHandler for ServerEventChannel {
    fn on_peer_connected(&self, peer: SocketAddr) {
        let _ = self.tx.send(ServerEvent::PeerConnected(peer));
    }

    fn on_peer_disconnected(&self, peer: SocketAddr, reason: &DisconnectReason) {
        let _ = self
            .tx
            .send(ServerEvent::PeerDisconnected(peer, reason.clone()));
    }

    fn on_data(&self, peer: SocketAddr, data: Bytes, mode: DeliveryMode) {
        let _ = self.tx.send(ServerEvent::Data { peer, data, mode });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_display() {
        assert_eq!(DisconnectReason::Timeout.to_string(), "timeout");
        assert_eq!(DisconnectReason::Local("bye".into()).to_string(), "bye");
        assert_eq!(
            DisconnectReason::Rejected("invalid key".into()).to_string(),
            "rejected: invalid key"
        );
    }

    #[test]
    fn test_default_unreliable_forwarding() {
        let (handler, rx) = EventChannel::new();
        let payload = [1u8, 2, 3];
        let mut reader = Reader::new(&payload);
        handler.on_unreliable(0, &mut reader);

        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::Data {
                data: Bytes::from_static(&[1, 2, 3]),
                mode: DeliveryMode::Unreliable
            }
        );
    }

    #[test]
    fn test_delivery_mode() {
        assert!(!DeliveryMode::Unreliable.is_reliable());
        assert!(DeliveryMode::Reliable.is_reliable());
        assert!(DeliveryMode::ReliableOrdered.is_reliable());
    }
}
