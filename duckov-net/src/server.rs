//! UDP session server
//!
//! Accepts clients whose `CONNECT` carries the configured key and keeps one
//! reliable channel per peer address. Like the client, the server runs a
//! receive thread and an update thread.

use crate::channel::{KcpChannel, DEFAULT_CONV};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::event::{DeliveryMode, DisconnectReason, ServerHandler};
use duckov_io::{Clock, NetSocket};
use duckov_protocol::{KcpStats, Message};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Reason sent to clients presenting the wrong key
pub const INVALID_KEY_REASON: &str = "invalid key";

struct Peer {
    channel: KcpChannel,
    last_activity: AtomicI64,
}

struct ServerInner {
    socket: NetSocket,
    config: SessionConfig,
    handler: Arc<dyn ServerHandler>,
    peers: RwLock<HashMap<SocketAddr, Arc<Peer>>>,
    running: AtomicBool,
    clock: Clock,
}

/// Server side of reliable-UDP sessions
pub struct KcpServer {
    inner: Arc<ServerInner>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl KcpServer {
    /// Bind to `addr` and start serving
    pub fn bind(
        addr: SocketAddr,
        config: SessionConfig,
        handler: Arc<dyn ServerHandler>,
    ) -> Result<Self, SessionError> {
        let socket = NetSocket::bind(addr, &config.socket_options())?;
        info!("server listening on {}", socket.local_addr()?);

        let inner = Arc::new(ServerInner {
            socket,
            config,
            handler,
            peers: RwLock::new(HashMap::new()),
            running: AtomicBool::new(true),
            clock: Clock::new(),
        });

        let server = KcpServer {
            inner: inner.clone(),
            threads: Mutex::new(Vec::new()),
        };

        let receiver = inner.clone();
        let receive = thread::Builder::new()
            .name("kcp-server-receive".into())
            .spawn(move || receiver.receive_loop())?;
        server.threads.lock().push(receive);

        let updater = inner;
        let update = thread::Builder::new()
            .name("kcp-server-update".into())
            .spawn(move || updater.update_loop())?;
        server.threads.lock().push(update);

        Ok(server)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SessionError> {
        Ok(self.inner.socket.local_addr()?)
    }

    /// Send a payload to one connected peer
    pub fn send(&self, peer: SocketAddr, data: &[u8], mode: DeliveryMode) -> Result<(), SessionError> {
        let entry = self
            .inner
            .peer(&peer)
            .ok_or(SessionError::UnknownPeer(peer))?;

        match mode {
            DeliveryMode::Unreliable => {
                self.inner.socket.send_to(&Message::frame_data(data), peer)?;
            }
            DeliveryMode::Reliable | DeliveryMode::ReliableOrdered => {
                entry.channel.send(data)?;
            }
        }
        Ok(())
    }

    /// Send a payload to every connected peer
    pub fn broadcast(&self, data: &[u8], mode: DeliveryMode) {
        for peer in self.peers() {
            if let Err(e) = self.send(peer, data, mode) {
                debug!("broadcast to {} failed: {}", peer, e);
            }
        }
    }

    /// Drop a peer, telling it why
    pub fn disconnect_peer(&self, peer: SocketAddr, reason: &str) -> Result<(), SessionError> {
        if self.inner.remove_peer(&peer).is_none() {
            return Err(SessionError::UnknownPeer(peer));
        }
        self.inner.send_message(
            peer,
            &Message::Disconnect {
                reason: reason.to_string(),
            },
        );
        self.inner
            .handler
            .on_peer_disconnected(peer, &DisconnectReason::Local(reason.to_string()));
        Ok(())
    }

    pub fn peers(&self) -> Vec<SocketAddr> {
        self.inner.peers.read().keys().copied().collect()
    }

    pub fn peer_count(&self) -> usize {
        self.inner.peers.read().len()
    }

    pub fn peer_stats(&self, peer: &SocketAddr) -> Option<KcpStats> {
        self.inner.peer(peer).map(|p| p.channel.stats())
    }

    /// Stop both threads and disconnect every peer. Idempotent.
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }

        let peers: Vec<SocketAddr> = self.inner.peers.write().drain().map(|(addr, _)| addr).collect();
        let reason = DisconnectReason::Local("server shutdown".to_string());
        for peer in peers {
            self.inner.send_message(
                peer,
                &Message::Disconnect {
                    reason: reason.to_string(),
                },
            );
            self.inner.handler.on_peer_disconnected(peer, &reason);
        }

        let current = thread::current().id();
        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in threads {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        info!("server stopped");
    }
}

impl Drop for KcpServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ServerInner {
    fn peer(&self, addr: &SocketAddr) -> Option<Arc<Peer>> {
        self.peers.read().get(addr).cloned()
    }

    /// Remove a peer; only the caller that actually removed it gets `Some`
    fn remove_peer(&self, addr: &SocketAddr) -> Option<Arc<Peer>> {
        self.peers.write().remove(addr)
    }

    fn send_message(&self, peer: SocketAddr, message: &Message) {
        if let Err(e) = self.socket.send_to(&message.to_bytes(), peer) {
            trace!("failed to send {} to {}: {}", message, peer, e);
        }
    }

    fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        while self.running.load(Ordering::Acquire) {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => self.handle_datagram(&buf[..len], from),
                Err(e) if e.is_transient() => continue,
                Err(e) => {
                    if self.running.load(Ordering::Acquire) {
                        warn!("server receive failed: {}", e);
                    }
                    break;
                }
            }
        }
    }

    fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) {
        let message = match Message::from_bytes(datagram) {
            Ok(message) => message,
            Err(e) => {
                trace!("dropping malformed datagram from {}: {}", from, e);
                return;
            }
        };

        if let Message::Connect { key } = &message {
            self.handle_connect(key, from);
            return;
        }

        let peer = match self.peer(&from) {
            Some(peer) => peer,
            None => {
                trace!("dropping {} from unknown peer {}", message, from);
                return;
            }
        };
        peer.last_activity
            .store(self.clock.millis(), Ordering::Relaxed);

        match message {
            Message::Disconnect { reason } => {
                if self.remove_peer(&from).is_some() {
                    debug!("peer {} disconnected: {}", from, reason);
                    self.handler
                        .on_peer_disconnected(from, &DisconnectReason::Remote(reason));
                }
            }
            Message::Data { payload, .. } if payload.is_empty() => {
                trace!("dropping empty DATA from {}", from);
            }
            Message::Data { payload, .. } => {
                self.handler.on_data(from, payload, DeliveryMode::Unreliable);
            }
            Message::Ping { timestamp } => {
                self.send_message(from, &Message::Pong { timestamp });
            }
            Message::Reliable { datagram } => {
                if let Err(e) = peer.channel.input(&datagram) {
                    trace!("dropping reliable datagram from {}: {}", from, e);
                }
            }
            Message::Pong { .. } | Message::Accept | Message::Connect { .. } => {}
        }
    }

    fn handle_connect(&self, key: &str, from: SocketAddr) {
        if key != self.config.connection_key {
            warn!("rejecting {}: invalid key", from);
            self.send_message(
                from,
                &Message::Disconnect {
                    reason: INVALID_KEY_REASON.to_string(),
                },
            );
            return;
        }

        let now = self.clock.millis();
        let is_new = {
            let mut peers = self.peers.write();
            match peers.get(&from) {
                Some(existing) => {
                    existing.last_activity.store(now, Ordering::Relaxed);
                    false
                }
                None => match KcpChannel::with_config(DEFAULT_CONV, &self.config.kcp) {
                    Ok(channel) => {
                        peers.insert(
                            from,
                            Arc::new(Peer {
                                channel,
                                last_activity: AtomicI64::new(now),
                            }),
                        );
                        true
                    }
                    Err(e) => {
                        warn!("cannot create channel for {}: {}", from, e);
                        return;
                    }
                },
            }
        };

        // Duplicate CONNECT means our ACCEPT was lost
        self.send_message(from, &Message::Accept);

        if is_new {
            debug!("peer {} connected", from);
            self.handler.on_peer_connected(from);
        }
    }

    fn update_loop(self: Arc<Self>) {
        let interval = self.config.update_interval();
        let inactivity = self.config.inactivity_timeout_ms as i64;

        while self.running.load(Ordering::Acquire) {
            let now = self.clock.now_ms();
            let peers: Vec<(SocketAddr, Arc<Peer>)> = self
                .peers
                .read()
                .iter()
                .map(|(addr, peer)| (*addr, peer.clone()))
                .collect();

            for (addr, peer) in peers {
                let messages = peer.channel.update_and_drain(now);
                peer.channel.drain_outbound(|datagram| {
                    let framed = Message::frame_reliable(&datagram);
                    if let Err(e) = self.socket.send_to(&framed, addr) {
                        trace!("failed to send reliable datagram to {}: {}", addr, e);
                    }
                });

                for message in messages {
                    self.handler.on_data(addr, message, DeliveryMode::Reliable);
                }

                let idle = self.clock.millis() - peer.last_activity.load(Ordering::Relaxed);
                let reason = if idle > inactivity {
                    Some(DisconnectReason::Timeout)
                } else if peer.channel.is_dead() {
                    Some(DisconnectReason::DeadLink)
                } else {
                    None
                };

                if let Some(reason) = reason {
                    if self.remove_peer(&addr).is_some() {
                        debug!("dropping peer {}: {}", addr, reason);
                        self.send_message(
                            addr,
                            &Message::Disconnect {
                                reason: reason.to_string(),
                            },
                        );
                        self.handler.on_peer_disconnected(addr, &reason);
                    }
                }
            }

            thread::sleep(interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ServerEvent, ServerEventChannel};
    use bytes::Bytes;
    use std::net::UdpSocket;
    use std::time::Duration;

    fn start() -> (KcpServer, crossbeam::channel::Receiver<ServerEvent>) {
        let (handler, events) = ServerEventChannel::new();
        let config = SessionConfig {
            recv_poll_ms: 20,
            ..Default::default()
        };
        let server =
            KcpServer::bind("127.0.0.1:0".parse().unwrap(), config, Arc::new(handler)).unwrap();
        (server, events)
    }

    fn raw_client() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        socket
    }

    fn recv_message(socket: &UdpSocket) -> Message {
        let mut buf = [0u8; 2048];
        let (n, _) = socket.recv_from(&mut buf).unwrap();
        Message::from_bytes(&buf[..n]).unwrap()
    }

    #[test]
    fn test_accepts_matching_key() {
        let (server, events) = start();
        let client = raw_client();
        let server_addr = server.local_addr().unwrap();

        let connect = Message::Connect {
            key: "DuckovNet".into(),
        };
        client.send_to(&connect.to_bytes(), server_addr).unwrap();
        assert_eq!(recv_message(&client), Message::Accept);

        // Duplicate CONNECT is answered again but not reported twice
        client.send_to(&connect.to_bytes(), server_addr).unwrap();
        assert_eq!(recv_message(&client), Message::Accept);

        let local = client.local_addr().unwrap();
        assert_eq!(
            events.recv_timeout(Duration::from_secs(1)).unwrap(),
            ServerEvent::PeerConnected(local)
        );
        assert!(events.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(server.peer_count(), 1);
    }

    #[test]
    fn test_rejects_wrong_key() {
        let (server, events) = start();
        let client = raw_client();

        let connect = Message::Connect {
            key: "wrong".into(),
        };
        client
            .send_to(&connect.to_bytes(), server.local_addr().unwrap())
            .unwrap();

        assert_eq!(
            recv_message(&client),
            Message::Disconnect {
                reason: INVALID_KEY_REASON.into()
            }
        );
        assert_eq!(server.peer_count(), 0);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_answers_ping() {
        let (server, _events) = start();
        let client = raw_client();
        let server_addr = server.local_addr().unwrap();

        client
            .send_to(
                &Message::Connect {
                    key: "DuckovNet".into(),
                }
                .to_bytes(),
                server_addr,
            )
            .unwrap();
        assert_eq!(recv_message(&client), Message::Accept);

        client
            .send_to(&Message::Ping { timestamp: 4242 }.to_bytes(), server_addr)
            .unwrap();
        assert_eq!(recv_message(&client), Message::Pong { timestamp: 4242 });
    }

    #[test]
    fn test_drops_empty_data() {
        let (server, events) = start();
        let client = raw_client();
        let server_addr = server.local_addr().unwrap();

        client
            .send_to(
                &Message::Connect {
                    key: "DuckovNet".into(),
                }
                .to_bytes(),
                server_addr,
            )
            .unwrap();
        assert_eq!(recv_message(&client), Message::Accept);
        let local = client.local_addr().unwrap();
        assert_eq!(
            events.recv_timeout(Duration::from_secs(1)).unwrap(),
            ServerEvent::PeerConnected(local)
        );

        // Tag and channel only, then a one-byte payload
        client.send_to(&[4, 0], server_addr).unwrap();
        client.send_to(&[4, 0, b'x'], server_addr).unwrap();

        assert_eq!(
            events.recv_timeout(Duration::from_secs(1)).unwrap(),
            ServerEvent::Data {
                peer: local,
                data: Bytes::from_static(b"x"),
                mode: DeliveryMode::Unreliable,
            }
        );
        assert!(events.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_send_to_unknown_peer() {
        let (server, _events) = start();
        let nobody: SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert!(matches!(
            server.send(nobody, b"x", DeliveryMode::Reliable),
            Err(SessionError::UnknownPeer(_))
        ));
        assert!(server.disconnect_peer(nobody, "bye").is_err());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let (server, _events) = start();
        server.shutdown();
        server.shutdown();
        assert_eq!(server.peer_count(), 0);
    }
}
