//! UDP session client
//!
//! A [`KcpClient`] owns at most one session at a time. Each session runs two
//! background threads: `kcp-receive` reads datagrams and dispatches them by
//! tag, `kcp-update` ticks the reliable channel, writes its datagrams, sends
//! keepalive pings and enforces the inactivity timeout.

use crate::channel::{KcpChannel, DEFAULT_CONV};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::event::{DeliveryMode, DisconnectReason, EventHandler};
use crate::stats::{Counters, SessionStats};
use duckov_io::{Clock, NetSocket, Timer};
use duckov_protocol::{Message, Reader};
use parking_lot::{Condvar, Mutex, RwLock};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Receive buffer size; large enough for any UDP datagram
const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// `CONNECT` sent, waiting for `ACCEPT`
    Connecting,
    Connected,
    /// Shutdown in progress
    Disconnecting,
}

/// Client side of a reliable-UDP session
pub struct KcpClient {
    config: SessionConfig,
    handler: Arc<dyn EventHandler>,
    session: Mutex<Option<Arc<Session>>>,
}

impl KcpClient {
    /// Create a client with default configuration
    pub fn new(handler: Arc<dyn EventHandler>) -> Self {
        Self::with_config(SessionConfig::default(), handler)
    }

    pub fn with_config(config: SessionConfig, handler: Arc<dyn EventHandler>) -> Self {
        KcpClient {
            config,
            handler,
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connect with the configured key, blocking until accepted or timed out
    pub fn connect(&self, host: &str, port: u16) -> Result<(), SessionError> {
        let key = self.config.connection_key.clone();
        self.connect_with_key(host, port, &key)
    }

    /// Connect with an explicit key
    pub fn connect_with_key(&self, host: &str, port: u16, key: &str) -> Result<(), SessionError> {
        {
            let mut current = self.session.lock();
            if let Some(session) = current.as_ref() {
                if session.state() != ConnectionState::Disconnected {
                    return Err(SessionError::AlreadyConnected);
                }
            }
            *current = None;
        }

        let session = match self.open_session(host, port, key) {
            Ok(session) => session,
            Err(e) => {
                let reason = DisconnectReason::Io(e.to_string());
                self.handler.on_connection_failed(&reason);
                return Err(e);
            }
        };

        // Visible to handler callbacks before any datagram can arrive
        *self.session.lock() = Some(session.clone());
        if let Err(e) = session.start() {
            let reason = DisconnectReason::Io(e.to_string());
            self.handler.on_connection_failed(&reason);
            return Err(e);
        }

        session.announce();
        session.wait_connected()
    }

    fn open_session(&self, host: &str, port: u16, key: &str) -> Result<Arc<Session>, SessionError> {
        let server_addr = resolve(host, port)?;
        let socket = NetSocket::bind_for(server_addr, &self.config.socket_options())?;
        let channel = KcpChannel::with_config(DEFAULT_CONV, &self.config.kcp)?;

        debug!(
            "connecting to {} from {}",
            server_addr,
            socket.local_addr()?
        );

        Ok(Session::new(
            socket,
            server_addr,
            channel,
            key.to_string(),
            self.config.clone(),
            self.handler.clone(),
        ))
    }

    /// Close the session, notifying the server. Does nothing when idle.
    pub fn disconnect(&self, reason: &str) {
        let session = self.session.lock().take();
        if let Some(session) = session {
            session.shutdown(DisconnectReason::Local(reason.to_string()), true);
        }
    }

    /// Send a payload.
    ///
    /// `Unreliable` payloads are written directly as one datagram with no
    /// retransmission, ordering or duplicate suppression.
    pub fn send(&self, data: &[u8], mode: DeliveryMode) -> Result<(), SessionError> {
        self.current()
            .ok_or(SessionError::NotConnected)?
            .send(data, mode)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.current()
            .map(|s| s.state())
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Last measured PING round trip
    pub fn latency_ms(&self) -> Option<u32> {
        self.current().and_then(|s| s.latency_ms())
    }

    pub fn stats(&self) -> Option<SessionStats> {
        self.current().map(|s| s.stats())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.current().and_then(|s| s.local_addr())
    }

    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.current().map(|s| s.server_addr)
    }

    fn current(&self) -> Option<Arc<Session>> {
        self.session.lock().clone()
    }
}

impl Drop for KcpClient {
    fn drop(&mut self) {
        self.disconnect("client closed");
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, SessionError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| SessionError::Resolve(format!("{}:{}: {}", host, port, e)))?;
    addrs
        .next()
        .ok_or_else(|| SessionError::Resolve(format!("{}:{}", host, port)))
}

/// One connection attempt and, once accepted, the live session
struct Session {
    /// Released once the session has shut down
    socket: RwLock<Option<NetSocket>>,
    server_addr: SocketAddr,
    channel: KcpChannel,
    key: String,
    config: SessionConfig,
    handler: Arc<dyn EventHandler>,

    state: Mutex<ConnectionState>,
    state_changed: Condvar,
    close_reason: Mutex<Option<DisconnectReason>>,

    /// Cleared exactly once, by whoever claims the shutdown
    running: AtomicBool,
    clock: Clock,
    last_activity: AtomicI64,
    /// Last PING round trip; negative until measured
    latency: AtomicI64,
    counters: Counters,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    fn new(
        socket: NetSocket,
        server_addr: SocketAddr,
        channel: KcpChannel,
        key: String,
        config: SessionConfig,
        handler: Arc<dyn EventHandler>,
    ) -> Arc<Self> {
        let clock = Clock::new();
        Arc::new(Session {
            socket: RwLock::new(Some(socket)),
            server_addr,
            channel,
            key,
            config,
            handler,
            state: Mutex::new(ConnectionState::Connecting),
            state_changed: Condvar::new(),
            close_reason: Mutex::new(None),
            running: AtomicBool::new(true),
            last_activity: AtomicI64::new(clock.millis()),
            clock,
            latency: AtomicI64::new(-1),
            counters: Counters::default(),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the receive and update threads
    fn start(self: &Arc<Self>) -> Result<(), SessionError> {
        let receiver = self.clone();
        let receive = thread::Builder::new()
            .name("kcp-receive".into())
            .spawn(move || receiver.receive_loop());

        let spawned = receive.and_then(|receive| {
            let updater = self.clone();
            match thread::Builder::new()
                .name("kcp-update".into())
                .spawn(move || updater.update_loop())
            {
                Ok(update) => Ok([receive, update]),
                Err(e) => {
                    self.running.store(false, Ordering::Release);
                    let _ = receive.join();
                    Err(e)
                }
            }
        });

        match spawned {
            Ok(threads) => {
                self.threads.lock().extend(threads);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                *self.state.lock() = ConnectionState::Disconnected;
                self.socket.write().take();
                Err(e.into())
            }
        }
    }

    /// Send the first CONNECT; the update thread retries it
    fn announce(&self) {
        let connect = Message::Connect {
            key: self.key.clone(),
        };
        if let Err(e) = self.send_message(&connect) {
            debug!("initial CONNECT failed: {}", e);
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket
            .read()
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn latency_ms(&self) -> Option<u32> {
        let latency = self.latency.load(Ordering::Relaxed);
        (latency >= 0).then(|| latency.min(u32::MAX as i64) as u32)
    }

    fn stats(&self) -> SessionStats {
        self.counters
            .snapshot(self.latency_ms(), self.channel.stats())
    }

    /// Block until the session leaves `Connecting` or the deadline passes.
    ///
    /// The timeout is decided under the state lock, so an `ACCEPT` racing the
    /// deadline either connects the session or is ignored.
    fn wait_connected(self: &Arc<Self>) -> Result<(), SessionError> {
        let deadline = Instant::now() + self.config.connect_timeout();
        let reason = DisconnectReason::ConnectTimeout;

        let timed_out = {
            let mut state = self.state.lock();
            while *state == ConnectionState::Connecting {
                if self
                    .state_changed
                    .wait_until(&mut state, deadline)
                    .timed_out()
                {
                    break;
                }
            }
            let current = *state;
            let claimed = match current {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => self.claim(&mut state, &reason),
                _ => None,
            };
            claimed
        };

        if let Some(previous) = timed_out {
            self.finish(previous, reason.clone(), false);
            return Err(SessionError::ConnectFailed(reason));
        }

        let reason = self.close_reason.lock().clone().unwrap_or(reason);
        Err(SessionError::ConnectFailed(reason))
    }

    fn send(&self, data: &[u8], mode: DeliveryMode) -> Result<(), SessionError> {
        if self.state() != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }

        match mode {
            DeliveryMode::Unreliable => self.send_raw(&Message::frame_data(data))?,
            DeliveryMode::Reliable | DeliveryMode::ReliableOrdered => self.channel.send(data)?,
        }
        self.counters.message_sent(mode.is_reliable());
        Ok(())
    }

    fn send_message(&self, message: &Message) -> Result<(), SessionError> {
        self.send_raw(&message.to_bytes())
    }

    fn send_raw(&self, datagram: &[u8]) -> Result<(), SessionError> {
        let socket = self.socket.read();
        let socket = socket.as_ref().ok_or(SessionError::NotConnected)?;
        socket.send_to(datagram, self.server_addr)?;
        self.counters.datagram_sent(datagram.len());
        Ok(())
    }

    /// Tear the session down once.
    ///
    /// Safe to call from any thread, including the session's own threads and
    /// handler callbacks: the calling thread is never joined.
    fn shutdown(&self, reason: DisconnectReason, notify_peer: bool) {
        let previous = {
            let mut state = self.state.lock();
            match self.claim(&mut state, &reason) {
                Some(previous) => previous,
                None => return,
            }
        };
        self.finish(previous, reason, notify_peer);
    }

    /// Take ownership of the shutdown, moving to `Disconnecting`.
    ///
    /// Returns the state left behind, or `None` when another caller already
    /// claimed it. Must be called with the state lock held.
    fn claim(
        &self,
        state: &mut ConnectionState,
        reason: &DisconnectReason,
    ) -> Option<ConnectionState> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return None;
        }
        *self.close_reason.lock() = Some(reason.clone());
        Some(std::mem::replace(state, ConnectionState::Disconnecting))
    }

    fn finish(&self, previous: ConnectionState, reason: DisconnectReason, notify_peer: bool) {
        if notify_peer && previous != ConnectionState::Disconnected {
            let message = Message::Disconnect {
                reason: reason.to_string(),
            };
            if let Err(e) = self.send_message(&message) {
                trace!("failed to send DISCONNECT: {}", e);
            }
        }

        {
            let mut state = self.state.lock();
            *state = ConnectionState::Disconnected;
            self.state_changed.notify_all();
        }

        let current = thread::current().id();
        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in threads {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }

        // Frees the local port for the next connect
        self.socket.write().take();

        debug!("session with {} closed: {}", self.server_addr, reason);
        if previous == ConnectionState::Connecting {
            self.handler.on_connection_failed(&reason);
        } else {
            self.handler.on_disconnected(&reason);
        }
    }

    fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        while self.running.load(Ordering::Acquire) {
            let received = match self.socket.read().as_ref() {
                Some(socket) => socket.recv_from(&mut buf),
                None => break,
            };
            match received {
                Ok((len, from)) => self.handle_datagram(&buf[..len], from),
                Err(e) if e.is_transient() => continue,
                Err(e) => {
                    if self.running.load(Ordering::Acquire) {
                        warn!("receive failed: {}", e);
                        self.shutdown(DisconnectReason::Io(e.to_string()), false);
                    }
                    break;
                }
            }
        }
    }

    fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) {
        if from != self.server_addr {
            trace!("dropping datagram from unexpected address {}", from);
            return;
        }
        if datagram.is_empty() {
            return;
        }

        self.last_activity
            .store(self.clock.millis(), Ordering::Relaxed);
        self.counters.datagram_received(datagram.len());

        let message = match Message::from_bytes(datagram) {
            Ok(message) => message,
            Err(e) => {
                trace!("dropping malformed datagram: {}", e);
                return;
            }
        };

        match message {
            Message::Accept => {
                let accepted = {
                    let mut state = self.state.lock();
                    if *state == ConnectionState::Connecting {
                        *state = ConnectionState::Connected;
                        self.state_changed.notify_all();
                        true
                    } else {
                        false
                    }
                };
                if accepted {
                    debug!("connected to {}", self.server_addr);
                    self.handler.on_connected();
                }
            }
            Message::Disconnect { reason } => {
                let reason = if self.state() == ConnectionState::Connecting {
                    DisconnectReason::Rejected(reason)
                } else {
                    DisconnectReason::Remote(reason)
                };
                self.shutdown(reason, false);
            }
            Message::Data { payload, .. } if payload.is_empty() => {
                trace!("dropping empty DATA");
            }
            Message::Data { channel, payload } => {
                if self.state() == ConnectionState::Connected {
                    self.counters.message_received(false);
                    let mut reader = Reader::new(&payload);
                    self.handler.on_unreliable(channel, &mut reader);
                }
            }
            Message::Ping { timestamp } => {
                if let Err(e) = self.send_message(&Message::Pong { timestamp }) {
                    trace!("failed to send PONG: {}", e);
                }
            }
            Message::Pong { timestamp } => {
                let rtt = self.clock.millis() - timestamp;
                if rtt >= 0 {
                    self.latency.store(rtt, Ordering::Relaxed);
                    self.handler
                        .on_latency_update(rtt.min(u32::MAX as i64) as u32);
                }
            }
            Message::Reliable { datagram } => {
                if let Err(e) = self.channel.input(&datagram) {
                    trace!("dropping reliable datagram: {}", e);
                }
            }
            Message::Connect { .. } => {
                trace!("ignoring CONNECT from server");
            }
        }
    }

    fn update_loop(self: Arc<Self>) {
        let interval = self.config.update_interval();
        let mut ping_timer = Timer::new(self.config.ping_interval());
        let mut connect_timer = Timer::new(self.config.connect_retry());
        let inactivity = self.config.inactivity_timeout_ms as i64;

        while self.running.load(Ordering::Acquire) {
            let messages = self.channel.update_and_drain(self.clock.now_ms());
            self.flush_outbound();

            for message in messages {
                self.counters.message_received(true);
                self.handler.on_data(message, DeliveryMode::Reliable);
            }

            match self.state() {
                ConnectionState::Connecting => {
                    if connect_timer.check_and_reset() {
                        let connect = Message::Connect {
                            key: self.key.clone(),
                        };
                        if let Err(e) = self.send_message(&connect) {
                            trace!("CONNECT retry failed: {}", e);
                        }
                    }
                }
                ConnectionState::Connected => {
                    if ping_timer.check_and_reset() {
                        let ping = Message::Ping {
                            timestamp: self.clock.millis(),
                        };
                        if let Err(e) = self.send_message(&ping) {
                            trace!("failed to send PING: {}", e);
                        }
                    }

                    let idle = self.clock.millis() - self.last_activity.load(Ordering::Relaxed);
                    if idle > inactivity {
                        debug!("no traffic from {} for {} ms", self.server_addr, idle);
                        self.shutdown(DisconnectReason::Timeout, true);
                        break;
                    }

                    if self.channel.is_dead() {
                        warn!("reliable link to {} is dead", self.server_addr);
                        self.shutdown(DisconnectReason::DeadLink, true);
                        break;
                    }
                }
                ConnectionState::Disconnecting | ConnectionState::Disconnected => {}
            }

            thread::sleep(interval);
        }
    }

    fn flush_outbound(&self) {
        self.channel.drain_outbound(|datagram| {
            if let Err(e) = self.send_raw(&Message::frame_reliable(&datagram)) {
                trace!("failed to send reliable datagram: {}", e);
            }
        });
    }
}
