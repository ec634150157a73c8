//! Reliable channel wrapper
//!
//! [`KcpChannel`] binds one ARQ engine to a session. The engine sits behind a
//! single mutex; its output callback only pushes datagrams into an unbounded
//! queue, and the owner writes them to the socket after the lock is released.

use bytes::Bytes;
use crossbeam::channel::{unbounded, Receiver};
use duckov_protocol::{Kcp, KcpConfig, KcpError, KcpStats};
use parking_lot::Mutex;
use tracing::trace;

/// Conversation id used by client and server channels
pub const DEFAULT_CONV: u32 = 1;

/// Thread-safe wrapper around one [`Kcp`] engine
pub struct KcpChannel {
    kcp: Mutex<Kcp>,
    outbound: Receiver<Bytes>,
}

impl KcpChannel {
    /// Channel bound to `conv`; the game uses [`KcpConfig::channel`]
    pub fn with_config(conv: u32, config: &KcpConfig) -> Result<Self, KcpError> {
        let (tx, rx) = unbounded();
        let kcp = Kcp::with_config(conv, config, move |datagram: &[u8]| {
            let _ = tx.send(Bytes::copy_from_slice(datagram));
        })?;

        Ok(KcpChannel {
            kcp: Mutex::new(kcp),
            outbound: rx,
        })
    }

    /// Queue a reliable message
    pub fn send(&self, data: &[u8]) -> Result<(), KcpError> {
        self.kcp.lock().send(data)
    }

    /// Feed a datagram received from the peer
    pub fn input(&self, datagram: &[u8]) -> Result<(), KcpError> {
        self.kcp.lock().input(datagram)
    }

    /// Tick the engine and collect every message that became complete
    pub fn update_and_drain(&self, now: u32) -> Vec<Bytes> {
        let mut kcp = self.kcp.lock();
        kcp.update(now);

        let mut messages = Vec::new();
        loop {
            match kcp.recv_bytes() {
                Ok(message) => messages.push(message),
                Err(KcpError::WouldBlock) | Err(KcpError::Incomplete) => break,
                Err(e) => {
                    trace!("recv stopped: {}", e);
                    break;
                }
            }
        }
        messages
    }

    /// Hand every queued outbound datagram to `sink`; returns how many
    pub fn drain_outbound<F>(&self, mut sink: F) -> usize
    where
        F: FnMut(Bytes),
    {
        let mut count = 0;
        while let Ok(datagram) = self.outbound.try_recv() {
            sink(datagram);
            count += 1;
        }
        count
    }

    pub fn is_dead(&self) -> bool {
        self.kcp.lock().is_dead()
    }

    pub fn stats(&self) -> KcpStats {
        self.kcp.lock().stats()
    }

    /// Segments queued or not yet acknowledged by the peer
    pub fn wait_snd(&self) -> usize {
        self.kcp.lock().wait_snd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> KcpChannel {
        KcpChannel::with_config(DEFAULT_CONV, &KcpConfig::channel()).unwrap()
    }

    fn exchange(from: &KcpChannel, to: &KcpChannel) {
        from.drain_outbound(|datagram| to.input(&datagram).unwrap());
    }

    #[test]
    fn test_channel_roundtrip() {
        let a = channel();
        let b = channel();

        a.send(b"first").unwrap();
        a.send(b"second").unwrap();

        let mut received = Vec::new();
        let mut now = 0;
        while received.len() < 2 && now < 1000 {
            a.update_and_drain(now);
            exchange(&a, &b);
            received.extend(b.update_and_drain(now));
            exchange(&b, &a);
            now += 10;
        }

        assert_eq!(received, vec![Bytes::from("first"), Bytes::from("second")]);
    }

    #[test]
    fn test_outbound_is_queued_not_sent() {
        let a = channel();
        a.send(b"queued").unwrap();
        assert_eq!(a.wait_snd(), 1);

        a.update_and_drain(0);
        let mut datagrams = Vec::new();
        assert_eq!(a.drain_outbound(|d| datagrams.push(d)), 1);
        assert!(datagrams[0].len() > b"queued".len());
        assert_eq!(a.drain_outbound(|_| {}), 0);
    }

    #[test]
    fn test_rejects_garbage() {
        let a = channel();
        assert!(a.input(&[1, 2, 3]).is_err());
        assert!(!a.is_dead());
    }
}
