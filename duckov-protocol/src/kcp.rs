//! ARQ Engine
//!
//! A KCP-style selective-repeat engine. The engine never touches a socket:
//! outgoing datagrams go to an output callback, incoming datagrams are fed
//! through [`Kcp::input`], and time is advanced explicitly with
//! [`Kcp::update`]. Timestamps are wrapping `u32` milliseconds.

use crate::buffer::{BufferError, ReceiveBuffer, SendBuffer};
use crate::congestion::CongestionWindow;
use crate::rtt::RttEstimator;
use crate::segment::{Command, Segment, SegmentHeader, DEFAULT_MTU, HEADER_SIZE};
use crate::sequence::{time_diff, SeqNumber};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

/// Default send window (segments)
pub const WND_SND: u32 = 32;
/// Default receive window (segments)
pub const WND_RCV: u32 = 128;
/// Default flush interval (ms)
pub const INTERVAL: u32 = 100;
/// Transmissions of one segment after which the link is considered dead
pub const DEAD_LINK: u32 = 20;
/// Fast retransmissions allowed per segment
pub const FAST_LIMIT: u32 = 5;
/// Initial window probe wait (ms)
pub const PROBE_INIT: u32 = 7_000;
/// Maximum window probe wait (ms)
pub const PROBE_LIMIT: u32 = 120_000;
/// Largest MTU a single UDP datagram can carry over IPv4
pub const MAX_MTU: usize = 65_507;
/// Hard cap on fragments per message (`frg` is one byte)
pub const MAX_FRAGMENTS: usize = 255;

const ASK_SEND: u8 = 1;
const ASK_TELL: u8 = 2;

/// Clock drift beyond which the flush schedule is re-anchored (ms)
const MAX_CLOCK_SLAP: i32 = 10_000;

/// Engine errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KcpError {
    #[error("No message available")]
    WouldBlock,

    #[error("Message fragments still missing")]
    Incomplete,

    #[error("Message too large: {size} bytes (limit {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Malformed datagram: {0}")]
    Malformed(&'static str),

    #[error("Conversation mismatch: expected {expected}, got {actual}")]
    ConvMismatch { expected: u32, actual: u32 },

    #[error("Cannot send an empty message")]
    EmptyMessage,

    #[error("Invalid MTU: {0}")]
    InvalidMtu(usize),
}

impl From<BufferError> for KcpError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::Empty => KcpError::WouldBlock,
            BufferError::Incomplete => KcpError::Incomplete,
        }
    }
}

/// Link state as seen by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KcpState {
    Active,
    /// Some segment reached the dead-link transmit count
    DeadLink,
}

/// Engine tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KcpConfig {
    /// Maximum datagram size
    pub mtu: usize,
    /// Flush interval (ms), clamped to 10..=5000
    pub interval: u32,
    /// Lower RTO floor and gentler RTO backoff
    pub nodelay: bool,
    /// Duplicate-ACK count that triggers a fast retransmit (0 disables)
    pub fast_resend: u32,
    /// Ignore the congestion window
    pub no_congestion_window: bool,
    pub send_window: u32,
    pub recv_window: u32,
    pub dead_link: u32,
    /// Fast retransmissions allowed per segment (0 means unlimited)
    pub fast_limit: u32,
}

impl Default for KcpConfig {
    fn default() -> Self {
        KcpConfig {
            mtu: DEFAULT_MTU,
            interval: INTERVAL,
            nodelay: false,
            fast_resend: 0,
            no_congestion_window: false,
            send_window: WND_SND,
            recv_window: WND_RCV,
            dead_link: DEAD_LINK,
            fast_limit: FAST_LIMIT,
        }
    }
}

impl KcpConfig {
    /// Low-latency tuning used by game channels
    pub fn channel() -> Self {
        KcpConfig {
            mtu: 1200,
            interval: 10,
            nodelay: true,
            fast_resend: 2,
            no_congestion_window: true,
            send_window: 128,
            recv_window: 128,
            ..Default::default()
        }
    }
}

/// Engine statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KcpStats {
    pub srtt: u32,
    pub rttval: u32,
    pub rto: u32,
    pub cwnd: u32,
    pub ssthresh: u32,
    /// Segments in flight
    pub inflight: usize,
    /// Segments waiting for first transmission
    pub send_queue: usize,
    /// Segments waiting to be read
    pub recv_queue: usize,
    /// Retransmissions after RTO expiry
    pub retransmissions: u64,
    pub fast_retransmissions: u64,
    pub segments_sent: u64,
    pub segments_received: u64,
    pub datagrams_sent: u64,
}

/// Datagram sink invoked with each coalesced datagram
pub type OutputFn = Box<dyn FnMut(&[u8]) + Send>;

/// Coalesces segments into MTU-sized datagrams
struct Output {
    buf: BytesMut,
    mtu: usize,
    sink: OutputFn,
    datagrams: u64,
}

impl Output {
    fn push(&mut self, segment: &Segment) {
        if !self.buf.is_empty() && self.buf.len() + segment.size() > self.mtu {
            self.flush();
        }
        segment.encode(&mut self.buf);
    }

    fn flush(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        (self.sink)(&self.buf);
        self.buf.clear();
        self.datagrams += 1;
    }
}

/// KCP-style ARQ engine for one conversation
pub struct Kcp {
    conv: u32,
    mss: usize,
    state: KcpState,

    snd: SendBuffer,
    rcv: ReceiveBuffer,
    rtt: RttEstimator,
    cwnd: CongestionWindow,

    snd_wnd: u32,
    rmt_wnd: u32,

    current: u32,
    interval: u32,
    ts_flush: u32,
    updated: bool,

    ts_probe: u32,
    probe_wait: u32,
    probe: u8,

    nodelay: bool,
    fast_resend: u32,
    fast_limit: u32,
    no_cwnd: bool,
    dead_link: u32,

    /// Pending ACKs as (sn, ts)
    acklist: Vec<(SeqNumber, u32)>,
    output: Output,
    stats: KcpStats,
}

impl Kcp {
    /// Create an engine with default tuning
    pub fn new<F>(conv: u32, output: F) -> Self
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let mss = DEFAULT_MTU - HEADER_SIZE;
        Kcp {
            conv,
            mss,
            state: KcpState::Active,
            snd: SendBuffer::new(),
            rcv: ReceiveBuffer::new(WND_RCV),
            rtt: RttEstimator::new(INTERVAL),
            cwnd: CongestionWindow::new(mss as u32),
            snd_wnd: WND_SND,
            rmt_wnd: WND_RCV,
            current: 0,
            interval: INTERVAL,
            ts_flush: INTERVAL,
            updated: false,
            ts_probe: 0,
            probe_wait: 0,
            probe: 0,
            nodelay: false,
            fast_resend: 0,
            fast_limit: FAST_LIMIT,
            no_cwnd: false,
            dead_link: DEAD_LINK,
            acklist: Vec::new(),
            output: Output {
                buf: BytesMut::with_capacity(DEFAULT_MTU * 3),
                mtu: DEFAULT_MTU,
                sink: Box::new(output),
                datagrams: 0,
            },
            stats: KcpStats::default(),
        }
    }

    /// Create an engine and apply `config`
    pub fn with_config<F>(conv: u32, config: &KcpConfig, output: F) -> Result<Self, KcpError>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let mut kcp = Kcp::new(conv, output);
        kcp.set_mtu(config.mtu)?;
        kcp.set_nodelay(
            config.nodelay,
            config.interval,
            config.fast_resend,
            config.no_congestion_window,
        );
        kcp.set_window_size(config.send_window, config.recv_window);
        kcp.set_dead_link(config.dead_link);
        kcp.fast_limit = config.fast_limit;
        Ok(kcp)
    }

    pub fn conv(&self) -> u32 {
        self.conv
    }

    /// Maximum payload bytes per segment
    pub fn mss(&self) -> usize {
        self.mss
    }

    pub fn state(&self) -> KcpState {
        self.state
    }

    pub fn is_dead(&self) -> bool {
        self.state == KcpState::DeadLink
    }

    /// Segments queued or in flight
    pub fn wait_snd(&self) -> usize {
        self.snd.pending()
    }

    /// Remote receive window as last advertised
    pub fn remote_window(&self) -> u32 {
        self.rmt_wnd
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn stats(&self) -> KcpStats {
        KcpStats {
            srtt: self.rtt.srtt(),
            rttval: self.rtt.rttval(),
            rto: self.rtt.rto(),
            cwnd: self.cwnd.cwnd(),
            ssthresh: self.cwnd.ssthresh(),
            inflight: self.snd.inflight_len(),
            send_queue: self.snd.queue_len(),
            recv_queue: self.rcv.queue_len(),
            datagrams_sent: self.output.datagrams,
            ..self.stats.clone()
        }
    }

    /// Configure latency-related tuning
    pub fn set_nodelay(&mut self, nodelay: bool, interval: u32, fast_resend: u32, no_cwnd: bool) {
        self.nodelay = nodelay;
        self.rtt.set_nodelay(nodelay);
        self.interval = interval.clamp(10, 5000);
        self.rtt.set_interval(self.interval);
        self.fast_resend = fast_resend;
        self.no_cwnd = no_cwnd;
    }

    /// Set send and receive windows; zero leaves a window unchanged
    pub fn set_window_size(&mut self, send: u32, recv: u32) {
        if send > 0 {
            self.snd_wnd = send;
        }
        if recv > 0 {
            self.rcv.set_window(recv);
        }
    }

    pub fn set_mtu(&mut self, mtu: usize) -> Result<(), KcpError> {
        if mtu < 50 || mtu < HEADER_SIZE || mtu > MAX_MTU {
            return Err(KcpError::InvalidMtu(mtu));
        }
        self.output.mtu = mtu;
        self.mss = mtu - HEADER_SIZE;
        self.cwnd.set_mss(self.mss as u32);
        Ok(())
    }

    pub fn set_dead_link(&mut self, dead_link: u32) {
        self.dead_link = dead_link.max(1);
    }

    /// Largest message accepted by [`send`](Self::send)
    pub fn max_message_size(&self) -> usize {
        self.max_fragments() * self.mss
    }

    fn max_fragments(&self) -> usize {
        MAX_FRAGMENTS.min(self.rcv.window() as usize)
    }

    /// Queue a message, splitting it into MSS-sized fragments
    pub fn send(&mut self, data: &[u8]) -> Result<(), KcpError> {
        if data.is_empty() {
            return Err(KcpError::EmptyMessage);
        }

        let count = (data.len() + self.mss - 1) / self.mss;
        if count > self.max_fragments() {
            return Err(KcpError::TooLarge {
                size: data.len(),
                max: self.max_message_size(),
            });
        }

        for (i, chunk) in data.chunks(self.mss).enumerate() {
            let mut segment = Segment::new(Command::Push, Bytes::copy_from_slice(chunk));
            segment.frg = (count - i - 1) as u8;
            self.snd.enqueue(segment);
        }
        Ok(())
    }

    /// Feed one datagram received from the peer
    pub fn input(&mut self, data: &[u8]) -> Result<(), KcpError> {
        if data.len() < HEADER_SIZE {
            return Err(KcpError::Malformed("datagram shorter than segment header"));
        }

        let prev_una = self.snd.snd_una();
        let mut max_ack: Option<SeqNumber> = None;
        let result = self.input_segments(data, &mut max_ack);

        if let Some(max_ack) = max_ack {
            self.snd.mark_fast_ack(max_ack);
        }

        if self.snd.snd_una().gt(prev_una) && self.cwnd.cwnd() < self.rmt_wnd {
            self.cwnd.on_ack_advance(self.rmt_wnd);
        }

        result
    }

    fn input_segments(
        &mut self,
        data: &[u8],
        max_ack: &mut Option<SeqNumber>,
    ) -> Result<(), KcpError> {
        let mut rest = data;

        while rest.len() >= HEADER_SIZE {
            let header = SegmentHeader::from_bytes(rest)
                .map_err(|_| KcpError::Malformed("truncated segment header"))?;

            if header.conv != self.conv {
                return Err(KcpError::ConvMismatch {
                    expected: self.conv,
                    actual: header.conv,
                });
            }

            let len = header
                .payload_len()
                .map_err(|_| KcpError::Malformed("negative segment length"))?;
            if rest.len() < HEADER_SIZE + len {
                return Err(KcpError::Malformed("truncated segment payload"));
            }

            let cmd = Command::from_u8(header.cmd)
                .ok_or(KcpError::Malformed("unknown segment command"))?;

            let payload = &rest[HEADER_SIZE..HEADER_SIZE + len];
            rest = &rest[HEADER_SIZE + len..];
            self.stats.segments_received += 1;

            self.rmt_wnd = header.wnd as u32;
            self.snd.acknowledge_up_to(SeqNumber::new(header.una));
            self.snd.shrink();

            let sn = SeqNumber::new(header.sn);
            match cmd {
                Command::Ack => {
                    let rtt = time_diff(self.current, header.ts);
                    if rtt >= 0 {
                        self.rtt.update(rtt as u32);
                    }
                    self.snd.acknowledge(sn);
                    self.snd.shrink();
                    match max_ack {
                        Some(max) if sn.le(*max) => {}
                        _ => *max_ack = Some(sn),
                    }
                }
                Command::Push => {
                    if self.rcv.in_window(sn) {
                        self.acklist.push((sn, header.ts));
                        if sn.ge(self.rcv.rcv_nxt()) {
                            let segment = Segment {
                                conv: header.conv,
                                cmd,
                                frg: header.frg,
                                wnd: header.wnd,
                                ts: header.ts,
                                sn,
                                una: SeqNumber::new(header.una),
                                resend_ts: 0,
                                rto: 0,
                                fastack: 0,
                                xmit: 0,
                                payload: Bytes::copy_from_slice(payload),
                            };
                            if !self.rcv.insert(segment) {
                                trace!(sn = header.sn, "duplicate segment");
                            }
                        }
                    } else {
                        trace!(sn = header.sn, "segment outside receive window");
                    }
                }
                Command::WindowAsk => {
                    self.probe |= ASK_TELL;
                }
                Command::WindowTell => {}
            }
        }

        Ok(())
    }

    /// Size of the next complete message
    pub fn peek_size(&self) -> Result<usize, KcpError> {
        Ok(self.rcv.peek_size()?)
    }

    /// Pop one complete message into `buf`, returning its length
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, KcpError> {
        let size = self.peek_size()?;
        if size > buf.len() {
            return Err(KcpError::TooLarge {
                size,
                max: buf.len(),
            });
        }

        let recover = self.rcv.is_full();
        let n = self.rcv.pop_message_into(buf);
        self.after_recv(recover);
        Ok(n)
    }

    /// Pop one complete message as owned bytes
    pub fn recv_bytes(&mut self) -> Result<Bytes, KcpError> {
        let recover = self.rcv.is_full();
        let message = self.rcv.pop_message()?;
        self.after_recv(recover);
        Ok(message)
    }

    fn after_recv(&mut self, recover: bool) {
        self.rcv.promote();
        // Tell the peer the window reopened
        if recover && !self.rcv.is_full() {
            self.probe |= ASK_TELL;
        }
    }

    /// Advance the engine clock, flushing when due
    pub fn update(&mut self, now: u32) {
        self.current = now;

        if !self.updated {
            self.updated = true;
            self.ts_flush = now;
        }

        let mut slap = time_diff(now, self.ts_flush);
        if !(-MAX_CLOCK_SLAP..MAX_CLOCK_SLAP).contains(&slap) {
            self.ts_flush = now;
            slap = 0;
        }

        if slap >= 0 {
            self.ts_flush = self.ts_flush.wrapping_add(self.interval);
            if time_diff(now, self.ts_flush) >= 0 {
                self.ts_flush = now.wrapping_add(self.interval);
            }
            self.flush();
        }
    }

    /// Timestamp at which [`update`](Self::update) should next be called
    pub fn check(&self, now: u32) -> u32 {
        if !self.updated {
            return now;
        }

        let mut ts_flush = self.ts_flush;
        let slap = time_diff(now, ts_flush);
        if !(-MAX_CLOCK_SLAP..MAX_CLOCK_SLAP).contains(&slap) {
            ts_flush = now;
        }
        if time_diff(now, ts_flush) >= 0 {
            return now;
        }

        let tm_flush = time_diff(ts_flush, now);
        let mut tm_packet = i32::MAX;
        for segment in self.snd.inflight() {
            let diff = time_diff(segment.resend_ts, now);
            if diff <= 0 {
                return now;
            }
            tm_packet = tm_packet.min(diff);
        }

        let minimal = (tm_packet.min(tm_flush) as u32).min(self.interval);
        now.wrapping_add(minimal)
    }

    fn control_segment(&self, cmd: Command, wnd: u16, una: SeqNumber) -> Segment {
        let mut segment = Segment::new(cmd, Bytes::new());
        segment.conv = self.conv;
        segment.wnd = wnd;
        segment.una = una;
        segment
    }

    /// Emit pending ACKs, probes, new data and retransmissions
    pub fn flush(&mut self) {
        if !self.updated {
            return;
        }

        let current = self.current;
        let wnd = self.rcv.free_window();
        let una = self.rcv.rcv_nxt();

        // ACKs
        let mut ack = self.control_segment(Command::Ack, wnd, una);
        for (sn, ts) in self.acklist.drain(..) {
            ack.sn = sn;
            ack.ts = ts;
            self.output.push(&ack);
            self.stats.segments_sent += 1;
        }

        // Window probing while the peer advertises zero
        if self.rmt_wnd == 0 {
            if self.probe_wait == 0 {
                self.probe_wait = PROBE_INIT;
                self.ts_probe = current.wrapping_add(self.probe_wait);
            } else if time_diff(current, self.ts_probe) >= 0 {
                self.probe_wait = self.probe_wait.max(PROBE_INIT);
                self.probe_wait += self.probe_wait / 2;
                self.probe_wait = self.probe_wait.min(PROBE_LIMIT);
                self.ts_probe = current.wrapping_add(self.probe_wait);
                self.probe |= ASK_SEND;
            }
        } else {
            self.ts_probe = 0;
            self.probe_wait = 0;
        }

        if self.probe & ASK_SEND != 0 {
            let seg = self.control_segment(Command::WindowAsk, wnd, una);
            self.output.push(&seg);
            self.stats.segments_sent += 1;
        }
        if self.probe & ASK_TELL != 0 {
            let seg = self.control_segment(Command::WindowTell, wnd, una);
            self.output.push(&seg);
            self.stats.segments_sent += 1;
        }
        self.probe = 0;

        // Move new data into flight
        let mut window = self.snd_wnd.min(self.rmt_wnd);
        if !self.no_cwnd {
            window = window.min(self.cwnd.cwnd());
        }
        let rto = self.rtt.rto();
        while self.snd.can_promote(window) {
            if let Some(segment) = self.snd.promote() {
                segment.conv = self.conv;
                segment.cmd = Command::Push;
                segment.wnd = wnd;
                segment.ts = current;
                segment.una = una;
                segment.resend_ts = current;
                segment.rto = rto;
                segment.fastack = 0;
                segment.xmit = 0;
            }
        }

        let resent = if self.fast_resend > 0 {
            self.fast_resend
        } else {
            u32::MAX
        };
        let rto_min = if self.nodelay { 0 } else { rto >> 3 };

        let mut change = false;
        let mut lost = false;
        let mut dead = false;

        for segment in self.snd.inflight_mut() {
            let mut needsend = false;

            if segment.xmit == 0 {
                needsend = true;
                segment.xmit += 1;
                segment.rto = rto;
                segment.resend_ts = current.wrapping_add(segment.rto + rto_min);
            } else if time_diff(current, segment.resend_ts) >= 0 {
                needsend = true;
                segment.xmit += 1;
                self.stats.retransmissions += 1;
                if self.nodelay {
                    segment.rto += segment.rto / 2;
                } else {
                    segment.rto += segment.rto.max(rto);
                }
                segment.resend_ts = current.wrapping_add(segment.rto);
                lost = true;
            } else if segment.fastack >= resent
                && (segment.xmit <= self.fast_limit || self.fast_limit == 0)
            {
                needsend = true;
                segment.xmit += 1;
                segment.fastack = 0;
                segment.resend_ts = current.wrapping_add(segment.rto);
                self.stats.fast_retransmissions += 1;
                change = true;
            }

            if needsend {
                segment.ts = current;
                segment.wnd = wnd;
                segment.una = una;
                self.output.push(segment);
                self.stats.segments_sent += 1;

                if segment.xmit >= self.dead_link {
                    dead = true;
                }
            }
        }

        self.output.flush();

        if dead && self.state != KcpState::DeadLink {
            debug!(conv = self.conv, "dead link detected");
            self.state = KcpState::DeadLink;
        }

        if change {
            let inflight = (self.snd.snd_nxt() - self.snd.snd_una()).max(0) as u32;
            self.cwnd.on_fast_retransmit(inflight, self.fast_resend);
        }
        if lost {
            self.cwnd.on_timeout();
        }
        self.cwnd.ensure_minimum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::{channel, Receiver};

    fn engine(conv: u32) -> (Kcp, Receiver<Vec<u8>>) {
        let (tx, rx) = channel();
        let kcp = Kcp::new(conv, move |data: &[u8]| {
            let _ = tx.send(data.to_vec());
        });
        (kcp, rx)
    }

    fn deliver(rx: &Receiver<Vec<u8>>, to: &mut Kcp) {
        while let Ok(datagram) = rx.try_recv() {
            to.input(&datagram).unwrap();
        }
    }

    /// Run both engines for `ms` milliseconds of virtual time
    fn pump(
        a: &mut Kcp,
        a_rx: &Receiver<Vec<u8>>,
        b: &mut Kcp,
        b_rx: &Receiver<Vec<u8>>,
        now: &mut u32,
        ms: u32,
    ) {
        let end = *now + ms;
        while *now < end {
            a.update(*now);
            b.update(*now);
            deliver(a_rx, b);
            deliver(b_rx, a);
            *now += 10;
        }
    }

    #[test]
    fn test_send_recv() {
        let (mut a, a_rx) = engine(1);
        let (mut b, b_rx) = engine(1);
        let mut now = 1000;

        a.send(b"hello").unwrap();
        a.send(b"world").unwrap();
        pump(&mut a, &a_rx, &mut b, &b_rx, &mut now, 500);

        assert_eq!(b.recv_bytes().unwrap().as_ref(), b"hello");
        assert_eq!(b.recv_bytes().unwrap().as_ref(), b"world");
        assert_eq!(b.recv_bytes(), Err(KcpError::WouldBlock));
        assert_eq!(a.wait_snd(), 0);
    }

    #[test]
    fn test_fragmentation() {
        let (mut a, a_rx) = engine(1);
        let (mut b, b_rx) = engine(1);
        let mut now = 0;

        let message: Vec<u8> = (0..a.mss() * 3 + 1).map(|i| i as u8).collect();
        a.send(&message).unwrap();
        assert_eq!(a.wait_snd(), 4);

        pump(&mut a, &a_rx, &mut b, &b_rx, &mut now, 1000);

        assert_eq!(b.peek_size().unwrap(), message.len());
        let mut buf = vec![0u8; message.len()];
        assert_eq!(b.recv(&mut buf).unwrap(), message.len());
        assert_eq!(buf, message);
    }

    #[test]
    fn test_send_errors() {
        let (mut a, _rx) = engine(1);
        assert_eq!(a.send(b""), Err(KcpError::EmptyMessage));

        let too_big = vec![0u8; a.max_message_size() + 1];
        assert!(matches!(a.send(&too_big), Err(KcpError::TooLarge { .. })));

        let just_fits = vec![0u8; a.max_message_size()];
        assert!(a.send(&just_fits).is_ok());
    }

    #[test]
    fn test_recv_buffer_too_small() {
        let (mut a, a_rx) = engine(1);
        let (mut b, b_rx) = engine(1);
        let mut now = 0;

        a.send(b"0123456789").unwrap();
        pump(&mut a, &a_rx, &mut b, &b_rx, &mut now, 200);

        let mut small = [0u8; 4];
        assert_eq!(
            b.recv(&mut small),
            Err(KcpError::TooLarge { size: 10, max: 4 })
        );
        // Message is still there
        assert_eq!(b.peek_size(), Ok(10));
    }

    #[test]
    fn test_malformed_input() {
        let (mut a, _rx) = engine(7);
        assert!(matches!(a.input(&[0u8; 10]), Err(KcpError::Malformed(_))));

        let mut seg = Segment::new(Command::Push, Bytes::from_static(b"abc"));
        seg.conv = 8;
        assert_eq!(
            a.input(&seg.to_bytes()),
            Err(KcpError::ConvMismatch {
                expected: 7,
                actual: 8
            })
        );

        seg.conv = 7;
        let bytes = seg.to_bytes();
        assert!(matches!(
            a.input(&bytes[..bytes.len() - 1]),
            Err(KcpError::Malformed(_))
        ));

        let mut bytes = seg.to_bytes();
        bytes[4] = 42;
        assert!(matches!(a.input(&bytes), Err(KcpError::Malformed(_))));

        let mut bytes = seg.to_bytes();
        bytes[20..24].copy_from_slice(&(-5i32).to_le_bytes());
        assert!(matches!(a.input(&bytes), Err(KcpError::Malformed(_))));
    }

    #[test]
    fn test_retransmit_after_drop() {
        let (mut a, a_rx) = engine(1);
        let (mut b, b_rx) = engine(1);
        let mut now = 0;

        a.send(b"lost once").unwrap();
        a.update(now);
        // Drop the first transmission
        assert!(a_rx.try_recv().is_ok());

        pump(&mut a, &a_rx, &mut b, &b_rx, &mut now, 2000);
        assert_eq!(b.recv_bytes().unwrap().as_ref(), b"lost once");
        assert!(a.stats().retransmissions >= 1);
    }

    #[test]
    fn test_check_schedule() {
        let (mut a, _rx) = engine(1);
        assert_eq!(a.check(500), 500);

        a.update(500);
        let next = a.check(500);
        assert!(next > 500 && next <= 500 + a.interval());
    }

    #[test]
    fn test_dead_link() {
        let (mut a, _rx) = engine(1);
        a.set_dead_link(3);
        a.set_nodelay(true, 10, 0, true);
        a.send(b"nobody listens").unwrap();

        let mut now = 0;
        while !a.is_dead() && now < 60_000 {
            a.update(now);
            now += 10;
        }
        assert_eq!(a.state(), KcpState::DeadLink);
    }

    #[test]
    fn test_window_probe() {
        let (mut a, rx) = engine(1);
        a.update(0);

        // Peer reports a closed window
        let mut tell = Segment::new(Command::WindowTell, Bytes::new());
        tell.conv = 1;
        tell.wnd = 0;
        a.input(&tell.to_bytes()).unwrap();
        assert_eq!(a.remote_window(), 0);

        a.update(100);
        let mut now = 100;
        while now <= 100 + PROBE_INIT + 200 {
            a.update(now);
            now += 100;
        }

        let asked = rx.try_iter().any(|datagram| {
            Segment::iter_datagram(&datagram)
                .filter_map(Result::ok)
                .any(|seg| seg.cmd == Command::WindowAsk)
        });
        assert!(asked);
    }

    #[test]
    fn test_window_ask_answered() {
        let (mut a, rx) = engine(1);
        a.update(0);

        let mut ask = Segment::new(Command::WindowAsk, Bytes::new());
        ask.conv = 1;
        ask.wnd = 128;
        a.input(&ask.to_bytes()).unwrap();
        a.flush();

        let tells: Vec<Segment> = rx
            .try_iter()
            .flat_map(|d| Segment::iter_datagram(&d).filter_map(Result::ok).collect::<Vec<_>>())
            .filter(|seg| seg.cmd == Command::WindowTell)
            .collect();
        assert_eq!(tells.len(), 1);
        assert_eq!(tells[0].wnd, WND_RCV as u16);
    }

    #[test]
    fn test_invalid_mtu() {
        let (mut a, _rx) = engine(1);
        assert_eq!(a.set_mtu(20), Err(KcpError::InvalidMtu(20)));
        assert!(a.set_mtu(576).is_ok());
        assert_eq!(a.mss(), 576 - HEADER_SIZE);
        assert_eq!(a.set_mtu(MAX_MTU + 1), Err(KcpError::InvalidMtu(MAX_MTU + 1)));
        assert_eq!(a.mss(), 576 - HEADER_SIZE);
        assert!(a.set_mtu(MAX_MTU).is_ok());
        assert_eq!(a.mss(), MAX_MTU - HEADER_SIZE);
    }

    #[test]
    fn test_channel_config() {
        let config = KcpConfig::channel();
        let kcp = Kcp::with_config(1, &config, |_: &[u8]| {}).unwrap();
        assert_eq!(kcp.mss(), 1200 - HEADER_SIZE);
        assert_eq!(kcp.interval(), 10);
        assert_eq!(kcp.stats().rto, 200);
    }
}
