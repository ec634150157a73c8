//! Congestion Window
//!
//! Loss-based window control: slow start until `ssthresh`, then roughly one
//! MSS per round trip of additive increase. Timeout loss halves the window and
//! fast retransmit enters fast recovery.

/// Initial slow start threshold (segments)
pub const THRESH_INIT: u32 = 2;
/// Lower bound on the slow start threshold
pub const THRESH_MIN: u32 = 2;

/// Congestion window state
#[derive(Debug, Clone)]
pub struct CongestionWindow {
    /// Congestion window (segments)
    cwnd: u32,
    /// Slow start threshold (segments)
    ssthresh: u32,
    /// Byte budget used for additive increase
    incr: u32,
    mss: u32,
}

impl CongestionWindow {
    /// Create a window of one segment
    pub fn new(mss: u32) -> Self {
        CongestionWindow {
            cwnd: 1,
            ssthresh: THRESH_INIT,
            incr: mss,
            mss,
        }
    }

    /// Current congestion window in segments
    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn in_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh
    }

    pub fn set_mss(&mut self, mss: u32) {
        self.mss = mss;
        if self.incr < mss {
            self.incr = mss;
        }
    }

    /// Grow after the cumulative ack advanced.
    ///
    /// The window never grows past the peer's advertised window.
    pub fn on_ack_advance(&mut self, remote_window: u32) {
        if self.cwnd >= remote_window {
            return;
        }

        let mss = self.mss.max(1);
        if self.cwnd < self.ssthresh {
            self.cwnd += 1;
            self.incr = self.incr.saturating_add(mss);
        } else {
            if self.incr < mss {
                self.incr = mss;
            }
            let step = (u64::from(mss) * u64::from(mss)) / u64::from(self.incr);
            let step = u32::try_from(step).unwrap_or(u32::MAX);
            self.incr = self.incr.saturating_add(step.saturating_add(mss / 16));
            if (self.cwnd + 1).saturating_mul(mss) <= self.incr {
                self.cwnd += 1;
            }
        }

        if self.cwnd > remote_window {
            self.cwnd = remote_window;
            self.incr = remote_window.saturating_mul(mss);
        }
    }

    /// Fast recovery after a fast retransmit
    pub fn on_fast_retransmit(&mut self, inflight: u32, fast_resend: u32) {
        self.ssthresh = (inflight / 2).max(THRESH_MIN);
        self.cwnd = self.ssthresh + fast_resend;
        self.incr = self.cwnd.saturating_mul(self.mss);
    }

    /// Multiplicative decrease after an RTO expiry
    pub fn on_timeout(&mut self) {
        self.ssthresh = (self.cwnd / 2).max(THRESH_MIN);
        self.cwnd = self.ssthresh;
        self.incr = self.cwnd.saturating_mul(self.mss);
    }

    /// Keep at least one segment in flight
    pub fn ensure_minimum(&mut self) {
        if self.cwnd < 1 {
            self.cwnd = 1;
            self.incr = self.mss;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MSS: u32 = 1376;

    #[test]
    fn test_slow_start() {
        let mut cw = CongestionWindow::new(MSS);
        assert_eq!(cw.cwnd(), 1);
        assert!(cw.in_slow_start());

        cw.on_ack_advance(128);
        assert_eq!(cw.cwnd(), 2);
        assert!(!cw.in_slow_start());
    }

    #[test]
    fn test_additive_increase() {
        let mut cw = CongestionWindow::new(MSS);
        cw.on_ack_advance(128);
        let start = cw.cwnd();

        // Roughly one segment per cwnd acks
        for _ in 0..start {
            cw.on_ack_advance(128);
        }
        assert!(cw.cwnd() <= start + 1);

        for _ in 0..100 {
            cw.on_ack_advance(128);
        }
        assert!(cw.cwnd() > start);
    }

    #[test]
    fn test_capped_by_remote_window() {
        let mut cw = CongestionWindow::new(MSS);
        for _ in 0..10_000 {
            cw.on_ack_advance(8);
        }
        assert_eq!(cw.cwnd(), 8);
    }

    #[test]
    fn test_timeout_halves() {
        let mut cw = CongestionWindow::new(MSS);
        for _ in 0..2_000 {
            cw.on_ack_advance(64);
        }
        let before = cw.cwnd();
        cw.on_timeout();
        assert_eq!(cw.ssthresh(), (before / 2).max(THRESH_MIN));
        assert_eq!(cw.cwnd(), cw.ssthresh());
    }

    #[test]
    fn test_fast_recovery() {
        let mut cw = CongestionWindow::new(MSS);
        cw.on_fast_retransmit(20, 2);
        assert_eq!(cw.ssthresh(), 10);
        assert_eq!(cw.cwnd(), 12);

        cw.on_fast_retransmit(1, 2);
        assert_eq!(cw.ssthresh(), THRESH_MIN);
    }

    #[test]
    fn test_large_mss_avoidance_does_not_overflow() {
        let mss = 100_000;
        let mut cw = CongestionWindow::new(mss);
        cw.on_fast_retransmit(2, 0);
        assert!(!cw.in_slow_start());

        for _ in 0..1_000 {
            cw.on_ack_advance(128);
        }
        assert!(cw.cwnd() > THRESH_MIN);
        assert!(cw.cwnd() <= 128);
    }
}
