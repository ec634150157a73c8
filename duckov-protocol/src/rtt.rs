//! Round-Trip Time Estimation
//!
//! Smoothed RTT and RTT variance in the usual Jacobson/Karels form, used to
//! derive the retransmission timeout.

/// RTO when nodelay mode is on
pub const RTO_NODELAY: u32 = 30;
/// Minimum RTO in normal mode
pub const RTO_MIN: u32 = 100;
/// Initial RTO before any sample
pub const RTO_DEFAULT: u32 = 200;
/// Upper bound on the RTO
pub const RTO_MAX: u32 = 60_000;

/// RTT estimator producing the retransmission timeout
#[derive(Debug, Clone)]
pub struct RttEstimator {
    srtt: u32,
    rttval: u32,
    rto: u32,
    min_rto: u32,
    interval: u32,
}

impl RttEstimator {
    /// Create an estimator with the default RTO
    pub fn new(interval: u32) -> Self {
        RttEstimator {
            srtt: 0,
            rttval: 0,
            rto: RTO_DEFAULT,
            min_rto: RTO_MIN,
            interval,
        }
    }

    /// Feed one RTT sample in milliseconds
    pub fn update(&mut self, rtt: u32) {
        if self.srtt == 0 {
            self.srtt = rtt;
            self.rttval = rtt / 2;
        } else {
            let delta = rtt.abs_diff(self.srtt);
            self.rttval = ((3 * self.rttval as u64 + delta as u64) / 4) as u32;
            self.srtt = ((7 * self.srtt as u64 + rtt as u64) / 8) as u32;
            if self.srtt < 1 {
                self.srtt = 1;
            }
        }

        let margin = self.interval.max(self.rttval.saturating_mul(4));
        let rto = self.srtt.saturating_add(margin);
        self.rto = rto.clamp(self.min_rto, RTO_MAX);
    }

    pub fn srtt(&self) -> u32 {
        self.srtt
    }

    pub fn rttval(&self) -> u32 {
        self.rttval
    }

    /// Current retransmission timeout
    pub fn rto(&self) -> u32 {
        self.rto
    }

    pub fn min_rto(&self) -> u32 {
        self.min_rto
    }

    /// Switch between the normal and nodelay RTO floor
    pub fn set_nodelay(&mut self, nodelay: bool) {
        self.min_rto = if nodelay { RTO_NODELAY } else { RTO_MIN };
    }

    pub fn set_interval(&mut self, interval: u32) {
        self.interval = interval;
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new(100)
    }
}
