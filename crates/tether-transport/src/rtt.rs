//! # Round-Trip Time Estimation
//!
//! Smoothed RTT and RTT variation in the style of RFC 6298, fed by the
//! acknowledgement of every reliable send. The smoothing factors and RTO
//! bounds come from [`RttConfig`].

use std::time::Duration;

use crate::config::RttConfig;

#[derive(Debug, Clone)]
pub struct RttEstimator {
    config: RttConfig,
    /// Smoothed RTT (SRTT) in µs.
    srtt_us: f64,
    /// RTT variation (RTTVAR) in µs.
    rttvar_us: f64,
    /// Lowest RTT observed in µs.
    min_rtt_us: f64,
    sample_count: u64,
}

impl RttEstimator {
    pub fn new(config: RttConfig) -> Self {
        RttEstimator {
            srtt_us: config.initial_rtt.as_micros() as f64,
            rttvar_us: 0.0,
            min_rtt_us: f64::MAX,
            sample_count: 0,
            config,
        }
    }

    /// Fold one measured round trip into the estimate.
    pub fn on_sample(&mut self, rtt: Duration) {
        let rtt_us = rtt.as_micros() as f64;
        self.sample_count += 1;
        if rtt_us < self.min_rtt_us {
            self.min_rtt_us = rtt_us;
        }

        if self.sample_count == 1 {
            self.srtt_us = rtt_us;
            self.rttvar_us = rtt_us / 2.0;
        } else {
            let beta = self.config.beta;
            let alpha = self.config.alpha;
            self.rttvar_us = (1.0 - beta) * self.rttvar_us + beta * (self.srtt_us - rtt_us).abs();
            self.srtt_us = (1.0 - alpha) * self.srtt_us + alpha * rtt_us;
        }
    }

    pub fn srtt(&self) -> Duration {
        Duration::from_micros(self.srtt_us as u64)
    }

    pub fn rttvar(&self) -> Duration {
        Duration::from_micros(self.rttvar_us as u64)
    }

    /// Lowest sample seen, if any.
    pub fn min_rtt(&self) -> Option<Duration> {
        (self.sample_count > 0).then(|| Duration::from_micros(self.min_rtt_us as u64))
    }

    /// Retransmission timeout: SRTT + 4·RTTVAR, clamped to the configured bounds.
    pub fn rto(&self) -> Duration {
        let rto_us = self.srtt_us + 4.0 * self.rttvar_us;
        let min = self.config.min_rto.as_micros() as f64;
        let max = self.config.max_rto.as_micros() as f64;
        Duration::from_micros(rto_us.clamp(min, max.max(min)) as u64)
    }

    pub fn max_rto(&self) -> Duration {
        self.config.max_rto
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }
}
