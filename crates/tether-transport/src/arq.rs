//! # ARQ: Retransmission Back-off and Timeout Policy
//!
//! Every unacknowledged reliable send carries a [`Backoff`]. Its RTO starts
//! from the peer's current RTT estimate and doubles on each retransmission,
//! never beyond `max_rto`. The peer's [`TimeoutPolicy`] then decides when a
//! send has been outstanding long enough to give up on the connection:
//!
//! - once it has waited `maximum`, unconditionally;
//! - once its RTO has grown to `limit` times its initial value and it has
//!   waited at least `minimum`.
//!
//! A transient RTT spike therefore costs a few back-offs, while a dead link
//! is detected within `maximum`.

use std::time::Duration;

// ─── Timeout Policy ──────────────────────────────────────────────────────────

pub const DEFAULT_TIMEOUT_LIMIT: u32 = 32;
pub const DEFAULT_TIMEOUT_MINIMUM: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT_MAXIMUM: Duration = Duration::from_secs(30);

/// Semi-linear timeout parameters of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// Multiplier on the initial RTO of a send before it counts as exhausted.
    pub limit: u32,
    /// An exhausted send only times out once it has waited this long.
    pub minimum: Duration,
    /// Any send times out once it has waited this long.
    pub maximum: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            limit: DEFAULT_TIMEOUT_LIMIT,
            minimum: DEFAULT_TIMEOUT_MINIMUM,
            maximum: DEFAULT_TIMEOUT_MAXIMUM,
        }
    }
}

impl TimeoutPolicy {
    /// Build a policy. Zero values select the defaults, and `minimum` is
    /// lowered to `maximum` if it exceeds it.
    pub fn new(limit: u32, minimum: Duration, maximum: Duration) -> Self {
        let limit = if limit == 0 { DEFAULT_TIMEOUT_LIMIT } else { limit };
        let minimum = if minimum.is_zero() {
            DEFAULT_TIMEOUT_MINIMUM
        } else {
            minimum
        };
        let maximum = if maximum.is_zero() {
            DEFAULT_TIMEOUT_MAXIMUM
        } else {
            maximum
        };
        Self {
            limit,
            minimum: minimum.min(maximum),
            maximum,
        }
    }

    /// Whether a send that has waited `waited` with back-off state
    /// `backoff` means the connection is dead.
    pub fn is_expired(&self, backoff: &Backoff, waited: Duration) -> bool {
        waited >= self.maximum || (backoff.is_exhausted() && waited >= self.minimum)
    }
}

// ─── Backoff ─────────────────────────────────────────────────────────────────

/// Per-send retransmission timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    rto: Duration,
    ceiling: Duration,
    limit: Duration,
}

impl Backoff {
    /// Start from `initial_rto`, doubling up to `ceiling`.
    pub fn new(initial_rto: Duration, ceiling: Duration, policy: &TimeoutPolicy) -> Self {
        let ceiling = ceiling.max(Duration::from_millis(1));
        let rto = initial_rto.clamp(Duration::from_millis(1), ceiling);
        let limit = rto.saturating_mul(policy.limit).min(ceiling);
        Self {
            rto,
            ceiling,
            limit,
        }
    }

    /// Time to wait after the latest transmission before retransmitting.
    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Double the RTO after a retransmission.
    pub fn back_off(&mut self) {
        self.rto = self.rto.saturating_mul(2).min(self.ceiling);
    }

    /// The RTO has reached the adaptive limit.
    pub fn is_exhausted(&self) -> bool {
        self.rto >= self.limit
    }
}
