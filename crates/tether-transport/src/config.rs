//! # Host Configuration
//!
//! [`HostConfig`] holds every tunable of a host and the peers it creates.
//! It can be built in code (starting from `Default`) or loaded from TOML
//! through [`HostConfigInput`], whose fields are all optional:
//!
//! ```toml
//! version = 1
//! peer_limit = 64
//! max_fragment_size = 1024
//!
//! [peer]
//! ping_interval_ms = 250
//!
//! [peer.timeout]
//! limit = 16
//! minimum_ms = 2000
//! maximum_ms = 10000
//!
//! [rtt]
//! alpha = 0.125
//! min_rto_ms = 50
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::arq::TimeoutPolicy;
use crate::error::ConfigError;
use crate::transport::MAX_DATAGRAM_SIZE;
use crate::wire::{FRAGMENT_OVERHEAD, MAX_CHANNEL_COUNT};

/// Largest fragment payload whose encoded message still fits one datagram.
pub const MAX_FRAGMENT_SIZE: usize = MAX_DATAGRAM_SIZE - FRAGMENT_OVERHEAD;

pub const CONFIG_VERSION: u32 = 1;

/// Upper bound on `peer_limit`.
pub const MAX_PEERS: usize = 4095;

// ─── Resolved Config ─────────────────────────────────────────────────────────

/// RTT smoothing and RTO bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct RttConfig {
    /// Estimate used until the first sample arrives.
    pub initial_rtt: Duration,
    /// Gain of the smoothed RTT.
    pub alpha: f64,
    /// Gain of the RTT variation.
    pub beta: f64,
    pub min_rto: Duration,
    /// Ceiling of the RTO and of its exponential back-off.
    pub max_rto: Duration,
}

impl Default for RttConfig {
    fn default() -> Self {
        Self {
            initial_rtt: Duration::from_millis(500),
            alpha: 0.125,
            beta: 0.25,
            min_rto: Duration::from_millis(100),
            max_rto: Duration::from_secs(60),
        }
    }
}

/// Per-peer liveness settings. Each peer starts from a copy and can be
/// tuned individually afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerConfig {
    /// Idle time after which a connected peer sends a ping.
    pub ping_interval: Duration,
    /// How long a connect attempt waits for its acknowledgement.
    pub connect_timeout: Duration,
    pub timeout: TimeoutPolicy,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(5),
            timeout: TimeoutPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    pub version: u32,
    /// Most peers held at once, in any state.
    pub peer_limit: usize,
    /// Most channels a connection may use.
    pub channel_limit: usize,
    /// Declared receive bandwidth in bytes/sec; 0 is unlimited.
    pub incoming_bandwidth: u32,
    /// Declared send bandwidth in bytes/sec; 0 is unlimited.
    pub outgoing_bandwidth: u32,
    /// Payload bytes per fragment.
    pub max_fragment_size: usize,
    /// Largest packet that will be sent or reassembled.
    pub max_packet_size: usize,
    /// Reliable messages a channel buffers ahead of its delivery point.
    pub reorder_window: u16,
    /// Whether unknown addresses may connect to this host.
    pub accept_incoming: bool,
    pub peer: PeerConfig,
    pub rtt: RttConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            peer_limit: 32,
            channel_limit: MAX_CHANNEL_COUNT,
            incoming_bandwidth: 0,
            outgoing_bandwidth: 0,
            max_fragment_size: 1200,
            max_packet_size: 32 * 1024 * 1024,
            reorder_window: 1024,
            accept_incoming: true,
            peer: PeerConfig::default(),
            rtt: RttConfig::default(),
        }
    }
}

impl HostConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(HostConfig::default());
        }
        let parsed: HostConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }

    /// Check every field range. Host construction runs this too.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(self.version));
        }
        if !(1..=MAX_PEERS).contains(&self.peer_limit) {
            return Err(ConfigError::invalid(
                "peer_limit",
                format!("must be between 1 and {MAX_PEERS}, got {}", self.peer_limit),
            ));
        }
        if !(1..=MAX_CHANNEL_COUNT).contains(&self.channel_limit) {
            return Err(ConfigError::invalid(
                "channel_limit",
                format!(
                    "must be between 1 and {MAX_CHANNEL_COUNT}, got {}",
                    self.channel_limit
                ),
            ));
        }
        if !(1..=MAX_FRAGMENT_SIZE).contains(&self.max_fragment_size) {
            return Err(ConfigError::invalid(
                "max_fragment_size",
                format!(
                    "must be between 1 and {MAX_FRAGMENT_SIZE}, got {}",
                    self.max_fragment_size
                ),
            ));
        }
        if self.max_packet_size == 0 || self.max_packet_size > u32::MAX as usize {
            return Err(ConfigError::invalid(
                "max_packet_size",
                format!("must be between 1 and {}, got {}", u32::MAX, self.max_packet_size),
            ));
        }
        if self.reorder_window == 0 || self.reorder_window >= 0x8000 {
            return Err(ConfigError::invalid(
                "reorder_window",
                format!("must be between 1 and 32767, got {}", self.reorder_window),
            ));
        }
        if self.peer.ping_interval.is_zero() {
            return Err(ConfigError::invalid("peer.ping_interval", "must be non-zero"));
        }
        if self.peer.connect_timeout.is_zero() {
            return Err(ConfigError::invalid("peer.connect_timeout", "must be non-zero"));
        }
        for (field, gain) in [("rtt.alpha", self.rtt.alpha), ("rtt.beta", self.rtt.beta)] {
            if !(gain > 0.0 && gain <= 1.0) {
                return Err(ConfigError::invalid(
                    field,
                    format!("must be in (0, 1], got {gain}"),
                ));
            }
        }
        if self.rtt.min_rto.is_zero() || self.rtt.min_rto > self.rtt.max_rto {
            return Err(ConfigError::invalid(
                "rtt.min_rto",
                format!(
                    "must be non-zero and at most max_rto ({:?}), got {:?}",
                    self.rtt.max_rto, self.rtt.min_rto
                ),
            ));
        }
        Ok(())
    }
}

// ─── TOML Input ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HostConfigInput {
    pub version: u32,
    pub peer_limit: Option<usize>,
    pub channel_limit: Option<usize>,
    pub incoming_bandwidth: Option<u32>,
    pub outgoing_bandwidth: Option<u32>,
    pub max_fragment_size: Option<usize>,
    pub max_packet_size: Option<usize>,
    pub reorder_window: Option<u16>,
    pub accept_incoming: Option<bool>,
    pub peer: PeerConfigInput,
    pub rtt: RttConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PeerConfigInput {
    pub ping_interval_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub timeout: TimeoutConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimeoutConfigInput {
    pub limit: Option<u32>,
    pub minimum_ms: Option<u64>,
    pub maximum_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RttConfigInput {
    pub initial_rtt_ms: Option<u64>,
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    pub min_rto_ms: Option<u64>,
    pub max_rto_ms: Option<u64>,
}

impl HostConfigInput {
    pub fn resolve(self) -> Result<HostConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let defaults = HostConfig::default();
        let timeout = self.peer.timeout;
        let config = HostConfig {
            version,
            peer_limit: self.peer_limit.unwrap_or(defaults.peer_limit),
            channel_limit: self.channel_limit.unwrap_or(defaults.channel_limit),
            incoming_bandwidth: self.incoming_bandwidth.unwrap_or(0),
            outgoing_bandwidth: self.outgoing_bandwidth.unwrap_or(0),
            max_fragment_size: self
                .max_fragment_size
                .unwrap_or(defaults.max_fragment_size),
            max_packet_size: self.max_packet_size.unwrap_or(defaults.max_packet_size),
            reorder_window: self.reorder_window.unwrap_or(defaults.reorder_window),
            accept_incoming: self.accept_incoming.unwrap_or(defaults.accept_incoming),
            peer: PeerConfig {
                ping_interval: ms_or(self.peer.ping_interval_ms, defaults.peer.ping_interval),
                connect_timeout: ms_or(
                    self.peer.connect_timeout_ms,
                    defaults.peer.connect_timeout,
                ),
                timeout: TimeoutPolicy::new(
                    timeout.limit.unwrap_or(0),
                    timeout.minimum_ms.map(Duration::from_millis).unwrap_or_default(),
                    timeout.maximum_ms.map(Duration::from_millis).unwrap_or_default(),
                ),
            },
            rtt: RttConfig {
                initial_rtt: ms_or(self.rtt.initial_rtt_ms, defaults.rtt.initial_rtt),
                alpha: self.rtt.alpha.unwrap_or(defaults.rtt.alpha),
                beta: self.rtt.beta.unwrap_or(defaults.rtt.beta),
                min_rto: ms_or(self.rtt.min_rto_ms, defaults.rtt.min_rto),
                max_rto: ms_or(self.rtt.max_rto_ms, defaults.rtt.max_rto),
            },
        };
        config.validate()?;
        Ok(config)
    }
}

fn ms_or(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(default)
}
