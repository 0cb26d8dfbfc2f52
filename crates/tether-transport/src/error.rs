//! # Errors
//!
//! Error types for every fallible operation in the crate. Only construction
//! errors and caller mistakes (bad channel, unknown peer, oversized packet)
//! reach the application; protocol anomalies stay inside the peer and are
//! logged instead.

use std::io;

use thiserror::Error;

use crate::address::Address;

// ─── Wire ────────────────────────────────────────────────────────────────────

/// A datagram that could not be decoded into a message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedMessage {
    #[error("datagram is empty")]
    Empty,
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown message kind {0:#04x}")]
    UnknownKind(u8),
    #[error("truncated {kind}: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        kind: &'static str,
        needed: usize,
        remaining: usize,
    },
    #[error("fragment index {index} out of range for fragment count {count}")]
    FragmentIndex { index: u16, count: u16 },
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// Failure reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("datagram of {len} bytes exceeds transport limit of {max}")]
    DatagramTooLarge { len: usize, max: usize },
}

// ─── Channel ─────────────────────────────────────────────────────────────────

/// Sequencing or reassembly violation detected by a channel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error(
        "sequence {sequence} is {distance} ahead of expected {expected}, reorder window is {window}"
    )]
    BacklogExceeded {
        sequence: u16,
        expected: u16,
        distance: u16,
        window: u16,
    },
    #[error("fragment index {index} out of range for fragment count {count}")]
    FragmentIndex { index: u16, count: u16 },
    #[error("fragment header disagrees with earlier fragments of sequence {sequence}")]
    InconsistentFragment { sequence: u16 },
    #[error("declared length {total_length} exceeds maximum packet size {max}")]
    PacketTooLarge { total_length: u32, max: usize },
    #[error("fragments of sequence {sequence} do not add up to declared length {total_length}")]
    LengthMismatch { sequence: u16, total_length: u32 },
    #[error("fragment count {count} exceeds declared length {total_length}")]
    FragmentCount { count: u16, total_length: u32 },
    /// Not a violation: the sender retransmits once the backlog drains.
    #[error("no room to reassemble sequence {sequence}, {pending} bytes already pending")]
    ReassemblyBusy { sequence: u16, pending: usize },
}

// ─── Application-facing ──────────────────────────────────────────────────────

/// Why a packet could not be queued on a peer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("peer is not connected")]
    NotConnected,
    #[error("channel {channel} out of range, peer has {channel_count} channels")]
    InvalidChannel { channel: u8, channel_count: usize },
    #[error("packet of {len} bytes exceeds maximum packet size {max}")]
    PacketTooLarge { len: usize, max: usize },
    #[error("packet of {len} bytes needs more than {max} fragments")]
    TooManyFragments { len: usize, max: usize },
}

/// Why an outgoing connection could not be started.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("peer limit of {0} reached")]
    PeerLimitReached(usize),
    #[error("a peer for {0} already exists")]
    AlreadyConnected(Address),
}

/// Errors from operations addressed to a single peer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("unknown or destroyed peer")]
    UnknownPeer,
    #[error("application data of {0} bytes exceeds the 32-bit length limit")]
    DataTooLarge(usize),
    #[error(transparent)]
    Send(#[from] SendError),
}

/// Host construction failure. Not retryable without changed parameters.
#[derive(Debug, Error)]
pub enum CreationError {
    #[error("peer limit must be between 1 and {max}, got {got}")]
    InvalidPeerLimit { got: usize, max: usize },
    #[error("channel limit must be between 1 and {max}, got {got}")]
    InvalidChannelLimit { got: usize, max: usize },
    #[error("failed to bind transport: {0}")]
    Bind(#[source] io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration parse or validation failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
