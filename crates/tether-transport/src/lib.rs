//! # tether-transport
//!
//! Tether reliable-UDP protocol core.
//!
//! Connection-oriented, multi-channel messaging over unreliable datagrams:
//! a handshake and graceful disconnect, per-channel reliable-ordered,
//! unreliable-sequenced and unsequenced delivery, fragmentation of large
//! payloads, and RTT-adaptive retransmission with timeout detection.
//!
//! A [`Host`] is driven from a single thread by calling
//! [`Host::service`]; there are no background threads.
//!
//! ## Crate structure
//!
//! - [`address`] — Peer network address
//! - [`wire`] — Datagram header and message codec
//! - [`packet`] — Application packets and delivery flags
//! - [`channel`] — Per-channel sequencing, backlog and fragment reassembly
//! - [`rtt`] — Smoothed RTT and retransmission timeout
//! - [`arq`] — Retransmission backoff and timeout policy
//! - [`pool`] — Slab-backed in-flight reliable message pool
//! - [`peer`] — Per-peer connection state machine
//! - [`host`] — Host, peer handles and events
//! - [`transport`] — Datagram transport trait and UDP implementation
//! - [`sim`] — Deterministic in-memory network for tests
//! - [`config`] — Host configuration and TOML loading
//! - [`stats`] — Host and peer counters
//! - [`error`] — Error types

pub mod address;
pub mod arq;
pub mod channel;
pub mod config;
pub mod error;
pub mod host;
pub mod packet;
pub mod peer;
pub mod pool;
pub mod rtt;
pub mod sim;
pub mod stats;
pub mod transport;
pub mod wire;

pub use address::Address;
pub use config::{HostConfig, PeerConfig, RttConfig};
pub use error::{
    ChannelError, ConfigError, ConnectError, CreationError, HostError, MalformedMessage,
    SendError, TransportError,
};
pub use host::{Event, Host, PeerId};
pub use packet::{Delivery, Packet, PacketFlags};
pub use peer::{DisconnectReason, Peer, PeerState};
pub use stats::{HostStats, PeerStats};
pub use transport::{Transport, UdpTransport};
