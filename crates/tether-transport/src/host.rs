//! # Host
//!
//! A [`Host`] owns a [`Transport`] and every [`Peer`] reached through it.
//! It demultiplexes incoming datagrams by source address, runs each peer's
//! timers and turns what the peers report into [`Event`]s.
//!
//! The host is single-threaded and cooperative: nothing happens between
//! calls. [`Host::service`] is the only operation that waits; it returns at
//! most one event per call, from a FIFO queue.
//!
//! ```no_run
//! use std::time::Duration;
//! use tether_transport::{Address, Event, Host};
//!
//! let mut server = Host::bind(Some(Address::any(9000)), 32, 2, 0, 0)?;
//! loop {
//!     match server.service(Duration::from_millis(100))? {
//!         Event::Connect { address, .. } => println!("{address} connected"),
//!         Event::Receive { peer, channel, packet } => {
//!             server.send(peer, channel, packet)?;
//!         }
//!         Event::Disconnect { address, .. } => println!("{address} left"),
//!         Event::None => {}
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use bytes::Bytes;
use quanta::{Clock, Instant};
use rand::RngExt as _;
use slab::Slab;

use crate::address::Address;
use crate::config::{HostConfig, MAX_PEERS};
use crate::error::{ConnectError, CreationError, HostError, TransportError};
use crate::packet::{Packet, PacketFlags};
use crate::peer::{DisconnectReason, OutputDatagram, Peer, PeerEvent, PeerState};
use crate::pool::TimestampClock;
use crate::stats::HostStats;
use crate::transport::{Transport, UdpTransport};
use crate::wire::{Datagram, Message, MAX_CHANNEL_COUNT};

/// Longest single wait inside [`Host::service`] before timers are re-run.
const SERVICE_GRANULARITY: Duration = Duration::from_millis(10);

/// Datagrams drained per poll before timers get a turn.
const MAX_DATAGRAMS_PER_POLL: usize = 256;

// ─── Handles & Events ────────────────────────────────────────────────────────

/// Handle to a peer of a host. Stale handles are rejected, not reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId {
    slot: usize,
    connect_id: u32,
}

impl PeerId {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn connect_id(&self) -> u32 {
        self.connect_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Nothing happened before the timeout.
    None,
    /// A connection completed. `data` is the initiator's data word when
    /// this host accepted the connection, 0 when it initiated it.
    Connect {
        peer: PeerId,
        address: Address,
        data: u32,
    },
    /// A peer is gone. Its handle is invalid from here on; the application
    /// data slot it held is handed back in `app_data`.
    Disconnect {
        peer: PeerId,
        address: Address,
        data: u32,
        reason: DisconnectReason,
        app_data: Option<Bytes>,
    },
    Receive {
        peer: PeerId,
        channel: u8,
        packet: Packet,
    },
}

impl Event {
    pub fn is_none(&self) -> bool {
        matches!(self, Event::None)
    }

    pub fn peer(&self) -> Option<PeerId> {
        match self {
            Event::None => None,
            Event::Connect { peer, .. }
            | Event::Disconnect { peer, .. }
            | Event::Receive { peer, .. } => Some(*peer),
        }
    }
}

// ─── Host ────────────────────────────────────────────────────────────────────

pub struct Host<T: Transport> {
    transport: T,
    config: HostConfig,
    clock: Clock,
    timestamps: TimestampClock,
    peers: Slab<Peer>,
    by_address: HashMap<Address, usize>,
    events: VecDeque<Event>,
    stats: HostStats,
}

impl Host<UdpTransport> {
    /// Bind a UDP host. `None` creates a client-only host on an ephemeral
    /// port that refuses incoming connections.
    pub fn bind(
        address: Option<Address>,
        peer_limit: usize,
        channel_limit: usize,
        incoming_bandwidth: u32,
        outgoing_bandwidth: u32,
    ) -> Result<Self, CreationError> {
        let config = HostConfig {
            peer_limit,
            channel_limit,
            incoming_bandwidth,
            outgoing_bandwidth,
            ..HostConfig::default()
        };
        Self::bind_with_config(address, config)
    }

    pub fn bind_with_config(
        address: Option<Address>,
        mut config: HostConfig,
    ) -> Result<Self, CreationError> {
        check_limits(&config)?;
        if address.is_none() {
            config.accept_incoming = false;
        }
        let transport = UdpTransport::bind(address.unwrap_or(Address::any(0)))
            .map_err(CreationError::Bind)?;
        Self::new(transport, config)
    }
}

impl<T: Transport> Host<T> {
    pub fn new(transport: T, config: HostConfig) -> Result<Self, CreationError> {
        Self::with_clock(transport, config, Clock::new())
    }

    /// Create a host driven by `clock`; tests pass `Clock::mock()`.
    pub fn with_clock(transport: T, config: HostConfig, clock: Clock) -> Result<Self, CreationError> {
        check_limits(&config)?;
        config.validate()?;
        let timestamps = TimestampClock::new(clock.now());
        tracing::info!(
            local = ?transport.local_address(),
            peer_limit = config.peer_limit,
            channel_limit = config.channel_limit,
            accept_incoming = config.accept_incoming,
            "host created"
        );
        Ok(Host {
            transport,
            config,
            clock,
            timestamps,
            peers: Slab::new(),
            by_address: HashMap::new(),
            events: VecDeque::new(),
            stats: HostStats::new(),
        })
    }

    /// Tear the host down. Peers are dropped without notifying remotes.
    pub fn destroy(self) {
        tracing::info!(
            local = ?self.transport.local_address(),
            peers = self.peers.len(),
            "host destroyed"
        );
    }

    // ─── Connections ─────────────────────────────────────────────────────

    /// Start connecting to `address`. Completion is reported by a
    /// `Connect` event; failure by a `Disconnect` event with reason
    /// `Timeout`.
    pub fn connect(
        &mut self,
        address: Address,
        channel_count: usize,
        data: u32,
    ) -> Result<PeerId, ConnectError> {
        if self.by_address.contains_key(&address) {
            return Err(ConnectError::AlreadyConnected(address));
        }
        if self.peers.len() >= self.config.peer_limit {
            return Err(ConnectError::PeerLimitReached(self.config.peer_limit));
        }
        let channel_count = channel_count.clamp(1, self.config.channel_limit);
        let connect_id = rand::rng().random::<u32>();
        let now = self.clock.now();

        let mut peer = Peer::new(address, &self.config, self.timestamps, now);
        peer.connect(connect_id, channel_count, data, now);
        let slot = self.peers.insert(peer);
        self.by_address.insert(address, slot);
        self.settle();
        Ok(PeerId { slot, connect_id })
    }

    /// Graceful disconnect; a `Disconnect` event follows once the remote
    /// acknowledges or the peer times out.
    pub fn disconnect(&mut self, peer: PeerId, data: u32) -> Result<(), HostError> {
        let now = self.clock.now();
        self.peer_mut(peer)?.disconnect(data, now);
        self.settle();
        Ok(())
    }

    /// Disconnect without waiting. The `Disconnect` event is queued before
    /// this returns and the handle is invalid afterwards.
    pub fn disconnect_now(&mut self, peer: PeerId, data: u32) -> Result<(), HostError> {
        let now = self.clock.now();
        self.peer_mut(peer)?.disconnect_now(data, now);
        self.settle();
        Ok(())
    }

    /// Disconnect once all queued reliable sends are acknowledged.
    pub fn disconnect_later(&mut self, peer: PeerId, data: u32) -> Result<(), HostError> {
        let now = self.clock.now();
        self.peer_mut(peer)?.disconnect_later(data, now);
        self.settle();
        Ok(())
    }

    // ─── Sending ─────────────────────────────────────────────────────────

    /// Queue a packet. It is transmitted on the next `service` or `flush`.
    pub fn send(&mut self, peer: PeerId, channel: u8, packet: Packet) -> Result<(), HostError> {
        self.peer_mut(peer)?.send(channel, packet)?;
        Ok(())
    }

    pub fn send_bytes(
        &mut self,
        peer: PeerId,
        channel: u8,
        data: &[u8],
        flags: PacketFlags,
    ) -> Result<(), HostError> {
        self.send(peer, channel, Packet::new(Bytes::copy_from_slice(data), flags))
    }

    pub fn send_str(
        &mut self,
        peer: PeerId,
        channel: u8,
        text: &str,
        flags: PacketFlags,
    ) -> Result<(), HostError> {
        self.send(peer, channel, Packet::from_text(text, flags))
    }

    /// Queue `packet` to every connected peer. Returns how many accepted it.
    pub fn broadcast(&mut self, channel: u8, packet: Packet) -> usize {
        let mut queued = 0;
        for (_, peer) in self.peers.iter_mut() {
            if peer.state() != PeerState::Connected {
                continue;
            }
            match peer.send(channel, packet.clone()) {
                Ok(()) => queued += 1,
                Err(e) => {
                    tracing::debug!(peer = %peer.address(), error = %e, "broadcast skipped peer");
                }
            }
        }
        queued
    }

    pub fn broadcast_bytes(&mut self, channel: u8, data: &[u8], flags: PacketFlags) -> usize {
        self.broadcast(channel, Packet::new(Bytes::copy_from_slice(data), flags))
    }

    pub fn broadcast_str(&mut self, channel: u8, text: &str, flags: PacketFlags) -> usize {
        self.broadcast(channel, Packet::from_text(text, flags))
    }

    /// Transmit everything queued without waiting for events.
    pub fn flush(&mut self) {
        let now = self.clock.now();
        for (_, peer) in self.peers.iter_mut() {
            peer.flush(now);
        }
        self.settle();
    }

    // ─── Service ─────────────────────────────────────────────────────────

    /// Receive, run timers and transmit until an event is ready or
    /// `timeout` elapses. A zero timeout does one non-blocking pass.
    pub fn service(&mut self, timeout: Duration) -> Result<Event, TransportError> {
        if let Some(event) = self.events.pop_front() {
            return Ok(event);
        }
        let deadline = self.clock.now() + timeout;
        loop {
            self.receive_pending()?;
            self.tick();
            if let Some(event) = self.events.pop_front() {
                return Ok(event);
            }

            let now = self.clock.now();
            if now >= deadline {
                return Ok(Event::None);
            }
            let wait = deadline
                .saturating_duration_since(now)
                .min(SERVICE_GRANULARITY);
            match self.transport.recv(wait)? {
                Some((from, data)) => self.dispatch(from, data),
                // A clock that did not move while we waited is a mocked
                // clock; spinning would never reach the deadline.
                None if self.clock.now() == now => return Ok(Event::None),
                None => {}
            }
        }
    }

    /// Pop an already-queued event without touching the network.
    pub fn check_events(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    fn receive_pending(&mut self) -> Result<(), TransportError> {
        for _ in 0..MAX_DATAGRAMS_PER_POLL {
            match self.transport.recv(Duration::ZERO)? {
                Some((from, data)) => self.dispatch(from, data),
                None => break,
            }
        }
        Ok(())
    }

    fn tick(&mut self) {
        let now = self.clock.now();
        for (_, peer) in self.peers.iter_mut() {
            peer.update(now);
        }
        self.settle();
    }

    fn dispatch(&mut self, from: Address, mut data: Bytes) {
        let datagram = match Datagram::decode(&mut data) {
            Ok(datagram) => datagram,
            Err(e) => {
                tracing::trace!(peer = %from, error = %e, "dropping malformed datagram");
                return;
            }
        };
        let now = self.clock.now();

        if let Some(&slot) = self.by_address.get(&from) {
            if let Some(peer) = self.peers.get_mut(slot) {
                if let Some(len) = peer.handle(datagram, now) {
                    self.stats.record_received(len);
                }
            }
            return;
        }

        match datagram.message {
            Message::Connect { .. } => self.accept(from, datagram, now),
            Message::Disconnect { .. } => {
                let ack = Datagram::encode_message(self.timestamps.now_ms(now), &Message::DisconnectAck);
                if let Err(e) = self.transport.send_to(from, &ack) {
                    tracing::warn!(peer = %from, error = %e, "send failed");
                }
            }
            message => {
                tracing::trace!(peer = %from, kind = message.kind().name(), "datagram from unknown address");
            }
        }
    }

    fn accept(&mut self, from: Address, datagram: Datagram, now: Instant) {
        if !self.config.accept_incoming {
            tracing::debug!(peer = %from, "refusing connect: host does not accept connections");
            return;
        }
        if self.peers.len() >= self.config.peer_limit {
            tracing::debug!(peer = %from, limit = self.config.peer_limit, "refusing connect: peer limit reached");
            return;
        }
        let mut peer = Peer::new(from, &self.config, self.timestamps, now);
        peer.handle(datagram, now);
        if peer.state() == PeerState::Connected {
            let slot = self.peers.insert(peer);
            self.by_address.insert(from, slot);
        }
    }

    /// Hand queued datagrams to the transport, turn peer events into host
    /// events and remove finished peers.
    fn settle(&mut self) {
        let Host {
            transport,
            peers,
            by_address,
            events,
            stats,
            ..
        } = self;
        let mut finished = Vec::new();

        for (slot, peer) in peers.iter_mut() {
            let address = peer.address();
            let outputs: Vec<OutputDatagram> = peer.drain_output().collect();
            for out in outputs {
                match transport.send_to(address, &out.data) {
                    Ok(()) => {
                        if let Some(len) = out.payload_len {
                            stats.record_sent(len);
                            peer.record_sent(len);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            peer = %address,
                            error = %e,
                            retransmit = out.is_retransmit,
                            "send failed"
                        );
                    }
                }
            }

            let id = PeerId {
                slot,
                connect_id: peer.connect_id(),
            };
            let peer_events: Vec<PeerEvent> = peer.drain_events().collect();
            for event in peer_events {
                events.push_back(match event {
                    PeerEvent::Connected { data } => Event::Connect {
                        peer: id,
                        address,
                        data,
                    },
                    PeerEvent::Received { channel, packet } => Event::Receive {
                        peer: id,
                        channel,
                        packet,
                    },
                    PeerEvent::Disconnected { data, reason } => Event::Disconnect {
                        peer: id,
                        address,
                        data,
                        reason,
                        app_data: peer.take_data(),
                    },
                });
            }
            if peer.state() == PeerState::Zombie {
                finished.push(slot);
            }
        }

        for slot in finished {
            let peer = peers.remove(slot);
            let address = peer.address();
            if by_address.get(&address) == Some(&slot) {
                by_address.remove(&address);
            }
            tracing::debug!(peer = %address, "peer removed");
        }
    }

    // ─── Peers ───────────────────────────────────────────────────────────

    pub fn peer(&self, id: PeerId) -> Option<&Peer> {
        self.peers
            .get(id.slot)
            .filter(|peer| peer.connect_id() == id.connect_id)
    }

    fn peer_mut(&mut self, id: PeerId) -> Result<&mut Peer, HostError> {
        self.peers
            .get_mut(id.slot)
            .filter(|peer| peer.connect_id() == id.connect_id)
            .ok_or(HostError::UnknownPeer)
    }

    pub fn peers(&self) -> impl Iterator<Item = (PeerId, &Peer)> + '_ {
        self.peers.iter().map(|(slot, peer)| {
            (
                PeerId {
                    slot,
                    connect_id: peer.connect_id(),
                },
                peer,
            )
        })
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn set_timeout(
        &mut self,
        peer: PeerId,
        limit: u32,
        minimum: Duration,
        maximum: Duration,
    ) -> Result<(), HostError> {
        self.peer_mut(peer)?.set_timeout(limit, minimum, maximum);
        Ok(())
    }

    pub fn set_ping_interval(&mut self, peer: PeerId, interval: Duration) -> Result<(), HostError> {
        self.peer_mut(peer)?.set_ping_interval(interval);
        Ok(())
    }

    /// Store application data on a peer, returning what was there before.
    pub fn set_data(&mut self, peer: PeerId, data: impl Into<Bytes>) -> Result<Option<Bytes>, HostError> {
        let data = data.into();
        if data.len() > u32::MAX as usize {
            return Err(HostError::DataTooLarge(data.len()));
        }
        Ok(self.peer_mut(peer)?.set_data(data))
    }

    pub fn take_data(&mut self, peer: PeerId) -> Result<Option<Bytes>, HostError> {
        Ok(self.peer_mut(peer)?.take_data())
    }

    pub fn data(&self, peer: PeerId) -> Option<&Bytes> {
        self.peer(peer).and_then(Peer::data)
    }

    // ─── Host settings & stats ───────────────────────────────────────────

    /// Bandwidth declared to peers connected from now on. Not enforced.
    pub fn set_bandwidth_limit(&mut self, incoming: u32, outgoing: u32) {
        self.config.incoming_bandwidth = incoming;
        self.config.outgoing_bandwidth = outgoing;
        tracing::debug!(incoming, outgoing, "bandwidth limit changed");
    }

    pub fn stats(&self) -> &HostStats {
        &self.stats
    }

    pub fn bytes_sent(&self) -> u64 {
        self.stats.bytes_sent
    }

    pub fn reset_bytes_sent(&mut self) {
        self.stats.bytes_sent = 0;
    }

    pub fn bytes_received(&self) -> u64 {
        self.stats.bytes_received
    }

    pub fn reset_bytes_received(&mut self) {
        self.stats.bytes_received = 0;
    }

    pub fn packets_sent(&self) -> u64 {
        self.stats.packets_sent
    }

    pub fn reset_packets_sent(&mut self) {
        self.stats.packets_sent = 0;
    }

    pub fn packets_received(&self) -> u64 {
        self.stats.packets_received
    }

    pub fn reset_packets_received(&mut self) {
        self.stats.packets_received = 0;
    }

    pub fn local_address(&self) -> Option<Address> {
        self.transport.local_address()
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }
}

fn check_limits(config: &HostConfig) -> Result<(), CreationError> {
    if !(1..=MAX_PEERS).contains(&config.peer_limit) {
        return Err(CreationError::InvalidPeerLimit {
            got: config.peer_limit,
            max: MAX_PEERS,
        });
    }
    if !(1..=MAX_CHANNEL_COUNT).contains(&config.channel_limit) {
        return Err(CreationError::InvalidChannelLimit {
            got: config.channel_limit,
            max: MAX_CHANNEL_COUNT,
        });
    }
    Ok(())
}
