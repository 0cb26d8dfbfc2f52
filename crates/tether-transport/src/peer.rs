//! # Peer State Machine
//!
//! Connection lifecycle of one remote endpoint: handshake, reliable
//! delivery with per-send retransmission, keepalive pings, graceful and
//! forced teardown.
//!
//! ```text
//!  Disconnected ──connect──▶ Connecting ──ConnectAck──▶ Connected
//!       │                         │                      │    │
//!       └──Connect (acceptor)─────┼─────────────────────▶│    │ disconnect_later
//!                                 │                      │    ▼
//!                                 │           disconnect │  DisconnectLater
//!                                 │                      ▼    │ (drained)
//!                                 │                 Disconnecting◀┘
//!                                 │  timeout / ack /     │
//!                                 └──disconnect_now─────▶ Zombie ◀─┘
//! ```
//!
//! The peer is sans-I/O: the host feeds it decoded datagrams and the
//! current time, then drains the datagrams it wants sent and the events it
//! wants surfaced. A `Zombie` peer has finished and is removed by its host
//! after its `Disconnected` event is delivered.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use bytes::Bytes;
use quanta::Instant;

use crate::address::Address;
use crate::arq::{Backoff, TimeoutPolicy};
use crate::channel::{self, Channel, Incoming};
use crate::config::{HostConfig, PeerConfig};
use crate::error::{ChannelError, SendError};
use crate::packet::{Delivery, Packet, PacketFlags};
use crate::pool::{InFlight, InFlightPool, TimestampClock};
use crate::rtt::RttEstimator;
use crate::stats::PeerStats;
use crate::wire::{AckKey, Datagram, Message, CONTROL_CHANNEL};

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected, waiting for queued reliable sends to be acknowledged
    /// before disconnecting.
    DisconnectLater,
    /// Disconnect sent, waiting for its acknowledgement.
    Disconnecting,
    /// Finished; awaiting removal.
    Zombie,
}

impl PeerState {
    pub fn is_connected(self) -> bool {
        matches!(self, PeerState::Connected | PeerState::DisconnectLater)
    }
}

/// Why a peer left the connected set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The remote sent a disconnect.
    Remote,
    /// This side disconnected.
    Local,
    /// The remote stopped acknowledging.
    Timeout,
    /// The remote broke the protocol.
    ProtocolError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// The connection is established. `data` is the initiator's data word
    /// on the accepting side and 0 on the initiating side.
    Connected { data: u32 },
    Received { channel: u8, packet: Packet },
    Disconnected { data: u32, reason: DisconnectReason },
}

/// A datagram ready for the transport.
#[derive(Debug, Clone)]
pub struct OutputDatagram {
    /// Encoded header + message.
    pub data: Bytes,
    /// Application payload bytes carried, for traffic statistics.
    pub payload_len: Option<usize>,
    pub is_retransmit: bool,
}

#[derive(Debug)]
struct PendingDisconnect {
    data: u32,
    started: Instant,
    last_sent: Instant,
    backoff: Backoff,
}

// ─── Peer ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Peer {
    address: Address,
    state: PeerState,
    connect_id: u32,
    /// Ack key of our own Connect while it is outstanding.
    connect_key: Option<AckKey>,
    connect_started: Option<Instant>,
    channels: Vec<Channel>,
    channel_limit: usize,
    reorder_window: u16,
    max_fragment_size: usize,
    max_packet_size: usize,
    incoming_bandwidth: u32,
    outgoing_bandwidth: u32,
    remote_incoming_bandwidth: u32,
    remote_outgoing_bandwidth: u32,
    config: PeerConfig,
    rtt: RttEstimator,
    timestamps: TimestampClock,
    control_sequence: u16,
    /// Messages not yet transmitted, in send order.
    queue: VecDeque<Message>,
    in_flight: InFlightPool,
    output: VecDeque<OutputDatagram>,
    events: VecDeque<PeerEvent>,
    last_send: Instant,
    disconnect: Option<PendingDisconnect>,
    disconnect_later_data: u32,
    data: Option<Bytes>,
    stats: PeerStats,
}

impl Peer {
    pub fn new(address: Address, config: &HostConfig, timestamps: TimestampClock, now: Instant) -> Self {
        Peer {
            address,
            state: PeerState::Disconnected,
            connect_id: 0,
            connect_key: None,
            connect_started: None,
            channels: Vec::new(),
            channel_limit: config.channel_limit,
            reorder_window: config.reorder_window,
            max_fragment_size: config.max_fragment_size,
            max_packet_size: config.max_packet_size,
            incoming_bandwidth: config.incoming_bandwidth,
            outgoing_bandwidth: config.outgoing_bandwidth,
            remote_incoming_bandwidth: 0,
            remote_outgoing_bandwidth: 0,
            config: config.peer.clone(),
            rtt: RttEstimator::new(config.rtt.clone()),
            timestamps,
            control_sequence: 0,
            queue: VecDeque::new(),
            in_flight: InFlightPool::new(),
            output: VecDeque::new(),
            events: VecDeque::new(),
            last_send: now,
            disconnect: None,
            disconnect_later_data: 0,
            data: None,
            stats: PeerStats::new(),
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Start a connection as the initiator. Only valid from `Disconnected`.
    pub fn connect(&mut self, connect_id: u32, channel_count: usize, data: u32, now: Instant) {
        if self.state != PeerState::Disconnected {
            return;
        }
        let channel_count = channel_count.clamp(1, self.channel_limit);
        self.connect_id = connect_id;
        self.channels = self.make_channels(channel_count);
        self.state = PeerState::Connecting;
        self.connect_started = Some(now);

        let sequence = self.next_control_sequence();
        let message = Message::Connect {
            sequence,
            connect_id,
            channel_count: channel_count as u8,
            incoming_bandwidth: self.incoming_bandwidth,
            outgoing_bandwidth: self.outgoing_bandwidth,
            data,
        };
        self.connect_key = message.ack_key();
        self.queue.push_back(message);
        tracing::debug!(peer = %self.address, connect_id, channels = channel_count, "connecting");
        self.transmit_queued(now);
    }

    /// Graceful disconnect: send `Disconnect` and wait for its
    /// acknowledgement, retransmitting on the RTO. A peer still connecting
    /// is dropped immediately.
    pub fn disconnect(&mut self, data: u32, now: Instant) {
        match self.state {
            PeerState::Connected | PeerState::DisconnectLater => self.begin_disconnect(data, now),
            PeerState::Connecting => self.disconnect_now(data, now),
            _ => {}
        }
    }

    /// Send `Disconnect` once, best-effort, and finish immediately with a
    /// local `Disconnected` event.
    pub fn disconnect_now(&mut self, data: u32, now: Instant) {
        if matches!(self.state, PeerState::Disconnected | PeerState::Zombie) {
            return;
        }
        self.emit(Message::Disconnect { data }, now, false);
        tracing::debug!(peer = %self.address, "disconnected immediately");
        self.zombify(data, DisconnectReason::Local);
    }

    /// Disconnect once every queued reliable send has been acknowledged.
    pub fn disconnect_later(&mut self, data: u32, now: Instant) {
        match self.state {
            PeerState::Connected | PeerState::DisconnectLater => {
                if self.has_outstanding_reliable() {
                    self.state = PeerState::DisconnectLater;
                    self.disconnect_later_data = data;
                } else {
                    self.begin_disconnect(data, now);
                }
            }
            PeerState::Connecting => self.disconnect_now(data, now),
            _ => {}
        }
    }

    fn begin_disconnect(&mut self, data: u32, now: Instant) {
        self.queue.clear();
        self.in_flight.clear();
        self.emit(Message::Disconnect { data }, now, false);
        self.disconnect = Some(PendingDisconnect {
            data,
            started: now,
            last_sent: now,
            backoff: self.new_backoff(),
        });
        self.state = PeerState::Disconnecting;
        tracing::debug!(peer = %self.address, "disconnecting");
    }

    fn zombify(&mut self, data: u32, reason: DisconnectReason) {
        self.state = PeerState::Zombie;
        self.queue.clear();
        self.in_flight.clear();
        self.disconnect = None;
        self.connect_key = None;
        self.connect_started = None;
        self.events
            .push_back(PeerEvent::Disconnected { data, reason });
    }

    fn time_out(&mut self, data: u32) {
        tracing::debug!(peer = %self.address, state = ?self.state, "peer timed out");
        self.zombify(data, DisconnectReason::Timeout);
    }

    // ─── Sending ─────────────────────────────────────────────────────────

    /// Queue a packet on a channel. Payloads above `max_fragment_size` are
    /// fragmented; unreliable ones become reliable fragments unless
    /// [`PacketFlags::UNRELIABLE_FRAGMENT`] is set.
    pub fn send(&mut self, channel: u8, packet: Packet) -> Result<(), SendError> {
        if self.state != PeerState::Connected {
            return Err(SendError::NotConnected);
        }
        let channel_count = self.channels.len();
        let max_fragment_size = self.max_fragment_size;
        let max_packet_size = self.max_packet_size;
        let ch = self
            .channels
            .get_mut(channel as usize)
            .ok_or(SendError::InvalidChannel {
                channel,
                channel_count,
            })?;

        let len = packet.len();
        if len > max_packet_size {
            return Err(SendError::PacketTooLarge {
                len,
                max: max_packet_size,
            });
        }

        let delivery = packet.delivery();
        let flags = packet.flags();
        let payload = packet.into_data();

        if len <= max_fragment_size {
            let message = match delivery {
                Delivery::Reliable => Message::ReliableData {
                    channel,
                    sequence: ch.next_reliable_sequence(),
                    payload,
                },
                Delivery::Unreliable => Message::UnreliableData {
                    channel,
                    sequence: ch.next_unreliable_sequence(),
                    payload,
                },
                Delivery::Unsequenced => Message::Unsequenced { channel, payload },
            };
            self.queue.push_back(message);
            return Ok(());
        }

        if channel::fragment_count(len, max_fragment_size) > u16::MAX as usize {
            return Err(SendError::TooManyFragments {
                len,
                max: u16::MAX as usize,
            });
        }

        let reliable = delivery == Delivery::Reliable
            || !flags.contains(PacketFlags::UNRELIABLE_FRAGMENT);
        let sequence = if reliable {
            ch.next_reliable_sequence()
        } else {
            ch.next_unreliable_sequence()
        };
        for fragment in channel::fragment(&payload, sequence, max_fragment_size) {
            self.queue.push_back(if reliable {
                Message::FragmentedData { channel, fragment }
            } else {
                Message::UnreliableFragment { channel, fragment }
            });
        }
        Ok(())
    }

    /// Transmit queued messages, holding back reliable sends that would run
    /// a full reorder window ahead of the oldest unacknowledged send on
    /// their channel.
    pub fn flush(&mut self, now: Instant) {
        self.transmit_queued(now);
    }

    fn transmit_queued(&mut self, now: Instant) {
        if self.queue.is_empty() {
            return;
        }
        let mut held = VecDeque::new();
        let mut blocked: HashSet<u8> = HashSet::new();
        while let Some(message) = self.queue.pop_front() {
            if let Some(key) = message.ack_key() {
                if key.channel != CONTROL_CHANNEL
                    && (blocked.contains(&key.channel) || self.window_full(key))
                {
                    blocked.insert(key.channel);
                    held.push_back(message);
                    continue;
                }
            }
            self.emit(message, now, false);
        }
        self.queue = held;
    }

    fn window_full(&self, key: AckKey) -> bool {
        let Some(channel) = self.channels.get(key.channel as usize) else {
            return false;
        };
        let next = channel.outgoing_reliable_sequence();
        self.in_flight
            .oldest_sequence(key.channel, next)
            .is_some_and(|oldest| key.sequence.wrapping_sub(oldest) >= self.reorder_window)
    }

    /// Encode and queue a message for the transport. Reliable messages are
    /// tracked for retransmission on first transmission.
    fn emit(&mut self, message: Message, now: Instant, is_retransmit: bool) {
        let data = Datagram::encode_message(self.timestamps.now_ms(now), &message).freeze();
        let payload_len = message.payload_len();
        if !matches!(message, Message::Acknowledge { .. }) {
            self.last_send = now;
        }
        self.output.push_back(OutputDatagram {
            data,
            payload_len,
            is_retransmit,
        });
        if !is_retransmit && message.ack_key().is_some() {
            let backoff = self.new_backoff();
            self.in_flight.insert(InFlight::new(message, now, backoff));
        }
    }

    fn acknowledge(&mut self, key: AckKey, received_sent_time: u32, now: Instant) {
        self.emit(
            Message::Acknowledge {
                channel: key.channel,
                sequence: key.sequence,
                fragment_index: key.fragment_index,
                received_sent_time,
            },
            now,
            false,
        );
    }

    fn new_backoff(&self) -> Backoff {
        Backoff::new(self.rtt.rto(), self.rtt.max_rto(), &self.config.timeout)
    }

    fn next_control_sequence(&mut self) -> u16 {
        let sequence = self.control_sequence;
        self.control_sequence = sequence.wrapping_add(1);
        sequence
    }

    fn make_channels(&self, count: usize) -> Vec<Channel> {
        (0..count)
            .map(|_| Channel::new(self.reorder_window, self.max_packet_size))
            .collect()
    }

    fn has_outstanding_reliable(&self) -> bool {
        !self.in_flight.is_empty() || self.queue.iter().any(|m| m.ack_key().is_some())
    }

    // ─── Periodic ────────────────────────────────────────────────────────

    /// Run timers: connect timeout, retransmission and timeout policy,
    /// disconnect retries, deferred disconnect and keepalive.
    pub fn update(&mut self, now: Instant) {
        match self.state {
            PeerState::Disconnected | PeerState::Zombie => return,
            PeerState::Disconnecting => {
                self.update_disconnect(now);
                return;
            }
            PeerState::Connecting => {
                let expired = self.connect_started.is_some_and(|started| {
                    now.saturating_duration_since(started) >= self.config.connect_timeout
                });
                if expired {
                    self.time_out(0);
                    return;
                }
            }
            PeerState::Connected | PeerState::DisconnectLater => {}
        }

        if !self.retransmit_due(now) {
            return;
        }

        if self.state == PeerState::DisconnectLater && !self.has_outstanding_reliable() {
            self.begin_disconnect(self.disconnect_later_data, now);
            return;
        }

        if self.state == PeerState::Connected
            && self.queue.is_empty()
            && now.saturating_duration_since(self.last_send) >= self.config.ping_interval
        {
            let sequence = self.next_control_sequence();
            self.queue.push_back(Message::Ping { sequence });
        }

        self.transmit_queued(now);
    }

    /// Retransmit every send whose RTO elapsed. Returns `false` if the
    /// timeout policy gave up on the peer.
    fn retransmit_due(&mut self, now: Instant) -> bool {
        for key in self.in_flight.due(now) {
            let Some(entry) = self.in_flight.get_mut(&key) else {
                continue;
            };
            if self.config.timeout.is_expired(&entry.backoff, entry.waited(now)) {
                self.time_out(0);
                return false;
            }
            entry.backoff.back_off();
            entry.last_sent = now;
            entry.transmissions += 1;
            let message = entry.message.clone();
            let transmissions = entry.transmissions;

            self.stats.packets_lost += 1;
            self.stats.retransmissions += 1;
            tracing::debug!(
                peer = %self.address,
                channel = key.channel,
                sequence = key.sequence,
                fragment = key.fragment_index,
                transmissions,
                "retransmitting"
            );
            self.emit(message, now, true);
        }

        let stalled = self
            .in_flight
            .oldest()
            .is_some_and(|entry| entry.waited(now) >= self.config.timeout.maximum);
        if stalled {
            self.time_out(0);
            return false;
        }
        true
    }

    fn update_disconnect(&mut self, now: Instant) {
        let Some(pending) = self.disconnect.as_mut() else {
            self.zombify(0, DisconnectReason::Local);
            return;
        };
        if now.saturating_duration_since(pending.last_sent) < pending.backoff.rto() {
            return;
        }
        let data = pending.data;
        let waited = now.saturating_duration_since(pending.started);
        if self.config.timeout.is_expired(&pending.backoff, waited) {
            self.time_out(data);
            return;
        }
        pending.backoff.back_off();
        pending.last_sent = now;
        self.stats.retransmissions += 1;
        self.emit(Message::Disconnect { data }, now, true);
    }

    // ─── Receiving ───────────────────────────────────────────────────────

    /// Process one decoded datagram from this peer's address. Returns the
    /// application payload bytes it carried, if it was accepted as data.
    pub fn handle(&mut self, datagram: Datagram, now: Instant) -> Option<usize> {
        if self.state == PeerState::Zombie {
            return None;
        }
        let sent_time = datagram.sent_time;
        match datagram.message {
            Message::Acknowledge {
                channel,
                sequence,
                fragment_index,
                received_sent_time,
            } => {
                let key = AckKey {
                    channel,
                    sequence,
                    fragment_index,
                };
                self.on_acknowledge(key, received_sent_time, now);
                None
            }
            Message::Connect {
                sequence,
                connect_id,
                channel_count,
                incoming_bandwidth,
                outgoing_bandwidth,
                data,
            } => {
                let key = control_key(sequence);
                self.on_connect(key, sent_time, connect_id, channel_count, data, now);
                if self.state.is_connected() && self.connect_id == connect_id {
                    self.remote_incoming_bandwidth = incoming_bandwidth;
                    self.remote_outgoing_bandwidth = outgoing_bandwidth;
                }
                None
            }
            Message::ConnectAck {
                sequence,
                connect_id,
                channel_count,
                incoming_bandwidth,
                outgoing_bandwidth,
            } => {
                let key = control_key(sequence);
                if self.on_connect_ack(key, sent_time, connect_id, channel_count, now) {
                    self.remote_incoming_bandwidth = incoming_bandwidth;
                    self.remote_outgoing_bandwidth = outgoing_bandwidth;
                }
                None
            }
            Message::Disconnect { data } => {
                if self.state != PeerState::Disconnected {
                    self.emit(Message::DisconnectAck, now, false);
                    tracing::debug!(peer = %self.address, data, "remote disconnected");
                    self.zombify(data, DisconnectReason::Remote);
                }
                None
            }
            Message::DisconnectAck => {
                if self.state == PeerState::Disconnecting {
                    let data = self.disconnect.as_ref().map_or(0, |p| p.data);
                    tracing::debug!(peer = %self.address, "disconnect acknowledged");
                    self.zombify(data, DisconnectReason::Local);
                }
                None
            }
            Message::Ping { sequence } => {
                if self.state != PeerState::Disconnected {
                    self.acknowledge(control_key(sequence), sent_time, now);
                }
                None
            }
            message => self.on_data(message, sent_time, now),
        }
    }

    fn on_acknowledge(&mut self, key: AckKey, received_sent_time: u32, now: Instant) {
        if let Some(entry) = self.in_flight.remove(&key) {
            let rtt = self.timestamps.elapsed_since(now, received_sent_time);
            self.rtt.on_sample(rtt);
            tracing::trace!(
                peer = %self.address,
                channel = key.channel,
                sequence = key.sequence,
                rtt_ms = rtt.as_millis() as u64,
                transmissions = entry.transmissions,
                "acknowledged"
            );
        }
    }

    fn on_connect(
        &mut self,
        key: AckKey,
        sent_time: u32,
        connect_id: u32,
        channel_count: u8,
        data: u32,
        now: Instant,
    ) {
        match self.state {
            PeerState::Disconnected => {
                if channel_count == 0 {
                    tracing::debug!(peer = %self.address, "refusing connect with no channels");
                    return;
                }
                let count = (channel_count as usize).min(self.channel_limit);
                self.connect_id = connect_id;
                self.channels = self.make_channels(count);
                self.acknowledge(key, sent_time, now);

                let sequence = self.next_control_sequence();
                self.queue.push_back(Message::ConnectAck {
                    sequence,
                    connect_id,
                    channel_count: count as u8,
                    incoming_bandwidth: self.incoming_bandwidth,
                    outgoing_bandwidth: self.outgoing_bandwidth,
                });
                self.state = PeerState::Connected;
                self.events.push_back(PeerEvent::Connected { data });
                tracing::debug!(peer = %self.address, connect_id, channels = count, "accepted connection");
                self.transmit_queued(now);
            }
            _ if connect_id == self.connect_id && self.state.is_connected() => {
                // Our acknowledgement was lost.
                self.acknowledge(key, sent_time, now);
            }
            _ => {
                tracing::trace!(peer = %self.address, state = ?self.state, "ignoring connect");
            }
        }
    }

    fn on_connect_ack(
        &mut self,
        key: AckKey,
        sent_time: u32,
        connect_id: u32,
        channel_count: u8,
        now: Instant,
    ) -> bool {
        if connect_id != self.connect_id {
            tracing::trace!(peer = %self.address, connect_id, "connect ack for another attempt");
            return false;
        }
        match self.state {
            PeerState::Connecting => {
                self.acknowledge(key, sent_time, now);
                if let Some(connect_key) = self.connect_key.take() {
                    self.in_flight.remove(&connect_key);
                }
                let count = (channel_count as usize).clamp(1, self.channels.len().max(1));
                self.channels.truncate(count);
                self.state = PeerState::Connected;
                self.connect_started = None;
                self.events.push_back(PeerEvent::Connected { data: 0 });
                tracing::debug!(peer = %self.address, connect_id, channels = count, "connected");
                true
            }
            PeerState::Connected | PeerState::DisconnectLater => {
                self.acknowledge(key, sent_time, now);
                false
            }
            _ => false,
        }
    }

    fn on_data(&mut self, message: Message, sent_time: u32, now: Instant) -> Option<usize> {
        if !self.state.is_connected() {
            tracing::trace!(peer = %self.address, state = ?self.state, "data before connection");
            return None;
        }
        let len = message.payload_len()?;
        let ack = message.ack_key();
        let (channel, incoming) = match message {
            Message::ReliableData {
                channel,
                sequence,
                payload,
            } => (channel, Incoming::Reliable { sequence, payload }),
            Message::UnreliableData {
                channel,
                sequence,
                payload,
            } => (channel, Incoming::Unreliable { sequence, payload }),
            Message::Unsequenced { channel, payload } => {
                (channel, Incoming::Unsequenced { payload })
            }
            Message::FragmentedData { channel, fragment } => {
                (channel, Incoming::ReliableFragment(fragment))
            }
            Message::UnreliableFragment { channel, fragment } => {
                (channel, Incoming::UnreliableFragment(fragment))
            }
            _ => return None,
        };
        let Some(ch) = self.channels.get_mut(channel as usize) else {
            tracing::trace!(peer = %self.address, channel, "data on unknown channel");
            return None;
        };

        self.stats.bytes_received += len as u64;
        self.stats.packets_received += 1;

        match ch.accept(incoming) {
            Ok(packets) => {
                if let Some(key) = ack {
                    self.acknowledge(key, sent_time, now);
                }
                for packet in packets {
                    self.events
                        .push_back(PeerEvent::Received { channel, packet });
                }
            }
            Err(error @ ChannelError::ReassemblyBusy { .. }) => {
                tracing::debug!(peer = %self.address, channel, error = %error, "deferring fragment");
            }
            Err(error) if ack.is_some() => {
                tracing::warn!(
                    peer = %self.address,
                    channel,
                    error = %error,
                    "protocol violation, disconnecting"
                );
                self.emit(Message::Disconnect { data: 0 }, now, false);
                self.zombify(0, DisconnectReason::ProtocolError);
            }
            Err(error) => {
                tracing::debug!(peer = %self.address, channel, error = %error, "dropping fragment");
            }
        }
        Some(len)
    }

    // ─── Output ──────────────────────────────────────────────────────────

    /// Datagrams ready for the transport.
    pub fn drain_output(&mut self) -> impl Iterator<Item = OutputDatagram> + '_ {
        self.output.drain(..)
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = PeerEvent> + '_ {
        self.events.drain(..)
    }

    /// Count a datagram the transport accepted.
    pub fn record_sent(&mut self, payload_len: usize) {
        self.stats.bytes_sent += payload_len as u64;
        self.stats.packets_sent += 1;
    }

    // ─── Accessors ───────────────────────────────────────────────────────

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn connect_id(&self) -> u32 {
        self.connect_id
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Smoothed round-trip time.
    pub fn rtt(&self) -> Duration {
        self.rtt.srtt()
    }

    pub fn rtt_variance(&self) -> Duration {
        self.rtt.rttvar()
    }

    /// Current retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.rtt.rto()
    }

    pub fn ping_interval(&self) -> Duration {
        self.config.ping_interval
    }

    pub fn set_ping_interval(&mut self, interval: Duration) {
        if !interval.is_zero() {
            self.config.ping_interval = interval;
        }
    }

    pub fn timeout(&self) -> TimeoutPolicy {
        self.config.timeout
    }

    /// Applies to sends made from now on and to back-off limits computed
    /// afterwards.
    pub fn set_timeout(&mut self, limit: u32, minimum: Duration, maximum: Duration) {
        self.config.timeout = TimeoutPolicy::new(limit, minimum, maximum);
    }

    pub fn stats(&self) -> &PeerStats {
        &self.stats
    }

    /// Bandwidth the remote declared, as `(incoming, outgoing)` bytes/sec.
    pub fn remote_bandwidth(&self) -> (u32, u32) {
        (self.remote_incoming_bandwidth, self.remote_outgoing_bandwidth)
    }

    /// Unacknowledged reliable sends.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Messages waiting to be transmitted.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn data(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }

    /// Replace the application data slot, returning the previous value.
    pub fn set_data(&mut self, data: Bytes) -> Option<Bytes> {
        self.data.replace(data)
    }

    pub fn take_data(&mut self) -> Option<Bytes> {
        self.data.take()
    }
}

fn control_key(sequence: u16) -> AckKey {
    AckKey {
        channel: CONTROL_CHANNEL,
        sequence,
        fragment_index: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quanta::{Clock, Mock};
    use std::sync::Arc;

    struct Pair {
        clock: Clock,
        mock: Arc<Mock>,
        client: Peer,
        server: Peer,
    }

    fn config() -> HostConfig {
        HostConfig {
            max_fragment_size: 100,
            ..HostConfig::default()
        }
    }

    fn decode(out: OutputDatagram) -> Datagram {
        Datagram::decode(&mut out.data.clone()).unwrap()
    }

    /// Deliver everything `from` has queued to `to`, returning the messages.
    fn pump(from: &mut Peer, to: &mut Peer, now: Instant) -> Vec<Message> {
        let datagrams: Vec<Datagram> = from.drain_output().map(decode).collect();
        let messages = datagrams.iter().map(|d| d.message.clone()).collect();
        for datagram in datagrams {
            to.handle(datagram, now);
        }
        messages
    }

    fn connected_pair() -> Pair {
        let (clock, mock) = Clock::mock();
        let now = clock.now();
        let stamps = TimestampClock::new(now);
        let config = config();
        let mut client = Peer::new(Address::localhost(1000), &config, stamps, now);
        let mut server = Peer::new(Address::localhost(2000), &config, stamps, now);

        client.connect(0xABCD, 4, 77, now);
        assert_eq!(client.state(), PeerState::Connecting);
        pump(&mut client, &mut server, now);
        assert_eq!(server.state(), PeerState::Connected);
        assert_eq!(
            server.drain_events().collect::<Vec<_>>(),
            vec![PeerEvent::Connected { data: 77 }]
        );
        pump(&mut server, &mut client, now);
        assert_eq!(client.state(), PeerState::Connected);
        assert_eq!(
            client.drain_events().collect::<Vec<_>>(),
            vec![PeerEvent::Connected { data: 0 }]
        );
        pump(&mut client, &mut server, now);
        assert_eq!(client.in_flight(), 0);
        assert_eq!(server.in_flight(), 0);

        Pair {
            clock,
            mock,
            client,
            server,
        }
    }

    fn received(peer: &mut Peer) -> Vec<Bytes> {
        peer.drain_events()
            .filter_map(|e| match e {
                PeerEvent::Received { packet, .. } => Some(packet.into_data()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn handshake_agrees_on_channels() {
        let pair = connected_pair();
        assert_eq!(pair.client.channel_count(), 4);
        assert_eq!(pair.server.channel_count(), 4);
        assert_eq!(pair.server.connect_id(), 0xABCD);
    }

    #[test]
    fn channel_count_limited_by_acceptor() {
        let (clock, _mock) = Clock::mock();
        let now = clock.now();
        let stamps = TimestampClock::new(now);
        let mut client = Peer::new(Address::localhost(1), &config(), stamps, now);
        let small = HostConfig {
            channel_limit: 2,
            ..config()
        };
        let mut server = Peer::new(Address::localhost(2), &small, stamps, now);
        client.connect(1, 8, 0, now);
        pump(&mut client, &mut server, now);
        pump(&mut server, &mut client, now);
        assert_eq!(server.channel_count(), 2);
        assert_eq!(client.channel_count(), 2);
    }

    #[test]
    fn send_requires_connection_and_valid_channel() {
        let (clock, _mock) = Clock::mock();
        let now = clock.now();
        let mut peer = Peer::new(Address::localhost(1), &config(), TimestampClock::new(now), now);
        assert_eq!(
            peer.send(0, Packet::reliable(&b"x"[..])),
            Err(SendError::NotConnected)
        );

        let mut pair = connected_pair();
        assert_eq!(
            pair.client.send(9, Packet::reliable(&b"x"[..])),
            Err(SendError::InvalidChannel {
                channel: 9,
                channel_count: 4
            })
        );
    }

    #[test]
    fn reliable_data_is_acked_and_delivered() {
        let mut pair = connected_pair();
        let now = pair.clock.now();
        pair.client
            .send(1, Packet::reliable(&b"hello"[..]))
            .unwrap();
        pair.client.flush(now);
        assert_eq!(pair.client.in_flight(), 1);

        pump(&mut pair.client, &mut pair.server, now);
        assert_eq!(received(&mut pair.server), vec![Bytes::from_static(b"hello")]);
        assert_eq!(pair.server.stats().bytes_received, 5);

        let acks = pump(&mut pair.server, &mut pair.client, now);
        assert!(matches!(acks[0], Message::Acknowledge { channel: 1, .. }));
        assert_eq!(pair.client.in_flight(), 0);
    }

    #[test]
    fn oversized_packet_is_fragmented() {
        let mut pair = connected_pair();
        let now = pair.clock.now();
        let payload = Bytes::from((0..450u32).map(|i| i as u8).collect::<Vec<_>>());
        pair.client.send(0, Packet::reliable(payload.clone())).unwrap();
        pair.client.flush(now);
        assert_eq!(pair.client.in_flight(), 5);

        let sent = pump(&mut pair.client, &mut pair.server, now);
        assert!(sent
            .iter()
            .all(|m| matches!(m, Message::FragmentedData { .. })));
        assert_eq!(received(&mut pair.server), vec![payload]);
    }

    #[test]
    fn unreliable_oversized_promoted_unless_flagged() {
        let mut pair = connected_pair();
        let now = pair.clock.now();
        let payload = Bytes::from(vec![1u8; 250]);

        pair.client.send(0, Packet::unreliable(payload.clone())).unwrap();
        pair.client.flush(now);
        let sent = pump(&mut pair.client, &mut pair.server, now);
        assert!(matches!(sent[0], Message::FragmentedData { .. }));

        pair.client
            .send(
                0,
                Packet::new(payload.clone(), PacketFlags::UNRELIABLE_FRAGMENT),
            )
            .unwrap();
        pair.client.flush(now);
        let sent = pump(&mut pair.client, &mut pair.server, now);
        assert_eq!(sent.len(), 3);
        assert!(sent
            .iter()
            .all(|m| matches!(m, Message::UnreliableFragment { .. })));
        assert_eq!(received(&mut pair.server), vec![payload.clone(), payload]);
    }

    #[test]
    fn packet_too_large_rejected() {
        let mut pair = connected_pair();
        pair.client.max_packet_size = 1000;
        let err = pair
            .client
            .send(0, Packet::reliable(vec![0u8; 1001]))
            .unwrap_err();
        assert_eq!(err, SendError::PacketTooLarge { len: 1001, max: 1000 });
    }

    #[test]
    fn lost_reliable_send_is_retransmitted() {
        let mut pair = connected_pair();
        let now = pair.clock.now();
        pair.client.send(0, Packet::reliable(&b"once"[..])).unwrap();
        pair.client.flush(now);
        pair.client.drain_output().for_each(drop);

        let rto = pair.client.rto();
        pair.mock.increment(rto);
        let now = pair.clock.now();
        pair.client.update(now);
        let resent: Vec<OutputDatagram> = pair.client.drain_output().collect();
        assert!(resent.iter().any(|o| o.is_retransmit));
        assert_eq!(pair.client.stats().packets_lost, 1);

        for out in resent {
            pair.server.handle(decode(out), now);
        }
        assert_eq!(received(&mut pair.server), vec![Bytes::from_static(b"once")]);
    }

    #[test]
    fn unanswered_peer_times_out() {
        let mut pair = connected_pair();
        pair.client
            .set_timeout(4, Duration::from_secs(1), Duration::from_secs(3));
        pair.client.send(0, Packet::reliable(&b"lost"[..])).unwrap();
        pair.client.flush(pair.clock.now());

        let mut events = Vec::new();
        for _ in 0..100 {
            pair.mock.increment(Duration::from_millis(100));
            pair.client.update(pair.clock.now());
            pair.client.drain_output().for_each(drop);
            events.extend(pair.client.drain_events());
            if pair.client.state() == PeerState::Zombie {
                break;
            }
        }
        assert_eq!(pair.client.state(), PeerState::Zombie);
        assert_eq!(
            events,
            vec![PeerEvent::Disconnected {
                data: 0,
                reason: DisconnectReason::Timeout
            }]
        );
    }

    #[test]
    fn connect_times_out_without_answer() {
        let (clock, mock) = Clock::mock();
        let now = clock.now();
        let mut peer = Peer::new(Address::localhost(1), &config(), TimestampClock::new(now), now);
        peer.connect(5, 1, 0, now);
        mock.increment(Duration::from_secs(5));
        peer.update(clock.now());
        assert_eq!(peer.state(), PeerState::Zombie);
        assert_eq!(
            peer.drain_events().collect::<Vec<_>>(),
            vec![PeerEvent::Disconnected {
                data: 0,
                reason: DisconnectReason::Timeout
            }]
        );
    }

    #[test]
    fn graceful_disconnect_handshake() {
        let mut pair = connected_pair();
        let now = pair.clock.now();
        pair.client.disconnect(42, now);
        assert_eq!(pair.client.state(), PeerState::Disconnecting);

        pump(&mut pair.client, &mut pair.server, now);
        assert_eq!(pair.server.state(), PeerState::Zombie);
        assert_eq!(
            pair.server.drain_events().collect::<Vec<_>>(),
            vec![PeerEvent::Disconnected {
                data: 42,
                reason: DisconnectReason::Remote
            }]
        );

        pump(&mut pair.server, &mut pair.client, now);
        assert_eq!(pair.client.state(), PeerState::Zombie);
        assert_eq!(
            pair.client.drain_events().collect::<Vec<_>>(),
            vec![PeerEvent::Disconnected {
                data: 42,
                reason: DisconnectReason::Local
            }]
        );
    }

    #[test]
    fn disconnect_is_retransmitted_until_acked() {
        let mut pair = connected_pair();
        pair.client.disconnect(1, pair.clock.now());
        pair.client.drain_output().for_each(drop);

        pair.mock.increment(pair.client.rto());
        pair.client.update(pair.clock.now());
        let resent: Vec<Datagram> = pair.client.drain_output().map(decode).collect();
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0].message, Message::Disconnect { data: 1 });
        assert_eq!(pair.client.state(), PeerState::Disconnecting);
    }

    #[test]
    fn disconnect_now_emits_event_immediately() {
        let mut pair = connected_pair();
        pair.client.disconnect_now(3, pair.clock.now());
        assert_eq!(pair.client.state(), PeerState::Zombie);
        assert_eq!(
            pair.client.drain_events().collect::<Vec<_>>(),
            vec![PeerEvent::Disconnected {
                data: 3,
                reason: DisconnectReason::Local
            }]
        );
        let sent: Vec<Datagram> = pair.client.drain_output().map(decode).collect();
        assert_eq!(sent[0].message, Message::Disconnect { data: 3 });
    }

    #[test]
    fn disconnect_later_waits_for_acks() {
        let mut pair = connected_pair();
        let now = pair.clock.now();
        pair.client.send(0, Packet::reliable(&b"last"[..])).unwrap();
        pair.client.flush(now);
        pair.client.disconnect_later(8, now);
        assert_eq!(pair.client.state(), PeerState::DisconnectLater);
        assert_eq!(
            pair.client.send(0, Packet::reliable(&b"too late"[..])),
            Err(SendError::NotConnected)
        );

        pump(&mut pair.client, &mut pair.server, now);
        pump(&mut pair.server, &mut pair.client, now);
        pair.client.update(now);
        assert_eq!(pair.client.state(), PeerState::Disconnecting);
        let sent = pump(&mut pair.client, &mut pair.server, now);
        assert_eq!(sent, vec![Message::Disconnect { data: 8 }]);
        assert_eq!(received(&mut pair.server), vec![Bytes::from_static(b"last")]);
    }

    #[test]
    fn idle_peer_pings() {
        let mut pair = connected_pair();
        pair.mock.increment(pair.client.ping_interval());
        pair.client.update(pair.clock.now());
        let sent: Vec<Datagram> = pair.client.drain_output().map(decode).collect();
        assert!(matches!(sent[0].message, Message::Ping { .. }));
    }

    #[test]
    fn backlog_overflow_disconnects_with_protocol_error() {
        let mut pair = connected_pair();
        let now = pair.clock.now();
        let window = pair.server.reorder_window;
        pair.server.handle(
            Datagram::new(
                0,
                Message::ReliableData {
                    channel: 0,
                    sequence: window,
                    payload: Bytes::from_static(b"far"),
                },
            ),
            now,
        );
        assert_eq!(pair.server.state(), PeerState::Zombie);
        assert_eq!(
            pair.server.drain_events().collect::<Vec<_>>(),
            vec![PeerEvent::Disconnected {
                data: 0,
                reason: DisconnectReason::ProtocolError
            }]
        );
    }

    #[test]
    fn fragment_beyond_reassembly_budget_is_left_unacked() {
        let mut pair = connected_pair();
        let now = pair.clock.now();
        let big = (20 * 1024 * 1024) as u32;
        for sequence in [1u16, 2] {
            pair.server.handle(
                Datagram::new(
                    0,
                    Message::FragmentedData {
                        channel: 0,
                        fragment: crate::wire::Fragment {
                            sequence,
                            index: 0,
                            count: 2,
                            total_length: big,
                            payload: Bytes::from_static(b"head"),
                        },
                    },
                ),
                now,
            );
        }
        assert_eq!(pair.server.state(), PeerState::Connected);
        assert!(pair.server.drain_events().next().is_none());

        let acked: Vec<u16> = pair
            .server
            .drain_output()
            .map(decode)
            .filter_map(|d| match d.message {
                Message::Acknowledge { sequence, .. } => Some(sequence),
                _ => None,
            })
            .collect();
        assert_eq!(acked, vec![1]);
    }

    #[test]
    fn reliable_sends_held_back_beyond_window() {
        let (clock, _mock) = Clock::mock();
        let now = clock.now();
        let stamps = TimestampClock::new(now);
        let narrow = HostConfig {
            reorder_window: 4,
            ..config()
        };
        let mut client = Peer::new(Address::localhost(1), &narrow, stamps, now);
        let mut server = Peer::new(Address::localhost(2), &narrow, stamps, now);
        client.connect(1, 1, 0, now);
        pump(&mut client, &mut server, now);
        pump(&mut server, &mut client, now);
        pump(&mut client, &mut server, now);

        for i in 0..6u8 {
            client.send(0, Packet::reliable(vec![i])).unwrap();
        }
        client.flush(now);
        assert_eq!(client.in_flight(), 4);
        assert_eq!(client.queued(), 2);

        pump(&mut client, &mut server, now);
        pump(&mut server, &mut client, now);
        client.flush(now);
        assert_eq!(client.queued(), 0);
        pump(&mut client, &mut server, now);
        assert_eq!(received(&mut server).len(), 6);
    }

    #[test]
    fn rtt_sampled_from_acks() {
        let mut pair = connected_pair();
        let start = pair.clock.now();
        pair.client.send(0, Packet::reliable(&b"t"[..])).unwrap();
        pair.client.flush(start);
        pump(&mut pair.client, &mut pair.server, start);
        pair.mock.increment(Duration::from_millis(40));
        pump(&mut pair.server, &mut pair.client, pair.clock.now());
        assert!(pair.client.rtt() <= Duration::from_millis(40));
    }

    #[test]
    fn data_slot_round_trip() {
        let mut pair = connected_pair();
        assert!(pair.client.data().is_none());
        assert_eq!(pair.client.set_data(Bytes::from_static(b"a")), None);
        assert_eq!(
            pair.client.set_data(Bytes::from_static(b"b")),
            Some(Bytes::from_static(b"a"))
        );
        assert_eq!(pair.client.take_data(), Some(Bytes::from_static(b"b")));
        assert!(pair.client.data().is_none());
    }
}
