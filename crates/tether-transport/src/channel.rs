//! # Channels
//!
//! Per-channel sequencing and fragment reassembly for one logical stream of
//! a connection.
//!
//! - **Reliable** messages are delivered in strictly increasing sequence
//!   order. Early arrivals wait in a reorder backlog bounded by the reorder
//!   window; anything further ahead is a protocol violation.
//! - **Unreliable** messages are delivered on arrival unless they are not
//!   newer than the last one delivered.
//! - **Unsequenced** messages are delivered on arrival, unconditionally.
//!
//! Sequence numbers are 16-bit and wrap; "newer" is judged over half the
//! sequence space.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};

use crate::error::ChannelError;
use crate::packet::{Packet, PacketFlags};
use crate::wire::Fragment;

/// Distances at or beyond this are "behind", not "ahead".
pub const SEQUENCE_HALF_RANGE: u16 = 0x8000;

/// Whether `a` is strictly newer than `b` in wrapping sequence space.
#[inline]
pub fn sequence_newer(a: u16, b: u16) -> bool {
    a != b && a.wrapping_sub(b) < SEQUENCE_HALF_RANGE
}

// ─── Fragmentation ───────────────────────────────────────────────────────────

/// Number of fragments `len` bytes split into at `max_fragment_size` each.
pub fn fragment_count(len: usize, max_fragment_size: usize) -> usize {
    len.div_ceil(max_fragment_size.max(1)).max(1)
}

/// Split `payload` into fragments sharing `sequence`.
///
/// The caller checks [`fragment_count`] fits in a `u16` and the payload
/// length fits in a `u32`.
pub fn fragment(payload: &Bytes, sequence: u16, max_fragment_size: usize) -> Vec<Fragment> {
    let size = max_fragment_size.max(1);
    let count = fragment_count(payload.len(), size);
    debug_assert!(count <= u16::MAX as usize);
    (0..count)
        .map(|i| {
            let start = i * size;
            let end = (start + size).min(payload.len());
            Fragment {
                sequence,
                index: i as u16,
                count: count as u16,
                total_length: payload.len() as u32,
                payload: payload.slice(start..end),
            }
        })
        .collect()
}

// ─── Reassembly ──────────────────────────────────────────────────────────────

/// Accumulates the fragments of one sequence number.
///
/// Pieces are stored as they arrive, so memory follows the bytes received
/// rather than the fragment count a header declares.
#[derive(Debug)]
pub struct Reassembly {
    sequence: u16,
    count: u16,
    total_length: u32,
    received_bytes: usize,
    pieces: BTreeMap<u16, Bytes>,
}

impl Reassembly {
    /// Start reassembly from the header of any fragment of the message.
    ///
    /// Every fragment but the only one carries at least one byte, so a
    /// header declaring more fragments than bytes is rejected.
    pub fn new(first: &Fragment, max_packet_size: usize) -> Result<Self, ChannelError> {
        if first.count == 0 || first.index >= first.count {
            return Err(ChannelError::FragmentIndex {
                index: first.index,
                count: first.count,
            });
        }
        if first.total_length as usize > max_packet_size {
            return Err(ChannelError::PacketTooLarge {
                total_length: first.total_length,
                max: max_packet_size,
            });
        }
        if u32::from(first.count) > first.total_length.max(1) {
            return Err(ChannelError::FragmentCount {
                count: first.count,
                total_length: first.total_length,
            });
        }
        Ok(Reassembly {
            sequence: first.sequence,
            count: first.count,
            total_length: first.total_length,
            received_bytes: 0,
            pieces: BTreeMap::new(),
        })
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn total_length(&self) -> u32 {
        self.total_length
    }

    pub fn received(&self) -> u16 {
        self.pieces.len() as u16
    }

    pub fn is_complete(&self) -> bool {
        self.pieces.len() == self.count as usize
    }

    /// Add a fragment. Duplicates are ignored.
    pub fn insert(&mut self, fragment: Fragment) -> Result<(), ChannelError> {
        if fragment.sequence != self.sequence
            || fragment.count != self.count
            || fragment.total_length != self.total_length
        {
            return Err(ChannelError::InconsistentFragment {
                sequence: self.sequence,
            });
        }
        if fragment.index >= self.count {
            return Err(ChannelError::FragmentIndex {
                index: fragment.index,
                count: self.count,
            });
        }
        if self.pieces.contains_key(&fragment.index) {
            return Ok(());
        }
        let received_bytes = self.received_bytes + fragment.payload.len();
        if received_bytes > self.total_length as usize
            || (fragment.payload.is_empty() && self.count > 1)
        {
            return Err(ChannelError::LengthMismatch {
                sequence: self.sequence,
                total_length: self.total_length,
            });
        }
        self.received_bytes = received_bytes;
        self.pieces.insert(fragment.index, fragment.payload);
        Ok(())
    }

    /// Concatenate the pieces of a complete message.
    pub fn assemble(self) -> Result<Bytes, ChannelError> {
        if !self.is_complete() || self.received_bytes != self.total_length as usize {
            return Err(ChannelError::LengthMismatch {
                sequence: self.sequence,
                total_length: self.total_length,
            });
        }
        let mut out = BytesMut::with_capacity(self.received_bytes);
        for piece in self.pieces.into_values() {
            out.extend_from_slice(&piece);
        }
        Ok(out.freeze())
    }
}

// ─── Channel ─────────────────────────────────────────────────────────────────

/// A message arriving on a channel, already stripped of its wire framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Reliable { sequence: u16, payload: Bytes },
    Unreliable { sequence: u16, payload: Bytes },
    Unsequenced { payload: Bytes },
    ReliableFragment(Fragment),
    UnreliableFragment(Fragment),
}

enum Arrival {
    Whole(Bytes),
    Fragment(Fragment),
}

#[derive(Debug)]
enum Pending {
    Whole(Bytes),
    Partial(Reassembly),
}

/// Sequencing state of one channel of one peer.
#[derive(Debug)]
pub struct Channel {
    outgoing_reliable: u16,
    outgoing_unreliable: u16,
    /// Next reliable sequence to hand to the application.
    incoming_reliable: u16,
    /// Last unreliable sequence handed to the application.
    last_unreliable: Option<u16>,
    /// Reliable messages that arrived ahead of `incoming_reliable`.
    backlog: BTreeMap<u16, Pending>,
    /// Declared length of every partial reliable message in the backlog.
    partial_bytes: usize,
    /// The single in-flight unreliable reassembly.
    reassembly: Option<Reassembly>,
    reorder_window: u16,
    max_packet_size: usize,
}

impl Channel {
    pub fn new(reorder_window: u16, max_packet_size: usize) -> Self {
        Channel {
            outgoing_reliable: 0,
            outgoing_unreliable: 0,
            incoming_reliable: 0,
            last_unreliable: None,
            backlog: BTreeMap::new(),
            partial_bytes: 0,
            reassembly: None,
            reorder_window: reorder_window.clamp(1, SEQUENCE_HALF_RANGE - 1),
            max_packet_size,
        }
    }

    /// Allocate the next outgoing reliable sequence number.
    pub fn next_reliable_sequence(&mut self) -> u16 {
        let seq = self.outgoing_reliable;
        self.outgoing_reliable = seq.wrapping_add(1);
        seq
    }

    /// Allocate the next outgoing unreliable sequence number.
    pub fn next_unreliable_sequence(&mut self) -> u16 {
        let seq = self.outgoing_unreliable;
        self.outgoing_unreliable = seq.wrapping_add(1);
        seq
    }

    /// The sequence the next reliable send will use.
    pub fn outgoing_reliable_sequence(&self) -> u16 {
        self.outgoing_reliable
    }

    pub fn expected_reliable_sequence(&self) -> u16 {
        self.incoming_reliable
    }

    pub fn last_unreliable_sequence(&self) -> Option<u16> {
        self.last_unreliable
    }

    /// Reliable messages waiting behind a gap.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Declared bytes of the partially received reliable messages held.
    pub fn partial_bytes(&self) -> usize {
        self.partial_bytes
    }

    pub fn reorder_window(&self) -> u16 {
        self.reorder_window
    }

    /// Accept one incoming message and return whatever became deliverable,
    /// in delivery order.
    ///
    /// An error means the remote broke the protocol (reliable backlog
    /// overflow or an inconsistent fragment); the peer should disconnect.
    pub fn accept(&mut self, incoming: Incoming) -> Result<Vec<Packet>, ChannelError> {
        match incoming {
            Incoming::Reliable { sequence, payload } => {
                self.accept_reliable(sequence, Arrival::Whole(payload))
            }
            Incoming::ReliableFragment(fragment) => {
                let sequence = fragment.sequence;
                self.accept_reliable(sequence, Arrival::Fragment(fragment))
            }
            Incoming::Unreliable { sequence, payload } => {
                if !self.is_fresh_unreliable(sequence) {
                    return Ok(Vec::new());
                }
                self.last_unreliable = Some(sequence);
                Ok(vec![Packet::new(payload, PacketFlags::empty())])
            }
            Incoming::Unsequenced { payload } => {
                Ok(vec![Packet::new(payload, PacketFlags::UNSEQUENCED)])
            }
            Incoming::UnreliableFragment(fragment) => {
                let sequence = fragment.sequence;
                if !self.is_fresh_unreliable(sequence) {
                    return Ok(Vec::new());
                }
                match self.reassemble(fragment)? {
                    Some(payload) => {
                        self.last_unreliable = Some(sequence);
                        Ok(vec![Packet::new(payload, PacketFlags::empty())])
                    }
                    None => Ok(Vec::new()),
                }
            }
        }
    }

    /// Feed a fragment to the channel's single reassembly buffer.
    ///
    /// A fragment of a newer sequence discards the partial message in
    /// progress; fragments of older sequences are ignored. Returns the
    /// payload once every fragment of its sequence has arrived.
    pub fn reassemble(&mut self, fragment: Fragment) -> Result<Option<Bytes>, ChannelError> {
        let current = self.reassembly.as_ref().map(Reassembly::sequence);
        match current {
            Some(seq) if seq == fragment.sequence => {}
            Some(seq) if !sequence_newer(fragment.sequence, seq) => return Ok(None),
            _ => {
                if let Some(seq) = current {
                    tracing::debug!(
                        superseded = seq,
                        sequence = fragment.sequence,
                        "discarding partial reassembly"
                    );
                }
                self.reassembly = Some(Reassembly::new(&fragment, self.max_packet_size)?);
            }
        }

        let complete = match self.reassembly.as_mut() {
            Some(reassembly) => {
                reassembly.insert(fragment)?;
                reassembly.is_complete()
            }
            None => false,
        };
        if !complete {
            return Ok(None);
        }
        match self.reassembly.take() {
            Some(reassembly) => reassembly.assemble().map(Some),
            None => Ok(None),
        }
    }

    fn is_fresh_unreliable(&self, sequence: u16) -> bool {
        self.last_unreliable
            .map_or(true, |last| sequence_newer(sequence, last))
    }

    fn accept_reliable(
        &mut self,
        sequence: u16,
        arrival: Arrival,
    ) -> Result<Vec<Packet>, ChannelError> {
        let distance = sequence.wrapping_sub(self.incoming_reliable);
        if distance >= SEQUENCE_HALF_RANGE {
            // Already delivered.
            return Ok(Vec::new());
        }
        if distance >= self.reorder_window {
            return Err(ChannelError::BacklogExceeded {
                sequence,
                expected: self.incoming_reliable,
                distance,
                window: self.reorder_window,
            });
        }

        match (self.backlog.entry(sequence), arrival) {
            (Entry::Vacant(slot), Arrival::Whole(payload)) => {
                slot.insert(Pending::Whole(payload));
            }
            (Entry::Vacant(slot), Arrival::Fragment(fragment)) => {
                let mut reassembly = Reassembly::new(&fragment, self.max_packet_size)?;
                let declared = reassembly.total_length() as usize;
                // The message at the delivery point is always admitted.
                if sequence != self.incoming_reliable
                    && self.partial_bytes + declared > self.max_packet_size
                {
                    return Err(ChannelError::ReassemblyBusy {
                        sequence,
                        pending: self.partial_bytes,
                    });
                }
                reassembly.insert(fragment)?;
                self.partial_bytes += declared;
                slot.insert(Pending::Partial(reassembly));
            }
            (Entry::Occupied(mut slot), Arrival::Fragment(fragment)) => match slot.get_mut() {
                Pending::Partial(reassembly) => reassembly.insert(fragment)?,
                Pending::Whole(_) => {
                    return Err(ChannelError::InconsistentFragment { sequence });
                }
            },
            (Entry::Occupied(slot), Arrival::Whole(_)) => {
                if matches!(slot.get(), Pending::Partial(_)) {
                    return Err(ChannelError::InconsistentFragment { sequence });
                }
                // Duplicate of a message already waiting.
            }
        }

        self.drain_ready()
    }

    fn drain_ready(&mut self) -> Result<Vec<Packet>, ChannelError> {
        let mut out = Vec::new();
        loop {
            let ready = match self.backlog.get(&self.incoming_reliable) {
                Some(Pending::Whole(_)) => true,
                Some(Pending::Partial(reassembly)) => reassembly.is_complete(),
                None => false,
            };
            if !ready {
                break;
            }
            let Some(pending) = self.backlog.remove(&self.incoming_reliable) else {
                break;
            };
            self.incoming_reliable = self.incoming_reliable.wrapping_add(1);
            let payload = match pending {
                Pending::Whole(payload) => payload,
                Pending::Partial(reassembly) => {
                    self.partial_bytes -= reassembly.total_length() as usize;
                    reassembly.assemble()?
                }
            };
            out.push(Packet::new(payload, PacketFlags::RELIABLE));
        }
        Ok(out)
    }
}
