//! # In-Flight Pool
//!
//! Slab-backed store of a peer's unacknowledged reliable sends, indexed by
//! [`AckKey`] so an acknowledgement removes its entry in O(1). Entries hold
//! the encoded-ready [`Message`] so retransmission never re-fragments.

use std::collections::HashMap;
use std::time::Duration;

use quanta::Instant;
use slab::Slab;

use crate::arq::Backoff;
use crate::wire::{AckKey, Message};

// ─── InFlight ────────────────────────────────────────────────────────────────

/// One reliable send awaiting acknowledgement.
#[derive(Debug, Clone)]
pub struct InFlight {
    pub message: Message,
    /// First transmission; timeouts are measured from here.
    pub first_sent: Instant,
    pub last_sent: Instant,
    pub backoff: Backoff,
    pub transmissions: u32,
}

impl InFlight {
    pub fn new(message: Message, now: Instant, backoff: Backoff) -> Self {
        InFlight {
            message,
            first_sent: now,
            last_sent: now,
            backoff,
            transmissions: 1,
        }
    }

    /// Whether the per-send RTO has elapsed since the latest transmission.
    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_sent) >= self.backoff.rto()
    }

    pub fn waited(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.first_sent)
    }
}

// ─── InFlightPool ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InFlightPool {
    entries: Slab<InFlight>,
    index: HashMap<AckKey, usize>,
}

impl InFlightPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a reliable send. A message without an ack key is ignored.
    pub fn insert(&mut self, entry: InFlight) {
        let Some(key) = entry.message.ack_key() else {
            return;
        };
        match self.index.get(&key) {
            Some(&slot) => self.entries[slot] = entry,
            None => {
                let slot = self.entries.insert(entry);
                self.index.insert(key, slot);
            }
        }
    }

    /// Remove the entry an acknowledgement refers to.
    pub fn remove(&mut self, key: &AckKey) -> Option<InFlight> {
        let slot = self.index.remove(key)?;
        self.entries.try_remove(slot)
    }

    pub fn get_mut(&mut self, key: &AckKey) -> Option<&mut InFlight> {
        let slot = *self.index.get(key)?;
        self.entries.get_mut(slot)
    }

    pub fn contains(&self, key: &AckKey) -> bool {
        self.index.contains_key(key)
    }

    /// Keys of entries whose RTO has elapsed, oldest first.
    pub fn due(&self, now: Instant) -> Vec<AckKey> {
        let mut due: Vec<(Instant, AckKey)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_due(now))
            .filter_map(|(_, entry)| Some((entry.first_sent, entry.message.ack_key()?)))
            .collect();
        due.sort();
        due.into_iter().map(|(_, key)| key).collect()
    }

    /// The entry that has been outstanding longest.
    pub fn oldest(&self) -> Option<&InFlight> {
        self.entries
            .iter()
            .map(|(_, entry)| entry)
            .min_by_key(|entry| entry.first_sent)
    }

    /// Oldest unacknowledged sequence on `channel`, judged relative to the
    /// channel's next outgoing sequence so wrap-around is handled.
    pub fn oldest_sequence(&self, channel: u8, next_outgoing: u16) -> Option<u16> {
        self.index
            .keys()
            .filter(|key| key.channel == channel)
            .map(|key| key.sequence)
            .max_by_key(|&sequence| next_outgoing.wrapping_sub(sequence))
    }

    pub fn iter(&self) -> impl Iterator<Item = &InFlight> {
        self.entries.iter().map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }
}

// ─── TimestampClock ──────────────────────────────────────────────────────────

/// Millisecond timestamps for the datagram header, relative to a fixed
/// epoch. Wraps every ~49.7 days (u32::MAX ms).
#[derive(Debug, Clone, Copy)]
pub struct TimestampClock {
    epoch: Instant,
}

impl TimestampClock {
    pub fn new(epoch: Instant) -> Self {
        TimestampClock { epoch }
    }

    pub fn now_ms(&self, now: Instant) -> u32 {
        let elapsed = now.saturating_duration_since(self.epoch);
        (elapsed.as_millis() as u64 & 0xFFFF_FFFF) as u32
    }

    /// Time since a timestamp produced by this clock.
    pub fn elapsed_since(&self, now: Instant, sent_ms: u32) -> Duration {
        Duration::from_millis(self.now_ms(now).wrapping_sub(sent_ms) as u64)
    }
}
