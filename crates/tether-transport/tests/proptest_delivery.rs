//! Property-based tests for channel delivery.
//!
//! Whatever order the network delivers reliable messages and fragments in,
//! and however often it repeats them, the application sees every message
//! exactly once, in send order.

use bytes::Bytes;
use proptest::prelude::*;
use tether_transport::channel::{fragment, Channel, Incoming};
use tether_transport::packet::PacketFlags;

const MAX_FRAGMENT: usize = 256;

fn payloads() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(
        prop_oneof![
            3 => prop::collection::vec(any::<u8>(), 0..MAX_FRAGMENT),
            1 => prop::collection::vec(any::<u8>(), MAX_FRAGMENT + 1..2000),
        ],
        1..48,
    )
}

/// What a sender would put on the wire for `payloads`, reliable throughout.
fn wire_messages(payloads: &[Vec<u8>]) -> Vec<Incoming> {
    let mut out = Vec::new();
    for (sequence, payload) in payloads.iter().enumerate() {
        let sequence = sequence as u16;
        let payload = Bytes::from(payload.clone());
        if payload.len() <= MAX_FRAGMENT {
            out.push(Incoming::Reliable { sequence, payload });
        } else {
            out.extend(
                fragment(&payload, sequence, MAX_FRAGMENT)
                    .into_iter()
                    .map(Incoming::ReliableFragment),
            );
        }
    }
    out
}

/// `messages` with the ones selected by `repeat` sent twice, in `order`.
fn scramble(messages: Vec<Incoming>, repeat: &[bool], seed: u64) -> Vec<Incoming> {
    let mut all: Vec<Incoming> = messages.clone();
    for (message, again) in messages.into_iter().zip(repeat.iter().cycle()) {
        if *again {
            all.push(message);
        }
    }
    // Deterministic Fisher-Yates driven by a small LCG.
    let mut state = seed | 1;
    for i in (1..all.len()).rev() {
        state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        let j = (state >> 33) as usize % (i + 1);
        all.swap(i, j);
    }
    all
}

proptest! {
    #[test]
    fn reliable_delivery_exactly_once_in_order(
        payloads in payloads(),
        repeat in prop::collection::vec(any::<bool>(), 1..16),
        seed in any::<u64>(),
    ) {
        let arrivals = scramble(wire_messages(&payloads), &repeat, seed);
        let mut channel = Channel::new(1024, 1 << 20);
        let mut delivered = Vec::new();
        for incoming in arrivals {
            for packet in channel.accept(incoming).unwrap() {
                prop_assert!(packet.flags().contains(PacketFlags::RELIABLE));
                delivered.push(packet.data().to_vec());
            }
        }
        prop_assert_eq!(delivered, payloads.clone());
        prop_assert_eq!(channel.backlog_len(), 0);
        prop_assert_eq!(channel.expected_reliable_sequence(), payloads.len() as u16);
    }

    #[test]
    fn unreliable_reassembly_any_order(
        payload in prop::collection::vec(any::<u8>(), 1..5000),
        max_fragment in 16usize..600,
        seed in any::<u64>(),
    ) {
        let bytes = Bytes::from(payload.clone());
        let fragments: Vec<Incoming> = fragment(&bytes, 3, max_fragment)
            .into_iter()
            .map(Incoming::UnreliableFragment)
            .collect();
        let mut channel = Channel::new(64, 1 << 20);
        let mut delivered = Vec::new();
        for incoming in scramble(fragments, &[false], seed) {
            delivered.extend(channel.accept(incoming).unwrap());
        }
        prop_assert_eq!(delivered.len(), 1);
        prop_assert_eq!(&delivered[0].data()[..], &payload[..]);
        prop_assert_eq!(channel.last_unreliable_sequence(), Some(3));
    }

    #[test]
    fn stale_unreliable_never_delivered(sequences in prop::collection::vec(any::<u16>(), 1..64)) {
        let mut channel = Channel::new(64, 1 << 20);
        let mut last: Option<u16> = None;
        for sequence in sequences {
            let out = channel
                .accept(Incoming::Unreliable { sequence, payload: Bytes::new() })
                .unwrap();
            if let Some(previous) = last {
                let newer = sequence != previous && sequence.wrapping_sub(previous) < 0x8000;
                prop_assert_eq!(out.len(), usize::from(newer));
            } else {
                prop_assert_eq!(out.len(), 1);
            }
            if !out.is_empty() {
                last = Some(sequence);
            }
        }
    }
}
