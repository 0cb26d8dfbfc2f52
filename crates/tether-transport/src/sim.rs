//! # In-Memory Network
//!
//! A deterministic, single-threaded datagram network for tests and
//! benchmarks. Every [`MemoryTransport`] attached to a [`MemoryNetwork`]
//! gets an inbox keyed by its address; sends are filtered through a seeded
//! [`Impairment`] model before landing in the destination inbox.
//!
//! Delivery is instantaneous: time only passes when the caller advances its
//! clock, which pairs with `quanta::Clock::mock()`.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::RngExt as _;
use rand::SeedableRng;
use serde::Serialize;

use crate::address::Address;
use crate::error::TransportError;
use crate::transport::Transport;

/// Impairments applied to every datagram.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Impairment {
    /// Probability (0.0-1.0) a datagram is lost.
    pub loss: f64,
    /// Probability a delivered datagram is delivered twice.
    pub duplicate: f64,
    /// Probability a delivered datagram overtakes the one queued before it.
    pub reorder: f64,
    /// Drop every Nth datagram sent on the network.
    pub drop_every: Option<u32>,
    /// Reject datagrams larger than this, like a path MTU.
    pub max_datagram_size: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub reordered: u64,
}

type DropFilter = Box<dyn FnMut(Address, Address, &[u8]) -> bool>;

struct Inner {
    rng: StdRng,
    impairment: Impairment,
    inboxes: HashMap<Address, VecDeque<(Address, Bytes)>>,
    offline: HashSet<Address>,
    filter: Option<DropFilter>,
    sent_count: u64,
    stats: NetworkStats,
}

/// Shared handle to a simulated network. Clones refer to the same network.
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Rc<RefCell<Inner>>,
}

impl fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("MemoryNetwork")
            .field("impairment", &inner.impairment)
            .field("endpoints", &inner.inboxes.len())
            .field("stats", &inner.stats)
            .finish_non_exhaustive()
    }
}

impl MemoryNetwork {
    pub fn new(seed: u64) -> Self {
        MemoryNetwork {
            inner: Rc::new(RefCell::new(Inner {
                rng: StdRng::seed_from_u64(seed),
                impairment: Impairment::default(),
                inboxes: HashMap::new(),
                offline: HashSet::new(),
                filter: None,
                sent_count: 0,
                stats: NetworkStats::default(),
            })),
        }
    }

    /// Create an endpoint. Re-attaching an address empties its inbox.
    pub fn attach(&self, address: Address) -> MemoryTransport {
        self.inner
            .borrow_mut()
            .inboxes
            .insert(address, VecDeque::new());
        MemoryTransport {
            address,
            network: self.clone(),
        }
    }

    pub fn set_impairment(&self, impairment: Impairment) {
        self.inner.borrow_mut().impairment = impairment;
    }

    /// Cut an endpoint off. Nothing it sends or is sent arrives.
    pub fn set_offline(&self, address: Address, offline: bool) {
        let mut inner = self.inner.borrow_mut();
        if offline {
            inner.offline.insert(address);
        } else {
            inner.offline.remove(&address);
        }
    }

    /// Drop datagrams for which `filter(from, to, bytes)` returns true.
    pub fn drop_when(&self, filter: impl FnMut(Address, Address, &[u8]) -> bool + 'static) {
        self.inner.borrow_mut().filter = Some(Box::new(filter));
    }

    pub fn clear_filter(&self) {
        self.inner.borrow_mut().filter = None;
    }

    pub fn stats(&self) -> NetworkStats {
        self.inner.borrow().stats.clone()
    }

    /// Datagrams waiting in an endpoint's inbox.
    pub fn pending(&self, address: Address) -> usize {
        self.inner
            .borrow()
            .inboxes
            .get(&address)
            .map_or(0, VecDeque::len)
    }

    fn deliver(&self, from: Address, to: Address, data: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        inner.stats.sent += 1;
        inner.sent_count += 1;

        if let Some(max) = inner.impairment.max_datagram_size {
            if data.len() > max {
                inner.stats.dropped += 1;
                return Err(TransportError::DatagramTooLarge {
                    len: data.len(),
                    max,
                });
            }
        }

        let nth = inner
            .impairment
            .drop_every
            .is_some_and(|n| n > 0 && inner.sent_count % u64::from(n) == 0);
        let filtered = inner
            .filter
            .as_mut()
            .is_some_and(|filter| filter(from, to, data));
        let offline = inner.offline.contains(&from) || inner.offline.contains(&to);
        let lost = inner.rng.random::<f64>() < inner.impairment.loss;
        if nth || filtered || offline || lost {
            inner.stats.dropped += 1;
            return Ok(());
        }

        let Some(inbox) = inner.inboxes.get_mut(&to) else {
            inner.stats.dropped += 1;
            return Ok(());
        };
        let bytes = Bytes::copy_from_slice(data);
        inbox.push_back((from, bytes.clone()));
        inner.stats.delivered += 1;

        if inner.rng.random::<f64>() < inner.impairment.duplicate {
            inbox.push_back((from, bytes));
            inner.stats.duplicated += 1;
        }
        if inbox.len() >= 2 && inner.rng.random::<f64>() < inner.impairment.reorder {
            let last = inbox.len() - 1;
            inbox.swap(last - 1, last);
            inner.stats.reordered += 1;
        }
        Ok(())
    }

    fn take(&self, address: Address) -> Option<(Address, Bytes)> {
        self.inner
            .borrow_mut()
            .inboxes
            .get_mut(&address)
            .and_then(VecDeque::pop_front)
    }
}

/// One endpoint of a [`MemoryNetwork`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    address: Address,
    network: MemoryNetwork,
}

impl MemoryTransport {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

impl Transport for MemoryTransport {
    fn send_to(&mut self, address: Address, data: &[u8]) -> Result<(), TransportError> {
        self.network.deliver(self.address, address, data)
    }

    /// Never blocks: delivery is instantaneous, so waiting cannot help.
    fn recv(&mut self, _timeout: Duration) -> Result<Option<(Address, Bytes)>, TransportError> {
        Ok(self.network.take(self.address))
    }

    fn local_address(&self) -> Option<Address> {
        Some(self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(seed: u64) -> (MemoryNetwork, MemoryTransport, MemoryTransport) {
        let net = MemoryNetwork::new(seed);
        let a = net.attach(Address::localhost(1));
        let b = net.attach(Address::localhost(2));
        (net, a, b)
    }

    #[test]
    fn delivers_in_order_without_impairment() {
        let (net, mut a, mut b) = endpoints(1);
        a.send_to(b.address(), b"one").unwrap();
        a.send_to(b.address(), b"two").unwrap();
        assert_eq!(net.pending(b.address()), 2);
        let (from, first) = b.recv(Duration::ZERO).unwrap().unwrap();
        assert_eq!(from, a.address());
        assert_eq!(&first[..], b"one");
        assert_eq!(&b.recv(Duration::ZERO).unwrap().unwrap().1[..], b"two");
        assert_eq!(b.recv(Duration::ZERO).unwrap(), None);
    }

    #[test]
    fn drop_every_nth() {
        let (net, mut a, b) = endpoints(1);
        net.set_impairment(Impairment {
            drop_every: Some(3),
            ..Impairment::default()
        });
        for _ in 0..9 {
            a.send_to(b.address(), b"x").unwrap();
        }
        assert_eq!(net.pending(b.address()), 6);
        assert_eq!(net.stats().dropped, 3);
    }

    #[test]
    fn offline_endpoint_receives_nothing() {
        let (net, mut a, b) = endpoints(1);
        net.set_offline(b.address(), true);
        a.send_to(b.address(), b"x").unwrap();
        assert_eq!(net.pending(b.address()), 0);
        net.set_offline(b.address(), false);
        a.send_to(b.address(), b"x").unwrap();
        assert_eq!(net.pending(b.address()), 1);
    }

    #[test]
    fn unknown_destination_is_black_holed() {
        let (net, mut a, _b) = endpoints(1);
        a.send_to(Address::localhost(99), b"x").unwrap();
        assert_eq!(net.stats().dropped, 1);
    }

    #[test]
    fn filter_drops_matching() {
        let (net, mut a, b) = endpoints(1);
        net.drop_when(|_, _, data| data.starts_with(b"drop"));
        a.send_to(b.address(), b"drop me").unwrap();
        a.send_to(b.address(), b"keep me").unwrap();
        assert_eq!(net.pending(b.address()), 1);
    }

    #[test]
    fn oversized_datagrams_rejected() {
        let (net, mut a, b) = endpoints(1);
        net.set_impairment(Impairment {
            max_datagram_size: Some(4),
            ..Impairment::default()
        });
        assert!(a.send_to(b.address(), b"12345").is_err());
        assert!(a.send_to(b.address(), b"1234").is_ok());
    }

    #[test]
    fn same_seed_same_losses() {
        let run = |seed| {
            let (net, mut a, b) = endpoints(seed);
            net.set_impairment(Impairment {
                loss: 0.3,
                duplicate: 0.1,
                reorder: 0.2,
                ..Impairment::default()
            });
            for i in 0..200u8 {
                a.send_to(b.address(), &[i]).unwrap();
            }
            net.stats()
        };
        assert_eq!(run(7), run(7));
        assert!(run(7).dropped > 0);
    }

    #[test]
    fn stats_serialize() {
        let (net, mut a, b) = endpoints(1);
        a.send_to(b.address(), b"x").unwrap();
        let json = serde_json::to_value(net.stats()).unwrap();
        assert_eq!(json["delivered"], 1);
    }
}
