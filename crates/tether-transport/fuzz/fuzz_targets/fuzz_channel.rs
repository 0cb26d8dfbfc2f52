#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tether_transport::channel::{Channel, Incoming};
use tether_transport::wire::{Datagram, Message};

/// Feed a channel every data message that decodes out of the input, split
/// on a length prefix. The channel must never panic; errors are fine.
fuzz_target!(|data: &[u8]| {
    let mut channel = Channel::new(32, 1 << 16);
    let mut rest = data;
    while let Some((&len, tail)) = rest.split_first() {
        let len = (len as usize).min(tail.len());
        let (chunk, tail) = tail.split_at(len);
        rest = tail;

        let Ok(datagram) = Datagram::decode(&mut Bytes::copy_from_slice(chunk)) else {
            continue;
        };
        let incoming = match datagram.message {
            Message::ReliableData { sequence, payload, .. } => Incoming::Reliable { sequence, payload },
            Message::UnreliableData { sequence, payload, .. } => {
                Incoming::Unreliable { sequence, payload }
            }
            Message::Unsequenced { payload, .. } => Incoming::Unsequenced { payload },
            Message::FragmentedData { fragment, .. } => Incoming::ReliableFragment(fragment),
            Message::UnreliableFragment { fragment, .. } => Incoming::UnreliableFragment(fragment),
            _ => continue,
        };
        let _ = channel.accept(incoming);
    }
});
