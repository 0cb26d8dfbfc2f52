#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tether_transport::wire::Datagram;

// Any input that decodes must re-encode to the same bytes.
fuzz_target!(|data: &[u8]| {
    if let Ok(datagram) = Datagram::decode(&mut Bytes::copy_from_slice(data)) {
        assert_eq!(&datagram.encode()[..], data);
    }
});
