//! # Tether Wire Format
//!
//! Every datagram carries exactly one message behind a fixed 5-byte header.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=1|   Kind    |            Sent Time (32-bit, ms)             ~
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ~               |        Kind-specific fields ...               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Data-bearing kinds end with a 16-bit payload length and the payload.
//! All integers are big-endian. The codec never fragments: payloads larger
//! than [`MAX_PAYLOAD_LEN`] must be split by the channel before encoding.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::MalformedMessage;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Protocol version carried in the top two bits of the tag byte.
pub const PROTOCOL_VERSION: u8 = 1;

/// Tag byte + 32-bit sent time.
pub const HEADER_SIZE: usize = 5;

/// Channel id used by acknowledgements of connection-control messages.
pub const CONTROL_CHANNEL: u8 = 0xFF;

/// Data channels are numbered `0..MAX_CHANNEL_COUNT`; the control channel sits above them.
pub const MAX_CHANNEL_COUNT: usize = 255;

/// Largest payload a single message can carry.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Fixed bytes in a fragment message before its payload.
pub const FRAGMENT_OVERHEAD: usize = HEADER_SIZE + 1 + 2 + 2 + 2 + 4 + 2;

// ─── Message Kind ────────────────────────────────────────────────────────────

/// Type tag of a message (low six bits of the first byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Connect = 0x01,
    ConnectAck = 0x02,
    Disconnect = 0x03,
    DisconnectAck = 0x04,
    Ping = 0x05,
    ReliableData = 0x06,
    UnreliableData = 0x07,
    Unsequenced = 0x08,
    FragmentedData = 0x09,
    UnreliableFragment = 0x0A,
    Acknowledge = 0x0B,
}

impl MessageKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(MessageKind::Connect),
            0x02 => Some(MessageKind::ConnectAck),
            0x03 => Some(MessageKind::Disconnect),
            0x04 => Some(MessageKind::DisconnectAck),
            0x05 => Some(MessageKind::Ping),
            0x06 => Some(MessageKind::ReliableData),
            0x07 => Some(MessageKind::UnreliableData),
            0x08 => Some(MessageKind::Unsequenced),
            0x09 => Some(MessageKind::FragmentedData),
            0x0A => Some(MessageKind::UnreliableFragment),
            0x0B => Some(MessageKind::Acknowledge),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Connect => "Connect",
            MessageKind::ConnectAck => "ConnectAck",
            MessageKind::Disconnect => "Disconnect",
            MessageKind::DisconnectAck => "DisconnectAck",
            MessageKind::Ping => "Ping",
            MessageKind::ReliableData => "ReliableData",
            MessageKind::UnreliableData => "UnreliableData",
            MessageKind::Unsequenced => "Unsequenced",
            MessageKind::FragmentedData => "FragmentedData",
            MessageKind::UnreliableFragment => "UnreliableFragment",
            MessageKind::Acknowledge => "Acknowledge",
        }
    }
}

// ─── Ack Key ─────────────────────────────────────────────────────────────────

/// Identifies one reliable send for acknowledgement purposes.
///
/// Fragments of one message share a sequence number, so the fragment index
/// is part of the key. Unfragmented messages use index 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AckKey {
    pub channel: u8,
    pub sequence: u16,
    pub fragment_index: u16,
}

// ─── Fragment ────────────────────────────────────────────────────────────────

/// One piece of an oversized payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Sequence number shared by every fragment of the message.
    pub sequence: u16,
    pub index: u16,
    pub count: u16,
    /// Length of the reassembled payload.
    pub total_length: u32,
    pub payload: Bytes,
}

impl Fragment {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.sequence);
        buf.put_u16(self.index);
        buf.put_u16(self.count);
        buf.put_u32(self.total_length);
        put_payload(buf, &self.payload);
    }

    fn decode(buf: &mut impl Buf, kind: MessageKind) -> Result<Self, MalformedMessage> {
        need(buf, kind, 10)?;
        let sequence = buf.get_u16();
        let index = buf.get_u16();
        let count = buf.get_u16();
        let total_length = buf.get_u32();
        if index >= count {
            return Err(MalformedMessage::FragmentIndex { index, count });
        }
        let payload = get_payload(buf, kind)?;
        Ok(Fragment {
            sequence,
            index,
            count,
            total_length,
            payload,
        })
    }
}

// ─── Message ─────────────────────────────────────────────────────────────────

/// A typed protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Connection request. Reliable on the control channel.
    Connect {
        sequence: u16,
        connect_id: u32,
        channel_count: u8,
        incoming_bandwidth: u32,
        outgoing_bandwidth: u32,
        /// Application word delivered with the acceptor's Connect event.
        data: u32,
    },
    /// Acceptance of a connection request. Reliable on the control channel.
    ConnectAck {
        sequence: u16,
        connect_id: u32,
        channel_count: u8,
        incoming_bandwidth: u32,
        outgoing_bandwidth: u32,
    },
    Disconnect {
        data: u32,
    },
    DisconnectAck,
    /// Keepalive. Reliable on the control channel so it yields RTT samples.
    Ping {
        sequence: u16,
    },
    ReliableData {
        channel: u8,
        sequence: u16,
        payload: Bytes,
    },
    UnreliableData {
        channel: u8,
        sequence: u16,
        payload: Bytes,
    },
    Unsequenced {
        channel: u8,
        payload: Bytes,
    },
    /// Reliable fragment.
    FragmentedData {
        channel: u8,
        fragment: Fragment,
    },
    UnreliableFragment {
        channel: u8,
        fragment: Fragment,
    },
    Acknowledge {
        channel: u8,
        sequence: u16,
        fragment_index: u16,
        /// Sent time of the datagram being acknowledged, echoed for RTT.
        received_sent_time: u32,
    },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Connect { .. } => MessageKind::Connect,
            Message::ConnectAck { .. } => MessageKind::ConnectAck,
            Message::Disconnect { .. } => MessageKind::Disconnect,
            Message::DisconnectAck => MessageKind::DisconnectAck,
            Message::Ping { .. } => MessageKind::Ping,
            Message::ReliableData { .. } => MessageKind::ReliableData,
            Message::UnreliableData { .. } => MessageKind::UnreliableData,
            Message::Unsequenced { .. } => MessageKind::Unsequenced,
            Message::FragmentedData { .. } => MessageKind::FragmentedData,
            Message::UnreliableFragment { .. } => MessageKind::UnreliableFragment,
            Message::Acknowledge { .. } => MessageKind::Acknowledge,
        }
    }

    /// Key under which this message must be acknowledged, if it is reliable.
    pub fn ack_key(&self) -> Option<AckKey> {
        let (channel, sequence, fragment_index) = match self {
            Message::Connect { sequence, .. }
            | Message::ConnectAck { sequence, .. }
            | Message::Ping { sequence } => (CONTROL_CHANNEL, *sequence, 0),
            Message::ReliableData {
                channel, sequence, ..
            } => (*channel, *sequence, 0),
            Message::FragmentedData { channel, fragment } => {
                (*channel, fragment.sequence, fragment.index)
            }
            _ => return None,
        };
        Some(AckKey {
            channel,
            sequence,
            fragment_index,
        })
    }

    /// Application payload length, for messages that carry application data.
    pub fn payload_len(&self) -> Option<usize> {
        match self {
            Message::ReliableData { payload, .. }
            | Message::UnreliableData { payload, .. }
            | Message::Unsequenced { payload, .. } => Some(payload.len()),
            Message::FragmentedData { fragment, .. }
            | Message::UnreliableFragment { fragment, .. } => Some(fragment.payload.len()),
            _ => None,
        }
    }

    /// Encoded size of the message body, excluding the datagram header.
    pub fn body_len(&self) -> usize {
        match self {
            Message::Connect { .. } => 2 + 4 + 1 + 4 + 4 + 4,
            Message::ConnectAck { .. } => 2 + 4 + 1 + 4 + 4,
            Message::Disconnect { .. } => 4,
            Message::DisconnectAck => 0,
            Message::Ping { .. } => 2,
            Message::ReliableData { payload, .. } | Message::UnreliableData { payload, .. } => {
                1 + 2 + 2 + payload.len()
            }
            Message::Unsequenced { payload, .. } => 1 + 2 + payload.len(),
            Message::FragmentedData { fragment, .. }
            | Message::UnreliableFragment { fragment, .. } => {
                FRAGMENT_OVERHEAD - HEADER_SIZE + fragment.payload.len()
            }
            Message::Acknowledge { .. } => 1 + 2 + 2 + 4,
        }
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        match self {
            Message::Connect {
                sequence,
                connect_id,
                channel_count,
                incoming_bandwidth,
                outgoing_bandwidth,
                data,
            } => {
                buf.put_u16(*sequence);
                buf.put_u32(*connect_id);
                buf.put_u8(*channel_count);
                buf.put_u32(*incoming_bandwidth);
                buf.put_u32(*outgoing_bandwidth);
                buf.put_u32(*data);
            }
            Message::ConnectAck {
                sequence,
                connect_id,
                channel_count,
                incoming_bandwidth,
                outgoing_bandwidth,
            } => {
                buf.put_u16(*sequence);
                buf.put_u32(*connect_id);
                buf.put_u8(*channel_count);
                buf.put_u32(*incoming_bandwidth);
                buf.put_u32(*outgoing_bandwidth);
            }
            Message::Disconnect { data } => buf.put_u32(*data),
            Message::DisconnectAck => {}
            Message::Ping { sequence } => buf.put_u16(*sequence),
            Message::ReliableData {
                channel,
                sequence,
                payload,
            }
            | Message::UnreliableData {
                channel,
                sequence,
                payload,
            } => {
                buf.put_u8(*channel);
                buf.put_u16(*sequence);
                put_payload(buf, payload);
            }
            Message::Unsequenced { channel, payload } => {
                buf.put_u8(*channel);
                put_payload(buf, payload);
            }
            Message::FragmentedData { channel, fragment }
            | Message::UnreliableFragment { channel, fragment } => {
                buf.put_u8(*channel);
                fragment.encode(buf);
            }
            Message::Acknowledge {
                channel,
                sequence,
                fragment_index,
                received_sent_time,
            } => {
                buf.put_u8(*channel);
                buf.put_u16(*sequence);
                buf.put_u16(*fragment_index);
                buf.put_u32(*received_sent_time);
            }
        }
    }

    fn decode_body(kind: MessageKind, buf: &mut impl Buf) -> Result<Self, MalformedMessage> {
        let message = match kind {
            MessageKind::Connect => {
                need(buf, kind, 19)?;
                Message::Connect {
                    sequence: buf.get_u16(),
                    connect_id: buf.get_u32(),
                    channel_count: buf.get_u8(),
                    incoming_bandwidth: buf.get_u32(),
                    outgoing_bandwidth: buf.get_u32(),
                    data: buf.get_u32(),
                }
            }
            MessageKind::ConnectAck => {
                need(buf, kind, 15)?;
                Message::ConnectAck {
                    sequence: buf.get_u16(),
                    connect_id: buf.get_u32(),
                    channel_count: buf.get_u8(),
                    incoming_bandwidth: buf.get_u32(),
                    outgoing_bandwidth: buf.get_u32(),
                }
            }
            MessageKind::Disconnect => {
                need(buf, kind, 4)?;
                Message::Disconnect {
                    data: buf.get_u32(),
                }
            }
            MessageKind::DisconnectAck => Message::DisconnectAck,
            MessageKind::Ping => {
                need(buf, kind, 2)?;
                Message::Ping {
                    sequence: buf.get_u16(),
                }
            }
            MessageKind::ReliableData | MessageKind::UnreliableData => {
                need(buf, kind, 3)?;
                let channel = buf.get_u8();
                let sequence = buf.get_u16();
                let payload = get_payload(buf, kind)?;
                if kind == MessageKind::ReliableData {
                    Message::ReliableData {
                        channel,
                        sequence,
                        payload,
                    }
                } else {
                    Message::UnreliableData {
                        channel,
                        sequence,
                        payload,
                    }
                }
            }
            MessageKind::Unsequenced => {
                need(buf, kind, 1)?;
                let channel = buf.get_u8();
                let payload = get_payload(buf, kind)?;
                Message::Unsequenced { channel, payload }
            }
            MessageKind::FragmentedData | MessageKind::UnreliableFragment => {
                need(buf, kind, 1)?;
                let channel = buf.get_u8();
                let fragment = Fragment::decode(buf, kind)?;
                if kind == MessageKind::FragmentedData {
                    Message::FragmentedData { channel, fragment }
                } else {
                    Message::UnreliableFragment { channel, fragment }
                }
            }
            MessageKind::Acknowledge => {
                need(buf, kind, 9)?;
                Message::Acknowledge {
                    channel: buf.get_u8(),
                    sequence: buf.get_u16(),
                    fragment_index: buf.get_u16(),
                    received_sent_time: buf.get_u32(),
                }
            }
        };
        Ok(message)
    }
}

// ─── Datagram ────────────────────────────────────────────────────────────────

/// A message together with the sender's millisecond timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub sent_time: u32,
    pub message: Message,
}

impl Datagram {
    pub fn new(sent_time: u32, message: Message) -> Self {
        Datagram { sent_time, message }
    }

    /// Serialize into a new `BytesMut`.
    pub fn encode(&self) -> BytesMut {
        Self::encode_message(self.sent_time, &self.message)
    }

    /// Serialize a borrowed message without building a `Datagram`.
    pub fn encode_message(sent_time: u32, message: &Message) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + message.body_len());
        buf.put_u8((PROTOCOL_VERSION << 6) | message.kind() as u8);
        buf.put_u32(sent_time);
        message.encode_body(&mut buf);
        buf
    }

    /// Decode a complete datagram. The buffer must hold exactly one message.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, MalformedMessage> {
        if !buf.has_remaining() {
            return Err(MalformedMessage::Empty);
        }
        let tag = buf.get_u8();
        let version = tag >> 6;
        if version != PROTOCOL_VERSION {
            return Err(MalformedMessage::UnsupportedVersion(version));
        }
        let kind = MessageKind::from_byte(tag & 0x3F)
            .ok_or(MalformedMessage::UnknownKind(tag & 0x3F))?;
        need(buf, kind, 4)?;
        let sent_time = buf.get_u32();
        let message = Message::decode_body(kind, buf)?;
        if buf.has_remaining() {
            return Err(MalformedMessage::TrailingBytes(buf.remaining()));
        }
        Ok(Datagram { sent_time, message })
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.message.body_len()
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn need(buf: &impl Buf, kind: MessageKind, needed: usize) -> Result<(), MalformedMessage> {
    if buf.remaining() < needed {
        return Err(MalformedMessage::Truncated {
            kind: kind.name(),
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

fn put_payload(buf: &mut BytesMut, payload: &Bytes) {
    debug_assert!(payload.len() <= MAX_PAYLOAD_LEN, "payload must be fragmented first");
    buf.put_u16(payload.len() as u16);
    buf.extend_from_slice(payload);
}

fn get_payload(buf: &mut impl Buf, kind: MessageKind) -> Result<Bytes, MalformedMessage> {
    need(buf, kind, 2)?;
    let len = buf.get_u16() as usize;
    need(buf, kind, len)?;
    Ok(buf.copy_to_bytes(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roundtrip(message: Message) -> Message {
        let datagram = Datagram::new(123_456, message);
        let encoded = datagram.encode();
        assert_eq!(encoded.len(), datagram.encoded_len());
        let decoded = Datagram::decode(&mut encoded.freeze()).unwrap();
        assert_eq!(decoded.sent_time, 123_456);
        decoded.message
    }

    // ─── proptest: every kind survives encode/decode ──────────────────────

    fn fragment_strategy() -> impl Strategy<Value = Fragment> {
        (1u16..=64, any::<u16>(), any::<u32>(), prop::collection::vec(any::<u8>(), 0..256))
            .prop_flat_map(|(count, sequence, total_length, payload)| {
                (0..count).prop_map(move |index| Fragment {
                    sequence,
                    index,
                    count,
                    total_length,
                    payload: Bytes::from(payload.clone()),
                })
            })
    }

    fn control_strategy() -> impl Strategy<Value = Message> {
        prop_oneof![
            (any::<u16>(), any::<u32>(), any::<u8>(), any::<u32>(), any::<u32>(), any::<u32>())
                .prop_map(|(sequence, connect_id, channel_count, i, o, data)| Message::Connect {
                    sequence,
                    connect_id,
                    channel_count,
                    incoming_bandwidth: i,
                    outgoing_bandwidth: o,
                    data,
                }),
            (any::<u16>(), any::<u32>(), any::<u8>(), any::<u32>(), any::<u32>()).prop_map(
                |(sequence, connect_id, channel_count, i, o)| Message::ConnectAck {
                    sequence,
                    connect_id,
                    channel_count,
                    incoming_bandwidth: i,
                    outgoing_bandwidth: o,
                }
            ),
            any::<u32>().prop_map(|data| Message::Disconnect { data }),
            Just(Message::DisconnectAck),
            any::<u16>().prop_map(|sequence| Message::Ping { sequence }),
            (any::<u8>(), any::<u16>(), any::<u16>(), any::<u32>()).prop_map(
                |(channel, sequence, fragment_index, received_sent_time)| Message::Acknowledge {
                    channel,
                    sequence,
                    fragment_index,
                    received_sent_time,
                }
            ),
        ]
    }

    fn data_strategy() -> impl Strategy<Value = Message> {
        let payload = prop::collection::vec(any::<u8>(), 0..512).prop_map(Bytes::from);
        prop_oneof![
            (any::<u8>(), any::<u16>(), payload.clone()).prop_map(|(channel, sequence, payload)| {
                Message::ReliableData {
                    channel,
                    sequence,
                    payload,
                }
            }),
            (any::<u8>(), any::<u16>(), payload.clone()).prop_map(|(channel, sequence, payload)| {
                Message::UnreliableData {
                    channel,
                    sequence,
                    payload,
                }
            }),
            (any::<u8>(), payload)
                .prop_map(|(channel, payload)| Message::Unsequenced { channel, payload }),
            (any::<u8>(), fragment_strategy())
                .prop_map(|(channel, fragment)| Message::FragmentedData { channel, fragment }),
            (any::<u8>(), fragment_strategy())
                .prop_map(|(channel, fragment)| Message::UnreliableFragment { channel, fragment }),
        ]
    }

    fn message_strategy() -> impl Strategy<Value = Message> {
        prop_oneof![control_strategy(), data_strategy()]
    }

    proptest! {
        #[test]
        fn proptest_message_roundtrip(message in message_strategy()) {
            let decoded = roundtrip(message.clone());
            prop_assert_eq!(decoded, message);
        }

        #[test]
        fn proptest_truncation_never_panics(message in message_strategy(), cut in 0usize..64) {
            let encoded = Datagram::new(1, message).encode();
            let keep = encoded.len().saturating_sub(cut + 1);
            let mut truncated = encoded.freeze().slice(..keep);
            prop_assert!(Datagram::decode(&mut truncated).is_err());
        }
    }

    // ─── Fixed cases ──────────────────────────────────────────────────────

    #[test]
    fn header_layout() {
        let encoded = Datagram::new(0x0102_0304, Message::DisconnectAck).encode();
        assert_eq!(&encoded[..], &[0x44, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn reliable_data_roundtrip() {
        let message = Message::ReliableData {
            channel: 3,
            sequence: 65_535,
            payload: Bytes::from_static(b"hello tether"),
        };
        assert_eq!(roundtrip(message.clone()), message);
    }

    #[test]
    fn empty_buffer_rejected() {
        let mut buf = Bytes::new();
        assert_eq!(Datagram::decode(&mut buf), Err(MalformedMessage::Empty));
    }

    #[test]
    fn unknown_kind_rejected() {
        let mut buf = Bytes::from_static(&[0x40 | 0x3F, 0, 0, 0, 0]);
        assert_eq!(
            Datagram::decode(&mut buf),
            Err(MalformedMessage::UnknownKind(0x3F))
        );
    }

    #[test]
    fn wrong_version_rejected() {
        let mut buf = Bytes::from_static(&[0x80 | 0x04, 0, 0, 0, 0]);
        assert_eq!(
            Datagram::decode(&mut buf),
            Err(MalformedMessage::UnsupportedVersion(2))
        );
    }

    #[test]
    fn declared_length_beyond_buffer_rejected() {
        let mut encoded = Datagram::new(
            7,
            Message::Unsequenced {
                channel: 0,
                payload: Bytes::from_static(b"abcd"),
            },
        )
        .encode();
        // Claim 200 payload bytes while only 4 follow.
        encoded[6] = 0;
        encoded[7] = 200;
        let err = Datagram::decode(&mut encoded.freeze()).unwrap_err();
        assert!(matches!(
            err,
            MalformedMessage::Truncated {
                kind: "Unsequenced",
                needed: 200,
                remaining: 4
            }
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut encoded = Datagram::new(0, Message::Ping { sequence: 9 }).encode();
        encoded.put_u8(0xEE);
        assert_eq!(
            Datagram::decode(&mut encoded.freeze()),
            Err(MalformedMessage::TrailingBytes(1))
        );
    }

    #[test]
    fn fragment_index_must_be_below_count() {
        let message = Message::FragmentedData {
            channel: 0,
            fragment: Fragment {
                sequence: 1,
                index: 4,
                count: 4,
                total_length: 10,
                payload: Bytes::from_static(b"x"),
            },
        };
        let encoded = Datagram::new(0, message).encode();
        assert_eq!(
            Datagram::decode(&mut encoded.freeze()),
            Err(MalformedMessage::FragmentIndex { index: 4, count: 4 })
        );
    }

    #[test]
    fn ack_keys() {
        let ping = Message::Ping { sequence: 5 };
        assert_eq!(
            ping.ack_key(),
            Some(AckKey {
                channel: CONTROL_CHANNEL,
                sequence: 5,
                fragment_index: 0
            })
        );
        let frag = Message::FragmentedData {
            channel: 2,
            fragment: Fragment {
                sequence: 9,
                index: 3,
                count: 4,
                total_length: 2000,
                payload: Bytes::new(),
            },
        };
        assert_eq!(
            frag.ack_key(),
            Some(AckKey {
                channel: 2,
                sequence: 9,
                fragment_index: 3
            })
        );
        assert_eq!(Message::Disconnect { data: 0 }.ack_key(), None);
        assert_eq!(
            Message::UnreliableData {
                channel: 0,
                sequence: 1,
                payload: Bytes::new()
            }
            .ack_key(),
            None
        );
    }

    #[test]
    fn payload_len_only_for_application_data() {
        assert_eq!(Message::Ping { sequence: 0 }.payload_len(), None);
        assert_eq!(
            Message::Unsequenced {
                channel: 0,
                payload: Bytes::from_static(b"abc")
            }
            .payload_len(),
            Some(3)
        );
    }

    #[test]
    fn kind_from_byte_roundtrip() {
        for b in 0x01..=0x0B {
            let kind = MessageKind::from_byte(b).unwrap();
            assert_eq!(kind as u8, b);
        }
        assert!(MessageKind::from_byte(0).is_none());
        assert!(MessageKind::from_byte(0x0C).is_none());
    }
}
