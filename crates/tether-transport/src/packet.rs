//! # Application Packets
//!
//! A [`Packet`] is an immutable payload plus [`PacketFlags`] choosing how it
//! is delivered. Cloning is cheap (`Bytes` is reference counted), which is
//! what broadcast relies on.

use std::ops::{BitOr, BitOrAssign};

use bytes::Bytes;

// ─── Flags ───────────────────────────────────────────────────────────────────

/// Delivery flags. The empty set means unreliable, sequenced delivery.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketFlags(u8);

impl PacketFlags {
    /// Acknowledged, retransmitted and delivered in order.
    pub const RELIABLE: PacketFlags = PacketFlags(1 << 0);
    /// Delivered as it arrives, with no ordering at all.
    pub const UNSEQUENCED: PacketFlags = PacketFlags(1 << 1);
    /// Oversized unreliable packets are split into unreliable fragments
    /// instead of being promoted to reliable ones.
    pub const UNRELIABLE_FRAGMENT: PacketFlags = PacketFlags(1 << 3);

    pub const fn empty() -> Self {
        PacketFlags(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits_truncate(bits: u8) -> Self {
        PacketFlags(bits & 0b1011)
    }

    pub const fn contains(self, other: PacketFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for PacketFlags {
    type Output = PacketFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        PacketFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for PacketFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// How a packet travels, derived from its flags. `RELIABLE` wins over
/// `UNSEQUENCED` when both are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Reliable,
    Unreliable,
    Unsequenced,
}

// ─── Packet ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    data: Bytes,
    flags: PacketFlags,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>, flags: PacketFlags) -> Self {
        Packet {
            data: data.into(),
            flags,
        }
    }

    pub fn reliable(data: impl Into<Bytes>) -> Self {
        Self::new(data, PacketFlags::RELIABLE)
    }

    pub fn unreliable(data: impl Into<Bytes>) -> Self {
        Self::new(data, PacketFlags::empty())
    }

    pub fn unsequenced(data: impl Into<Bytes>) -> Self {
        Self::new(data, PacketFlags::UNSEQUENCED)
    }

    /// Copy a string payload.
    pub fn from_text(text: &str, flags: PacketFlags) -> Self {
        Self::new(Bytes::copy_from_slice(text.as_bytes()), flags)
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn flags(&self) -> PacketFlags {
        self.flags
    }

    pub fn delivery(&self) -> Delivery {
        if self.flags.contains(PacketFlags::RELIABLE) {
            Delivery::Reliable
        } else if self.flags.contains(PacketFlags::UNSEQUENCED) {
            Delivery::Unsequenced
        } else {
            Delivery::Unreliable
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }
}
