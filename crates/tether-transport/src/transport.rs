//! # Datagram Transport
//!
//! The [`Transport`] trait is the host's only view of the network: an
//! unreliable, address-keyed datagram send/receive primitive. Two
//! implementations ship with the crate: [`UdpTransport`] over a blocking
//! `std::net::UdpSocket`, and [`MemoryTransport`](crate::sim::MemoryTransport)
//! for deterministic tests.

use std::io;
use std::net::UdpSocket;
use std::time::Duration;

use bytes::Bytes;

use crate::address::Address;
use crate::error::TransportError;

/// Largest UDP payload.
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

pub trait Transport {
    /// Send one datagram. Failure abandons this datagram only.
    fn send_to(&mut self, address: Address, data: &[u8]) -> Result<(), TransportError>;

    /// Wait up to `timeout` for one datagram. A zero timeout polls without
    /// blocking. `Ok(None)` means nothing arrived.
    fn recv(&mut self, timeout: Duration) -> Result<Option<(Address, Bytes)>, TransportError>;

    /// Bound address, if the transport has one.
    fn local_address(&self) -> Option<Address>;
}

// ─── UDP ─────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    buf: Vec<u8>,
    nonblocking: bool,
    read_timeout: Option<Duration>,
}

impl UdpTransport {
    pub fn bind(address: Address) -> io::Result<Self> {
        Self::from_socket(UdpSocket::bind(address.socket_addr())?)
    }

    /// Wrap an already-bound socket.
    pub fn from_socket(socket: UdpSocket) -> io::Result<Self> {
        socket.set_nonblocking(false)?;
        socket.set_read_timeout(None)?;
        Ok(UdpTransport {
            socket,
            buf: vec![0u8; MAX_DATAGRAM_SIZE],
            nonblocking: false,
            read_timeout: None,
        })
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }

    fn prepare_wait(&mut self, timeout: Duration) -> io::Result<()> {
        if timeout.is_zero() {
            if !self.nonblocking {
                self.socket.set_nonblocking(true)?;
                self.nonblocking = true;
            }
            return Ok(());
        }
        if self.nonblocking {
            self.socket.set_nonblocking(false)?;
            self.nonblocking = false;
        }
        if self.read_timeout != Some(timeout) {
            self.socket.set_read_timeout(Some(timeout))?;
            self.read_timeout = Some(timeout);
        }
        Ok(())
    }
}

impl Transport for UdpTransport {
    fn send_to(&mut self, address: Address, data: &[u8]) -> Result<(), TransportError> {
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::DatagramTooLarge {
                len: data.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        match self.socket.send_to(data, address.socket_addr()) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                tracing::trace!(peer = %address, "socket buffer full, datagram dropped");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<(Address, Bytes)>, TransportError> {
        self.prepare_wait(timeout)?;
        match self.socket.recv_from(&mut self.buf) {
            Ok((len, from)) => Ok(Some((
                Address::from(from),
                Bytes::copy_from_slice(&self.buf[..len]),
            ))),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            // ICMP port unreachable from an earlier send surfaces here on some
            // platforms.
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                tracing::debug!(error = %e, "ignoring connection reset");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn local_address(&self) -> Option<Address> {
        self.socket.local_addr().ok().map(Address::from)
    }
}
