//! Raw IPv4 socket plumbing for protocol 88 (EIGRP).
//!
//! A raw-socket wrapper layered under a small buffering stream:
//! `EigrpSocket` owns the fd, `EigrpTransport` owns the recv buffer and
//! packet decode. Built on `socket2` rather than `nix`: `nix`'s raw-socket
//! protocol enum has no variant for IP protocol 88, and `socket2` exposes
//! `IP_ADD_MEMBERSHIP` and the ToS byte directly as methods on `Socket`.

use std::net::Ipv4Addr;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::{Error, Result};
use crate::wire::Packet;

pub const EIGRP_PROTOCOL_NUMBER: i32 = 88;
pub const EIGRP_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 10);
/// DSCP CS6 (`0b110000 << 2`), the conventional internetwork-control ToS
/// byte EIGRP marks its own packets with.
const TOS_INTERNETWORK_CONTROL: u32 = 0xC0;
const DEFAULT_TTL: u32 = 2;

/// A raw IPv4 socket bound to one interface's local address, joined to the
/// EIGRP multicast group.
pub struct EigrpSocket {
    inner: Socket,
}

impl EigrpSocket {
    pub fn bind(local_addr: Ipv4Addr) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::from(EIGRP_PROTOCOL_NUMBER)))
            .map_err(Error::ErrSocket)?;
        socket.set_ttl(DEFAULT_TTL).map_err(Error::ErrSocket)?;
        socket.set_tos(TOS_INTERNETWORK_CONTROL).map_err(Error::ErrSocket)?;
        socket
            .join_multicast_v4(&EIGRP_MULTICAST_GROUP, &local_addr)
            .map_err(Error::ErrMulticastJoin)?;
        let addr = SockAddr::from(std::net::SocketAddrV4::new(local_addr, 0));
        socket.bind(&addr).map_err(Error::ErrSocket)?;
        Ok(EigrpSocket { inner: socket })
    }

    /// Sends raw bytes to a unicast neighbor or the multicast group.
    pub fn send_to(&self, bytes: &[u8], dest: Ipv4Addr) -> Result<usize> {
        let addr = SockAddr::from(std::net::SocketAddrV4::new(dest, 0));
        self.inner
            .send_to(bytes, &addr)
            .map_err(Error::ErrSocket)
    }

    /// Receives one datagram, returning its payload and the sender's
    /// address. Raw IPv4 sockets deliver the IP header too; the caller is
    /// expected to have already stripped it, or this is called on a
    /// socket configured with `IP_HDRINCL` off for receive.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Ipv4Addr)> {
        let mut uninit = vec![std::mem::MaybeUninit::new(0u8); buf.len()];
        let (n, addr) = self.inner.recv_from(&mut uninit).map_err(Error::ErrSocket)?;
        for (dst, src) in buf.iter_mut().zip(uninit.iter()) {
            *dst = unsafe { src.assume_init() };
        }
        let ip = addr
            .as_socket_ipv4()
            .map(|s| *s.ip())
            .ok_or(Error::ErrCorrupt("non-IPv4 sender address"))?;
        Ok((n, ip))
    }
}

/// A buffered packet-level transport over an [`EigrpSocket`]: owns the
/// receive buffer and decodes each datagram into a [`Packet`].
pub struct EigrpTransport {
    socket: EigrpSocket,
    recv_buf: Vec<u8>,
}

impl EigrpTransport {
    pub fn new(socket: EigrpSocket) -> Self {
        EigrpTransport { socket, recv_buf: vec![0u8; 1500] }
    }

    pub fn send(&self, packet: &Packet, dest: Ipv4Addr) -> Result<()> {
        let bytes = packet.encode();
        self.socket.send_to(&bytes, dest)?;
        Ok(())
    }

    /// Receives and decodes the next packet, returning it with the
    /// sender's address and the raw bytes (the caller needs the raw bytes
    /// to verify authentication, since the digest is computed over the
    /// wire representation, not the decoded structure).
    pub fn recv(&mut self) -> Result<(Packet, Ipv4Addr, Vec<u8>)> {
        let (n, from) = self.socket.recv_from(&mut self.recv_buf)?;
        let raw = self.recv_buf[..n].to_vec();
        let packet = Packet::decode(&raw)?;
        Ok((packet, from, raw))
    }
}
