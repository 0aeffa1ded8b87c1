use std::fmt::Debug;
use std::io;
use std::net::{SocketAddr, UdpSocket};

use crate::NETCREATE_FLAG_RANDOMPORT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetType {
    Ipv4,
    Ipv6,
}

impl NetType {
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => NetType::Ipv4,
            SocketAddr::V6(_) => NetType::Ipv6,
        }
    }
}

/// Unreliable datagram source for [`NetServer`](crate::NetServer) and [`NetClient`](crate::NetClient).
pub trait DatagramSocket: Debug {
    /// Gets the local address of the socket.
    fn addr(&self) -> io::Result<SocketAddr>;

    fn net_type(&self) -> NetType;

    /// Tries to receive the next datagram.
    ///
    /// Returns `Ok(None)` when nothing is pending, otherwise the number of bytes written to
    /// the buffer and the source address.
    fn try_recv(&mut self, buffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    /// Sends a datagram to the designated address.
    fn send(&mut self, addr: SocketAddr, packet: &[u8]) -> io::Result<()>;
}

/// Implementation of [`DatagramSocket`] for `UdpSockets`.
#[derive(Debug)]
pub struct NativeSocket {
    socket: UdpSocket,
    net_type: NetType,
}

impl NativeSocket {
    /// Makes a new native socket out of a bound `UdpSocket`.
    pub fn new(socket: UdpSocket) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        let net_type = NetType::of(&socket.local_addr()?);
        Ok(Self { socket, net_type })
    }

    /// Binds to `addr`, or to a random port of the same ip with [`NETCREATE_FLAG_RANDOMPORT`].
    pub fn bind(mut addr: SocketAddr, flags: u32) -> io::Result<Self> {
        if flags & NETCREATE_FLAG_RANDOMPORT != 0 {
            addr.set_port(0);
        }
        Self::new(UdpSocket::bind(addr)?)
    }
}

impl DatagramSocket for NativeSocket {
    fn addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn net_type(&self) -> NetType {
        self.net_type
    }

    fn try_recv(&mut self, buffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        loop {
            match self.socket.recv_from(buffer) {
                Ok(received) => return Ok(Some(received)),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(None),
                // Windows reports ICMP port unreachable on the next receive
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn send(&mut self, addr: SocketAddr, packet: &[u8]) -> io::Result<()> {
        self.socket.send_to(packet, addr)?;
        Ok(())
    }
}
