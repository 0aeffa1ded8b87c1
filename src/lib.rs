//! Chunknet is a connection based client/server transport for multiplayer games running over
//! UDP. Payloads are sent as small *chunks*; chunks marked as vital are sequenced, acknowledged
//! and resent until the peer confirms them.
//!
//! Has the following features:
//! - Token handshake that forces a round-trip before any slot is claimed
//! - Reliable ordered delivery for vital chunks with a fixed resend window
//! - Static huffman compression of packet payloads
//! - Line based console protocol for administration over TCP
//!
//! and protects the game server from the following attacks:
//! - Spoofed source addresses claiming slots
//! - Reflection amplification through token requests
//!
//! Everything is poll driven: the owner calls `recv` until it returns `None`, processes the
//! chunks, then calls `update` to advance time, resend and flush.
mod ban;
mod client;
mod config;
mod connection;
mod connection_stats;
mod console;
mod console_server;
mod error;
mod huffman;
mod packet;
mod resend_buffer;
mod sequence;
mod server;
mod token;
mod unpacker;

pub mod transport;

pub use ban::{BanInfo, BanType, NetBan};
pub use client::{ClientState, NetClient};
pub use config::{ConnectionConfig, ConsoleConfig, ServerConfig};
pub use connection::{Connection, ConnectionState};
pub use connection_stats::ConnectionStats;
pub use console::{ConsoleConnection, ConsoleState};
pub use console_server::NetConsole;
pub use error::{FormatError, NetError};
pub use huffman::Huffman;
pub use packet::{
    ChunkHeader, ControlMessage, PacketConstruct, CHUNKFLAG_RESEND, CHUNKFLAG_VITAL, PACKETFLAG_COMPRESSION, PACKETFLAG_CONNLESS,
    PACKETFLAG_CONTROL, PACKETFLAG_RESEND,
};
pub use resend_buffer::{ResendBuffer, ResendEntry};
pub use sequence::is_seq_in_backroom;
pub use server::{DelClientCallback, NetServer, NewClientCallback};
pub use token::TokenManager;

pub use bytes::Bytes;

use std::net::SocketAddr;

/// The maximum number of bytes a datagram can contain.
pub const NET_MAX_PACKETSIZE: usize = 1400;
/// The maximum number of bytes available for chunks inside one packet.
pub const NET_MAX_PAYLOAD: usize = NET_MAX_PACKETSIZE - 6;
/// The maximum number of bytes a single chunk can carry.
pub const NET_MAX_CHUNKSIZE: usize = 1024;
pub const NET_MAX_CHUNKHEADERSIZE: usize = 3;
pub const NET_PACKETHEADERSIZE: usize = 11;
pub const NET_PACKETHEADERSIZE_CONNLESS: usize = NET_PACKETHEADERSIZE + 4;
pub const NET_PACKETHEADERSIZE_LEGACY: usize = 3;
pub const NET_PACKETHEADERSIZE_LEGACY_CONNLESS: usize = NET_PACKETHEADERSIZE_LEGACY + 3;

pub const NET_MAX_CLIENTS: usize = 16;
pub const NET_MAX_CONSOLE_CLIENTS: usize = 4;

pub const NET_MAX_SEQUENCE: u16 = 1 << 10;
pub const NET_SEQUENCE_MASK: u16 = NET_MAX_SEQUENCE - 1;

/// Token value meaning "no token", only legal before the handshake completed.
pub const NET_TOKEN_NONE: u32 = 0xFFFF_FFFF;
/// Minimum control payload of a token request, larger than the reply to prevent amplification.
pub const NET_TOKENREQUEST_DATASIZE: usize = 512;

/// Capacity in chunk bytes of the resend buffer of each connection.
pub const NET_CONN_BUFFERSIZE: usize = 1024 * 32;

pub const NET_PACKETVERSION_LEGACY: u8 = 0;
pub const NET_PACKETVERSION: u8 = 1;

/// Chunk must be delivered reliably and in order.
pub const SENDFLAG_VITAL: u8 = 1;
/// Chunk is sent outside of any connection.
pub const SENDFLAG_CONNLESS: u8 = 2;
/// Flush the connection right after queueing the chunk.
pub const SENDFLAG_FLUSH: u8 = 4;

/// Bind to a random port instead of the requested one.
pub const NETCREATE_FLAG_RANDOMPORT: u32 = 1;

/// Identifier of a connection slot in a server.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Ord, PartialOrd)]
pub struct ClientId(usize);

impl ClientId {
    /// Creates a [`ClientId`] from a raw slot index.
    pub const fn from_raw(value: usize) -> Self {
        Self(value)
    }

    /// Returns the raw slot index of the [`ClientId`]
    pub fn raw(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A piece of data delivered to or sent by the game layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// `None` for connectionless chunks. On the client the server is always `ClientId(0)`.
    pub client_id: Option<ClientId>,
    /// Peer address, the destination for outgoing connectionless chunks.
    pub addr: SocketAddr,
    /// Token the peer asked to be answered with, only meaningful for connectionless chunks.
    pub response_token: u32,
    /// Combination of the `SENDFLAG_*` values.
    pub flags: u8,
    pub data: Bytes,
}

impl Chunk {
    /// Creates a chunk addressed to a connected client.
    pub fn new(client_id: ClientId, addr: SocketAddr, flags: u8, data: impl Into<Bytes>) -> Self {
        Self {
            client_id: Some(client_id),
            addr,
            response_token: NET_TOKEN_NONE,
            flags,
            data: data.into(),
        }
    }

    /// Creates a connectionless chunk.
    pub fn connless(addr: SocketAddr, response_token: u32, data: impl Into<Bytes>) -> Self {
        Self {
            client_id: None,
            addr,
            response_token,
            flags: SENDFLAG_CONNLESS,
            data: data.into(),
        }
    }

    pub fn is_connless(&self) -> bool {
        self.flags & SENDFLAG_CONNLESS != 0
    }
}
