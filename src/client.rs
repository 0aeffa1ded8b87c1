use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};
use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};

use crate::config::ConnectionConfig;
use crate::connection::{Connection, ConnectionState};
use crate::connection_stats::ConnectionStats;
use crate::error::NetError;
use crate::huffman::Huffman;
use crate::packet::{PacketConstruct, CHUNKFLAG_VITAL};
use crate::transport::{DatagramSocket, NativeSocket, NetType};
use crate::unpacker::RecvUnpacker;
use crate::{Chunk, ClientId, NET_MAX_PACKETSIZE, NET_MAX_PAYLOAD, NET_TOKEN_NONE, SENDFLAG_CONNLESS, SENDFLAG_FLUSH, SENDFLAG_VITAL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Offline,
    Connecting,
    Online,
}

/// Single connection to a server, driven the same way as [`NetServer`](crate::NetServer).
/// Chunks from the server are delivered with `ClientId(0)`.
#[derive(Debug)]
pub struct NetClient {
    socket: Box<dyn DatagramSocket>,
    config: ConnectionConfig,
    huffman: Arc<Huffman>,
    connection: Connection,
    unpacker: RecvUnpacker,
    rng: ChaCha20Rng,
    current_time: Duration,
    buffer: Box<[u8; NET_MAX_PACKETSIZE * 2]>,
}

impl NetClient {
    /// Binds a native UDP socket and opens the client on it.
    pub fn open(addr: SocketAddr, config: ConnectionConfig, flags: u32) -> Result<Self, NetError> {
        let socket = NativeSocket::bind(addr, flags)?;
        Ok(Self::new(Box::new(socket), config))
    }

    pub fn new(socket: Box<dyn DatagramSocket>, config: ConnectionConfig) -> Self {
        let huffman = Arc::new(Huffman::new());
        Self {
            socket,
            connection: Connection::new(config.clone(), huffman.clone()),
            config,
            huffman,
            unpacker: RecvUnpacker::new(),
            rng: ChaCha20Rng::from_entropy(),
            current_time: Duration::ZERO,
            buffer: Box::new([0; NET_MAX_PACKETSIZE * 2]),
        }
    }

    pub fn addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.socket.addr()?)
    }

    pub fn net_type(&self) -> NetType {
        self.socket.net_type()
    }

    pub fn state(&self) -> ClientState {
        match self.connection.state() {
            ConnectionState::Online => ClientState::Online,
            ConnectionState::Offline | ConnectionState::Error => ClientState::Offline,
            _ => ClientState::Connecting,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Online
    }

    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.connection.peer_addr()
    }

    pub fn error_string(&self) -> &str {
        self.connection.error_string()
    }

    pub fn reset_error_string(&mut self) {
        self.connection.reset_error_string();
    }

    pub fn stats(&self) -> &ConnectionStats {
        self.connection.stats()
    }

    pub fn current_time(&self) -> Duration {
        self.current_time
    }

    /// Returns true if nothing was heard from the server for a while, even though the connection
    /// is still alive.
    pub fn got_problems(&self) -> bool {
        self.connection.state() != ConnectionState::Offline
            && self.current_time.saturating_sub(self.connection.last_recv_time()) > self.config.got_problems_threshold
    }

    fn send_connection_packets(&mut self) {
        for (addr, buffer) in self.connection.packets_to_send() {
            if let Err(e) = self.socket.send(addr, &buffer) {
                error!("Failed to send packet to {}: {}", addr, e);
            }
        }
    }

    /// Starts connecting to the server at `addr`.
    pub fn connect(&mut self, addr: SocketAddr) {
        let mut token = self.rng.next_u32();
        if token == NET_TOKEN_NONE {
            token -= 1;
        }

        self.unpacker.clear();
        self.connection.connect(addr, token, self.current_time);
        self.send_connection_packets();
    }

    pub fn disconnect(&mut self, reason: &str) {
        self.unpacker.clear();
        self.connection.disconnect(reason, self.current_time);
        self.send_connection_packets();
    }

    /// Advances the client by the duration. A broken connection ends up offline with its
    /// error string set.
    pub fn update(&mut self, duration: Duration) {
        self.current_time += duration;
        self.connection.update(self.current_time);
        self.send_connection_packets();

        if self.connection.state() == ConnectionState::Error {
            let reason = self.connection.error_string().to_owned();
            self.disconnect(&reason);
        }
    }

    /// Returns the next chunk from the server, or a connless chunk from anyone.
    pub fn recv(&mut self) -> Result<Option<Chunk>, NetError> {
        loop {
            if self.unpacker.client_id().is_some() {
                if let Some(chunk) = self.unpacker.fetch_chunk(&mut self.connection) {
                    return Ok(Some(chunk));
                }
                continue;
            }

            let Some((len, addr)) = self.socket.try_recv(&mut self.buffer[..])? else {
                return Ok(None);
            };

            let packet = match PacketConstruct::unpack(&self.buffer[..len], &self.huffman) {
                Ok(packet) => packet,
                Err(e) => {
                    debug!("Dropping invalid packet from {}: {}", addr, e);
                    continue;
                }
            };

            if packet.is_connless() {
                return Ok(Some(Chunk {
                    client_id: None,
                    addr,
                    response_token: packet.response_token,
                    flags: SENDFLAG_CONNLESS,
                    data: packet.data.into(),
                }));
            }

            let deliver = self.connection.feed(&packet, addr, self.current_time);
            self.send_connection_packets();

            if self.connection.state() == ConnectionState::Error {
                let reason = self.connection.error_string().to_owned();
                self.disconnect(&reason);
            } else if deliver {
                self.unpacker.start(addr, packet, ClientId::from_raw(0));
            }
        }
    }

    /// Sends a chunk to the server, or a connless chunk to `chunk.addr`.
    pub fn send(&mut self, chunk: &Chunk) -> Result<(), NetError> {
        if chunk.data.len() >= NET_MAX_PAYLOAD {
            return Err(NetError::ChunkTooLarge(chunk.data.len()));
        }

        if chunk.flags & SENDFLAG_CONNLESS != 0 {
            let packet = PacketConstruct::connless(chunk.response_token, NET_TOKEN_NONE, &chunk.data);
            let buffer = packet.pack(&self.huffman);
            self.socket.send(chunk.addr, &buffer)?;
            return Ok(());
        }

        let flags = if chunk.flags & SENDFLAG_VITAL != 0 { CHUNKFLAG_VITAL } else { 0 };
        let result = self.connection.queue_chunk(flags, &chunk.data, self.current_time);
        if result.is_ok() && chunk.flags & SENDFLAG_FLUSH != 0 {
            self.connection.flush(self.current_time);
        }
        self.send_connection_packets();
        result
    }

    /// Sends every queued chunk now. Returns the number of chunks sent.
    pub fn flush(&mut self) -> usize {
        let num_chunks = self.connection.flush(self.current_time);
        self.send_connection_packets();
        num_chunks
    }

    /// Disconnects from the server if connected.
    pub fn close(&mut self) {
        if self.connection.state() != ConnectionState::Offline {
            self.disconnect("Client shutdown");
        }
    }
}
