use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use log::{debug, error, trace, warn};

use crate::ban::{BanType, NetBan};
use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionState};
use crate::connection_stats::ConnectionStats;
use crate::error::NetError;
use crate::huffman::Huffman;
use crate::packet::{ControlMessage, PacketConstruct, CHUNKFLAG_VITAL};
use crate::token::TokenManager;
use crate::transport::{DatagramSocket, NativeSocket, NetType};
use crate::unpacker::RecvUnpacker;
use crate::{
    Chunk, ClientId, NET_MAX_CLIENTS, NET_MAX_PACKETSIZE, NET_MAX_PAYLOAD, NET_PACKETVERSION_LEGACY, NET_TOKEN_NONE, SENDFLAG_CONNLESS,
    SENDFLAG_FLUSH, SENDFLAG_VITAL,
};

/// Called when a slot is claimed by a new peer.
pub type NewClientCallback = Box<dyn FnMut(ClientId, SocketAddr)>;
/// Called right before a slot is released, with the reason.
pub type DelClientCallback = Box<dyn FnMut(ClientId, &str)>;

/// Fans a single datagram socket out to a fixed table of connection slots.
/// The slot index is the [`ClientId`].
pub struct NetServer {
    socket: Box<dyn DatagramSocket>,
    config: ServerConfig,
    huffman: Arc<Huffman>,
    token_manager: TokenManager,
    slots: Box<[Connection]>,
    ban: Option<Box<dyn NetBan>>,
    new_client: Option<NewClientCallback>,
    del_client: Option<DelClientCallback>,
    unpacker: RecvUnpacker,
    current_time: Duration,
    buffer: Box<[u8; NET_MAX_PACKETSIZE * 2]>,
}

impl std::fmt::Debug for NetServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetServer")
            .field("socket", &self.socket)
            .field("max_clients", &self.slots.len())
            .field("current_time", &self.current_time)
            .finish()
    }
}

impl NetServer {
    /// Binds a native UDP socket and opens the server on it.
    pub fn open(addr: SocketAddr, config: ServerConfig, flags: u32) -> Result<Self, NetError> {
        let socket = NativeSocket::bind(addr, flags)?;
        Ok(Self::new(Box::new(socket), config))
    }

    pub fn new(socket: Box<dyn DatagramSocket>, mut config: ServerConfig) -> Self {
        config.max_clients = config.max_clients.clamp(1, NET_MAX_CLIENTS);
        config.max_clients_per_ip = config.max_clients_per_ip.clamp(1, config.max_clients);

        let huffman = Arc::new(Huffman::new());
        let slots: Vec<Connection> = (0..config.max_clients)
            .map(|_| Connection::new(config.connection.clone(), huffman.clone()))
            .collect();

        Self {
            socket,
            token_manager: TokenManager::from_entropy(config.seed_rotation),
            config,
            huffman,
            slots: slots.into_boxed_slice(),
            ban: None,
            new_client: None,
            del_client: None,
            unpacker: RecvUnpacker::new(),
            current_time: Duration::ZERO,
            buffer: Box::new([0; NET_MAX_PACKETSIZE * 2]),
        }
    }

    pub fn set_callbacks<N, D>(&mut self, new_client: N, del_client: D)
    where
        N: FnMut(ClientId, SocketAddr) + 'static,
        D: FnMut(ClientId, &str) + 'static,
    {
        self.new_client = Some(Box::new(new_client));
        self.del_client = Some(Box::new(del_client));
    }

    pub fn set_ban(&mut self, ban: impl NetBan + 'static) {
        self.ban = Some(Box::new(ban));
    }

    pub fn addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.socket.addr()?)
    }

    pub fn net_type(&self) -> NetType {
        self.socket.net_type()
    }

    pub fn max_clients(&self) -> usize {
        self.slots.len()
    }

    pub fn set_max_clients_per_ip(&mut self, max: usize) {
        self.config.max_clients_per_ip = max.clamp(1, self.slots.len());
    }

    pub fn current_time(&self) -> Duration {
        self.current_time
    }

    /// Returns the client address if the slot is in use.
    pub fn client_addr(&self, client_id: ClientId) -> Option<SocketAddr> {
        let connection = self.slots.get(client_id.raw())?;
        if !connection.state().is_active() {
            return None;
        }
        connection.peer_addr()
    }

    pub fn client_state(&self, client_id: ClientId) -> Option<ConnectionState> {
        self.slots.get(client_id.raw()).map(|c| c.state())
    }

    pub fn client_stats(&self, client_id: ClientId) -> Option<&ConnectionStats> {
        self.slots.get(client_id.raw()).map(|c| c.stats())
    }

    pub fn clients_id(&self) -> Vec<ClientId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, c)| c.state().is_active())
            .map(|(i, _)| ClientId::from_raw(i))
            .collect()
    }

    pub fn connected_clients(&self) -> usize {
        self.slots.iter().filter(|c| c.state().is_active()).count()
    }

    fn find_slot_by_addr(&self, addr: &SocketAddr) -> Option<usize> {
        self.slots
            .iter()
            .position(|c| c.state().is_active() && c.peer_addr().as_ref() == Some(addr))
    }

    fn send_raw(&mut self, addr: SocketAddr, buffer: &[u8]) {
        if let Err(e) = self.socket.send(addr, buffer) {
            error!("Failed to send packet to {}: {}", addr, e);
        }
    }

    fn send_connection_packets(&mut self, index: usize) {
        for (addr, buffer) in self.slots[index].packets_to_send() {
            self.send_raw(addr, &buffer);
        }
    }

    /// Answers a peer that has no slot with a CLOSE carrying `reason`.
    fn send_close(&mut self, addr: SocketAddr, token: u32, reason: &str) {
        let mut extra = reason.as_bytes().to_vec();
        extra.push(0);
        let mut packet = PacketConstruct::control(ControlMessage::Close, &extra);
        packet.token = token;
        let buffer = packet.pack(&self.huffman);
        self.send_raw(addr, &buffer);
    }

    fn release_slot(&mut self, index: usize, reason: &str) {
        debug!("Client {} dropped: {}", index, reason);
        if let Some(del_client) = self.del_client.as_mut() {
            del_client(ClientId::from_raw(index), reason);
        }
        if self.unpacker.client_id() == Some(ClientId::from_raw(index)) {
            self.unpacker.clear();
        }
        self.slots[index].disconnect(reason, self.current_time);
        self.send_connection_packets(index);
    }

    /// Disconnects a client, sending it the reason.
    pub fn drop_client(&mut self, client_id: ClientId, reason: &str) -> Result<(), NetError> {
        let index = client_id.raw();
        match self.slots.get(index) {
            Some(connection) if connection.state() != ConnectionState::Offline => {}
            _ => return Err(NetError::ClientNotFound(index)),
        }

        self.release_slot(index, reason);
        Ok(())
    }

    /// Disconnects every client.
    pub fn close(&mut self) {
        for index in 0..self.slots.len() {
            if self.slots[index].state() != ConnectionState::Offline {
                self.release_slot(index, "Server shutdown");
            }
        }
    }

    /// Advances the server by the duration: timeouts, resends and keep-alives of every slot.
    pub fn update(&mut self, duration: Duration) {
        self.current_time += duration;

        for index in 0..self.slots.len() {
            self.slots[index].update(self.current_time);
            self.send_connection_packets(index);

            if self.slots[index].state() == ConnectionState::Error {
                let reason = self.slots[index].error_string().to_owned();
                self.release_slot(index, &reason);
            }
        }

        self.token_manager.update(self.current_time);
    }

    /// Returns the next chunk, either from the packet being unpacked or from the socket.
    /// `Ok(None)` means nothing is pending.
    pub fn recv(&mut self) -> Result<Option<Chunk>, NetError> {
        loop {
            if let Some(client_id) = self.unpacker.client_id() {
                if let Some(chunk) = self.unpacker.fetch_chunk(&mut self.slots[client_id.raw()]) {
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

            let banned = self.ban.as_ref().and_then(|ban| ban.is_banned(&addr));
            if let Some(ban) = banned {
                match ban.ban_type {
                    BanType::Soft => trace!("Ignoring packet from banned address {}", addr),
                    BanType::Drop => {
                        let reason = format!("You have been banned ({})", ban.reason);
                        self.send_close(addr, peer_token_of(&packet), &reason);
                    }
                }
                continue;
            }

            if packet.is_connless() {
                if !self.token_manager.check_token(&addr, packet.token, packet.response_token) {
                    debug!("Dropping connless packet from {} with invalid token", addr);
                    continue;
                }
                return Ok(Some(Chunk {
                    client_id: None,
                    addr,
                    response_token: packet.response_token,
                    flags: SENDFLAG_CONNLESS,
                    data: packet.data.into(),
                }));
            }

            if packet.version == NET_PACKETVERSION_LEGACY {
                debug!("Dropping legacy packet from {}", addr);
                continue;
            }

            if let Some(index) = self.find_slot_by_addr(&addr) {
                let deliver = self.slots[index].feed(&packet, addr, self.current_time);
                self.send_connection_packets(index);

                if self.slots[index].state() == ConnectionState::Error {
                    let reason = self.slots[index].error_string().to_owned();
                    self.release_slot(index, &reason);
                } else if deliver {
                    self.unpacker.start(addr, packet, ClientId::from_raw(index));
                }
                continue;
            }

            match packet.control_message() {
                Some(ControlMessage::Token) if packet.token == NET_TOKEN_NONE => {
                    if let Some(reply) = self.token_manager.process_token_message(&addr, &packet) {
                        trace!("Sending token to {}", addr);
                        let buffer = reply.pack(&self.huffman);
                        self.send_raw(addr, &buffer);
                    }
                }
                Some(ControlMessage::Connect) => self.try_accept(addr, &packet),
                _ => trace!("Ignoring packet from unknown address {}", addr),
            }
        }
    }

    fn try_accept(&mut self, addr: SocketAddr, packet: &PacketConstruct) {
        if !self.token_manager.check_token(&addr, packet.token, NET_TOKEN_NONE) {
            debug!("Dropping connect from {} with invalid token {:#x}", addr, packet.token);
            return;
        }

        let peer_token = peer_token_of(packet);
        if peer_token == NET_TOKEN_NONE {
            debug!("Dropping connect from {} without a token", addr);
            return;
        }

        let same_ip = self
            .slots
            .iter()
            .filter(|c| c.state().is_active() && c.peer_addr().map(|a| a.ip()) == Some(addr.ip()))
            .count();
        if same_ip >= self.config.max_clients_per_ip {
            warn!("Refusing {}: {} clients from the same address", addr, same_ip);
            let reason = format!("Only {} players with the same IP are allowed", self.config.max_clients_per_ip);
            self.send_close(addr, peer_token, &reason);
            return;
        }

        let Some(index) = self.slots.iter().position(|c| c.state() == ConnectionState::Offline) else {
            warn!("Refusing {}: server is full", addr);
            self.send_close(addr, peer_token, "This server is full");
            return;
        };

        self.slots[index].accept(addr, packet.token, peer_token, self.current_time);
        self.send_connection_packets(index);
        debug!("Client {} connected from {}", index, addr);
        if let Some(new_client) = self.new_client.as_mut() {
            new_client(ClientId::from_raw(index), addr);
        }
    }

    /// Sends a chunk. Connless chunks go straight to the socket, the others are queued on the
    /// connection and only sent on flush unless [`SENDFLAG_FLUSH`] is set.
    pub fn send(&mut self, chunk: &Chunk) -> Result<(), NetError> {
        if chunk.data.len() >= NET_MAX_PAYLOAD {
            return Err(NetError::ChunkTooLarge(chunk.data.len()));
        }

        if chunk.flags & SENDFLAG_CONNLESS != 0 {
            let response_token = self.token_manager.token_for(&chunk.addr);
            let packet = PacketConstruct::connless(chunk.response_token, response_token, &chunk.data);
            let buffer = packet.pack(&self.huffman);
            self.socket.send(chunk.addr, &buffer)?;
            return Ok(());
        }

        let client_id = chunk.client_id.ok_or(NetError::NotConnected)?;
        let index = client_id.raw();
        let connection = self.slots.get_mut(index).ok_or(NetError::ClientNotFound(index))?;

        let flags = if chunk.flags & SENDFLAG_VITAL != 0 { CHUNKFLAG_VITAL } else { 0 };
        let result = connection.queue_chunk(flags, &chunk.data, self.current_time);
        if result.is_ok() && chunk.flags & SENDFLAG_FLUSH != 0 {
            connection.flush(self.current_time);
        }
        self.send_connection_packets(index);
        result
    }

    /// Flushes the queued chunks of a client.
    pub fn flush(&mut self, client_id: ClientId) -> Result<usize, NetError> {
        let index = client_id.raw();
        let connection = self.slots.get_mut(index).ok_or(NetError::ClientNotFound(index))?;
        let num_chunks = connection.flush(self.current_time);
        self.send_connection_packets(index);
        Ok(num_chunks)
    }
}

/// Token the peer asked to be answered with, carried by its token request or connect.
fn peer_token_of(packet: &PacketConstruct) -> u32 {
    match packet.control_message() {
        Some(ControlMessage::Token | ControlMessage::Connect) if packet.control_extra().len() >= 4 => {
            BigEndian::read_u32(&packet.control_extra()[..4])
        }
        _ => NET_TOKEN_NONE,
    }
}
