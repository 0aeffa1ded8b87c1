use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use log::{debug, trace};

use crate::config::ConnectionConfig;
use crate::connection_stats::ConnectionStats;
use crate::error::NetError;
use crate::huffman::Huffman;
use crate::packet::{ChunkHeader, ControlMessage, PacketConstruct, CHUNKFLAG_RESEND, CHUNKFLAG_VITAL, PACKETFLAG_RESEND};
use crate::resend_buffer::{ResendBuffer, ResendEntry};
use crate::sequence::{is_seq_in_backroom, next_sequence};
use crate::{NET_CONN_BUFFERSIZE, NET_MAX_CHUNKSIZE, NET_TOKENREQUEST_DATASIZE, NET_TOKEN_NONE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Offline,
    /// Token requested, waiting for the reply.
    Token,
    /// Connect sent, waiting for connect accept.
    Connect,
    /// Connect accepted, waiting for the peer to confirm.
    Pending,
    Online,
    Error,
}

impl ConnectionState {
    pub fn is_active(&self) -> bool {
        !matches!(self, ConnectionState::Offline | ConnectionState::Error)
    }
}

/// One logical peer: sequencing, acknowledgement, resend and the packet under construction.
///
/// A connection never touches the socket. Everything it wants to send is collected and must be
/// drained with [`Connection::packets_to_send`] by the owner.
#[derive(Debug)]
pub struct Connection {
    config: ConnectionConfig,
    huffman: Arc<Huffman>,
    state: ConnectionState,
    sequence: u16,
    ack: u16,
    peer_ack: u16,
    token: u32,
    peer_token: u32,
    peer_addr: Option<SocketAddr>,
    remote_closed: bool,
    block_close_msg: bool,
    construct: PacketConstruct,
    resend_buffer: ResendBuffer,
    last_send_time: Duration,
    last_recv_time: Duration,
    error_string: String,
    stats: ConnectionStats,
    packets_to_send: Vec<(SocketAddr, Vec<u8>)>,
}

impl Connection {
    pub fn new(config: ConnectionConfig, huffman: Arc<Huffman>) -> Self {
        Self {
            config,
            huffman,
            state: ConnectionState::Offline,
            sequence: 0,
            ack: 0,
            peer_ack: 0,
            token: NET_TOKEN_NONE,
            peer_token: NET_TOKEN_NONE,
            peer_addr: None,
            remote_closed: false,
            block_close_msg: false,
            construct: PacketConstruct::default(),
            resend_buffer: ResendBuffer::new(NET_CONN_BUFFERSIZE),
            last_send_time: Duration::ZERO,
            last_recv_time: Duration::ZERO,
            error_string: String::new(),
            stats: ConnectionStats::new(),
            packets_to_send: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Online
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn token(&self) -> u32 {
        self.token
    }

    pub fn peer_token(&self) -> u32 {
        self.peer_token
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn ack(&self) -> u16 {
        self.ack
    }

    pub fn peer_ack(&self) -> u16 {
        self.peer_ack
    }

    pub fn error_string(&self) -> &str {
        &self.error_string
    }

    pub fn reset_error_string(&mut self) {
        self.error_string.clear();
    }

    pub fn remote_closed(&self) -> bool {
        self.remote_closed
    }

    /// When set, no CLOSE is sent on disconnect and the reason of a received CLOSE is ignored.
    pub fn set_block_close_msg(&mut self, block: bool) {
        self.block_close_msg = block;
    }

    pub fn last_recv_time(&self) -> Duration {
        self.last_recv_time
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn resend_buffer(&self) -> &ResendBuffer {
        &self.resend_buffer
    }

    /// Drains the datagrams produced since the last call, with their destination.
    pub fn packets_to_send(&mut self) -> Vec<(SocketAddr, Vec<u8>)> {
        std::mem::take(&mut self.packets_to_send)
    }

    /// Returns the connection to OFFLINE, dropping every sequencing and resend state.
    /// The error string and packets not yet drained are kept.
    pub fn reset(&mut self) {
        self.state = ConnectionState::Offline;
        self.sequence = 0;
        self.ack = 0;
        self.peer_ack = 0;
        self.token = NET_TOKEN_NONE;
        self.peer_token = NET_TOKEN_NONE;
        self.peer_addr = None;
        self.remote_closed = false;
        self.construct.clear();
        self.resend_buffer.clear();
    }

    pub(crate) fn set_error(&mut self, reason: &str) {
        self.state = ConnectionState::Error;
        self.error_string = reason.to_owned();
    }

    /// Starts the handshake with `addr`. `token` is the value the peer has to answer with.
    pub fn connect(&mut self, addr: SocketAddr, token: u32, current_time: Duration) {
        if self.state != ConnectionState::Offline {
            return;
        }

        self.reset();
        self.error_string.clear();
        self.stats = ConnectionStats::new();
        self.peer_addr = Some(addr);
        self.token = token;
        self.state = ConnectionState::Token;
        self.last_recv_time = current_time;
        debug!("Requesting token from {}", addr);
        self.send_token_request(current_time);
    }

    /// Claims this offline connection for a peer whose token was already validated.
    pub fn accept(&mut self, addr: SocketAddr, token: u32, peer_token: u32, current_time: Duration) {
        self.reset();
        self.error_string.clear();
        self.stats = ConnectionStats::new();
        self.peer_addr = Some(addr);
        self.token = token;
        self.peer_token = peer_token;
        self.state = ConnectionState::Pending;
        self.last_recv_time = current_time;
        debug!("Accepting connection from {}", addr);
        self.send_control(ControlMessage::ConnectAccept, &[], current_time);
    }

    /// Closes the connection, telling the peer why unless it closed first.
    pub fn disconnect(&mut self, reason: &str, current_time: Duration) {
        if self.state == ConnectionState::Offline {
            return;
        }

        if !self.remote_closed && !self.block_close_msg {
            let mut extra = Vec::with_capacity(reason.len() + 1);
            if !reason.is_empty() {
                extra.extend_from_slice(reason.as_bytes());
                extra.push(0);
            }
            self.send_control(ControlMessage::Close, &extra, current_time);
        }

        if !reason.is_empty() || !self.remote_closed {
            self.error_string = reason.to_owned();
        }
        debug!("Connection with {:?} closed: {}", self.peer_addr, reason);
        self.reset();
    }

    pub fn send_control(&mut self, message: ControlMessage, extra: &[u8], current_time: Duration) {
        let mut packet = PacketConstruct::control(message, extra);
        packet.ack = self.ack;
        packet.token = self.peer_token;
        trace!("Sending control {:?} to {:?}", message, self.peer_addr);
        self.send_packet(&packet, current_time);
    }

    fn send_token_request(&mut self, current_time: Duration) {
        let mut extra = vec![0u8; NET_TOKENREQUEST_DATASIZE];
        BigEndian::write_u32(&mut extra[..4], self.token);
        self.send_control(ControlMessage::Token, &extra, current_time);
    }

    fn send_packet(&mut self, packet: &PacketConstruct, current_time: Duration) {
        let Some(addr) = self.peer_addr else {
            return;
        };

        let buffer = packet.pack(&self.huffman);
        self.stats.sent_packet(buffer.len());
        self.packets_to_send.push((addr, buffer));
        self.last_send_time = current_time;
    }

    /// Queues a chunk for the next flush. Vital chunks get the next sequence number and stay
    /// in the resend buffer until acknowledged. Nothing changes when the chunk is refused.
    pub fn queue_chunk(&mut self, flags: u8, data: &[u8], current_time: Duration) -> Result<(), NetError> {
        if data.len() > NET_MAX_CHUNKSIZE {
            return Err(NetError::ChunkTooLarge(data.len()));
        }
        if !matches!(self.state, ConnectionState::Online | ConnectionState::Pending) {
            return Err(NetError::NotConnected);
        }

        let vital = flags & CHUNKFLAG_VITAL != 0;
        if vital && !self.resend_buffer.can_store(data.len()) {
            return Err(NetError::BufferFull);
        }

        let mut sequence = 0;
        if vital {
            self.sequence = next_sequence(self.sequence);
            sequence = self.sequence;
        }

        self.queue_chunk_ex(flags, data, sequence, current_time);

        if vital {
            self.resend_buffer.push(ResendEntry {
                flags,
                sequence,
                data: Bytes::copy_from_slice(data),
                first_send_time: current_time,
                last_send_time: current_time,
            })?;
        }

        Ok(())
    }

    fn queue_chunk_ex(&mut self, flags: u8, data: &[u8], sequence: u16, current_time: Duration) {
        let header = ChunkHeader {
            flags,
            size: data.len() as u16,
            sequence,
        };

        if !self.construct.has_room_for(&header) || self.construct.num_chunks == u8::MAX {
            self.flush(current_time);
        }

        header.pack(&mut self.construct.data);
        self.construct.data.extend_from_slice(data);
        self.construct.num_chunks += 1;
    }

    /// Sends every queued chunk in one packet. Returns the number of chunks sent.
    pub fn flush(&mut self, current_time: Duration) -> usize {
        let num_chunks = self.construct.num_chunks as usize;
        if num_chunks == 0 && self.construct.flags == 0 {
            return 0;
        }

        let mut packet = std::mem::take(&mut self.construct);
        packet.ack = self.ack;
        packet.token = self.peer_token;
        self.send_packet(&packet, current_time);

        packet.clear();
        self.construct = packet;
        num_chunks
    }

    /// Asks the peer to resend everything it has not seen acknowledged.
    pub fn signal_resend(&mut self) {
        self.construct.flags |= PACKETFLAG_RESEND;
    }

    pub(crate) fn set_ack(&mut self, ack: u16) {
        self.ack = ack;
    }

    fn resend(&mut self, current_time: Duration) {
        let entries: Vec<(u8, u16, Bytes)> = self
            .resend_buffer
            .iter_mut()
            .map(|entry| {
                entry.last_send_time = current_time;
                (entry.flags, entry.sequence, entry.data.clone())
            })
            .collect();

        for (flags, sequence, data) in entries {
            self.queue_chunk_ex(flags | CHUNKFLAG_RESEND, &data, sequence, current_time);
            self.stats.resent_chunk();
        }
    }

    fn ack_chunks(&mut self, ack: u16) {
        while let Some(entry) = self.resend_buffer.front() {
            if !is_seq_in_backroom(entry.sequence, ack) {
                break;
            }
            self.resend_buffer.pop_front();
        }
    }

    fn valid_ack(&self, ack: u16) -> bool {
        if self.sequence >= self.peer_ack {
            ack >= self.peer_ack && ack <= self.sequence
        } else {
            !(ack < self.peer_ack && ack > self.sequence)
        }
    }

    /// Processes a decoded packet from `addr`.
    /// Returns true when the packet carries chunks that should be unpacked.
    pub fn feed(&mut self, packet: &PacketConstruct, addr: SocketAddr, current_time: Duration) -> bool {
        if !self.state.is_active() {
            return false;
        }

        if self.peer_addr != Some(addr) {
            debug!("Dropping packet from {}, connection belongs to {:?}", addr, self.peer_addr);
            self.stats.dropped_packet();
            return false;
        }

        if packet.token != self.token {
            debug!("Dropping packet from {} with wrong token {:#x}", addr, packet.token);
            self.stats.dropped_packet();
            return false;
        }

        if !self.valid_ack(packet.ack) {
            debug!(
                "Dropping packet from {} with invalid ack {} (peer ack {}, sequence {})",
                addr, packet.ack, self.peer_ack, self.sequence
            );
            self.stats.dropped_packet();
            return false;
        }

        self.peer_ack = packet.ack;
        self.last_recv_time = current_time;
        self.stats.received_packet(packet.header_size() + packet.data.len());

        if packet.flags & PACKETFLAG_RESEND != 0 {
            trace!("Peer {} requested a resend", addr);
            self.resend(current_time);
        }

        if packet.is_control() {
            self.process_control(packet, addr, current_time);
            if self.state == ConnectionState::Online {
                self.ack_chunks(packet.ack);
            }
            return false;
        }

        if self.state == ConnectionState::Pending {
            debug!("Connection with {} is online", addr);
            self.state = ConnectionState::Online;
        }

        if self.state != ConnectionState::Online {
            return false;
        }

        self.ack_chunks(packet.ack);
        true
    }

    fn process_control(&mut self, packet: &PacketConstruct, addr: SocketAddr, current_time: Duration) {
        let Some(message) = packet.control_message() else {
            debug!("Ignoring unknown control message from {}", addr);
            return;
        };

        match (message, self.state) {
            (ControlMessage::Close, _) => {
                if !self.block_close_msg {
                    let reason: String = String::from_utf8_lossy(packet.control_extra())
                        .trim_end_matches('\0')
                        .chars()
                        .filter(|c| !c.is_control())
                        .collect();
                    self.error_string = reason;
                }
                debug!("Connection with {} closed by peer: {}", addr, self.error_string);
                self.state = ConnectionState::Error;
                self.remote_closed = true;
                self.resend_buffer.clear();
            }
            (ControlMessage::Token, ConnectionState::Token) => {
                let extra = packet.control_extra();
                if extra.len() < 4 {
                    debug!("Ignoring token reply from {} without a token", addr);
                    return;
                }
                self.peer_token = BigEndian::read_u32(&extra[..4]);
                self.state = ConnectionState::Connect;
                debug!("Got token from {}, connecting", addr);
                let token = self.token.to_be_bytes();
                self.send_control(ControlMessage::Connect, &token, current_time);
            }
            (ControlMessage::ConnectAccept, ConnectionState::Connect) => {
                self.state = ConnectionState::Online;
                debug!("Connection with {} is online", addr);
                self.send_control(ControlMessage::Accept, &[], current_time);
            }
            (ControlMessage::Accept, ConnectionState::Pending) => {
                self.state = ConnectionState::Online;
                debug!("Connection with {} is online", addr);
            }
            (ControlMessage::KeepAlive, _) => {}
            (message, state) => {
                debug!("Ignoring control {:?} from {} in state {:?}", message, addr, state);
            }
        }
    }

    /// Advances timers: timeout, resends, stale flush, keep-alive and handshake repetition.
    pub fn update(&mut self, current_time: Duration) {
        if !self.state.is_active() {
            return;
        }

        if current_time.saturating_sub(self.last_recv_time) > self.config.timeout {
            debug!("Connection with {:?} timed out", self.peer_addr);
            self.set_error("Timeout");
            return;
        }

        let resend_time = self.config.resend_time;
        let stale: Vec<(u8, u16, Bytes)> = self
            .resend_buffer
            .iter_mut()
            .filter(|entry| current_time.saturating_sub(entry.last_send_time) >= resend_time)
            .map(|entry| {
                entry.last_send_time = current_time;
                (entry.flags, entry.sequence, entry.data.clone())
            })
            .collect();
        for (flags, sequence, data) in stale {
            trace!("Resending chunk {} to {:?}", sequence, self.peer_addr);
            self.queue_chunk_ex(flags | CHUNKFLAG_RESEND, &data, sequence, current_time);
            self.stats.resent_chunk();
        }

        let since_last_send = current_time.saturating_sub(self.last_send_time);
        match self.state {
            ConnectionState::Online => {
                if since_last_send >= self.config.flush_interval {
                    let num_chunks = self.flush(current_time);
                    if num_chunks > 0 {
                        trace!("Flushed {} stale chunks to {:?}", num_chunks, self.peer_addr);
                    }
                }

                if current_time.saturating_sub(self.last_send_time) >= self.config.keepalive_interval {
                    self.send_control(ControlMessage::KeepAlive, &[], current_time);
                }
            }
            ConnectionState::Token if since_last_send >= self.config.handshake_interval => {
                self.send_token_request(current_time);
            }
            ConnectionState::Connect if since_last_send >= self.config.handshake_interval => {
                let token = self.token.to_be_bytes();
                self.send_control(ControlMessage::Connect, &token, current_time);
            }
            ConnectionState::Pending if since_last_send >= self.config.handshake_interval => {
                self.send_control(ControlMessage::ConnectAccept, &[], current_time);
            }
            _ => {}
        }
    }
}
