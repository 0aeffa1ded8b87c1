use std::net::SocketAddr;

use bytes::Bytes;
use log::{debug, trace};

use crate::connection::Connection;
use crate::packet::{ChunkHeader, PacketConstruct};
use crate::sequence::{is_seq_in_backroom, next_sequence};
use crate::{Chunk, ClientId, NET_TOKEN_NONE, SENDFLAG_VITAL};

/// Iterates the chunks of the last accepted packet, one per call.
#[derive(Debug)]
pub(crate) struct RecvUnpacker {
    valid: bool,
    addr: Option<SocketAddr>,
    client_id: Option<ClientId>,
    data: Bytes,
    num_chunks: u8,
    current_chunk: u8,
    cursor: usize,
}

impl RecvUnpacker {
    pub fn new() -> Self {
        Self {
            valid: false,
            addr: None,
            client_id: None,
            data: Bytes::new(),
            num_chunks: 0,
            current_chunk: 0,
            cursor: 0,
        }
    }

    pub fn clear(&mut self) {
        self.valid = false;
    }

    pub fn start(&mut self, addr: SocketAddr, packet: PacketConstruct, client_id: ClientId) {
        self.valid = true;
        self.addr = Some(addr);
        self.client_id = Some(client_id);
        self.num_chunks = packet.num_chunks;
        self.data = Bytes::from(packet.data);
        self.current_chunk = 0;
        self.cursor = 0;
    }

    pub fn client_id(&self) -> Option<ClientId> {
        if self.valid {
            return self.client_id;
        }
        None
    }

    /// Returns the next chunk to deliver. Vital chunks are only delivered in sequence:
    /// duplicates are skipped and a gap makes the connection request a resend.
    pub fn fetch_chunk(&mut self, connection: &mut Connection) -> Option<Chunk> {
        loop {
            if !self.valid {
                return None;
            }
            let addr = self.addr?;

            if self.current_chunk >= self.num_chunks {
                self.clear();
                return None;
            }

            let (header, read) = match ChunkHeader::unpack(&self.data[self.cursor..]) {
                Ok(header) => header,
                Err(e) => {
                    debug!("Dropping rest of packet from {}: {}", addr, e);
                    self.clear();
                    return None;
                }
            };
            self.cursor += read;
            self.current_chunk += 1;

            let end = self.cursor + header.size as usize;
            if end > self.data.len() {
                debug!("Dropping rest of packet from {}: chunk of {} bytes out of bounds", addr, header.size);
                self.clear();
                return None;
            }
            let data = self.data.slice(self.cursor..end);
            self.cursor = end;

            if header.is_vital() {
                let ack = connection.ack();
                if header.sequence == next_sequence(ack) {
                    connection.set_ack(header.sequence);
                } else if is_seq_in_backroom(header.sequence, ack) {
                    trace!("Skipping duplicate chunk {} from {}", header.sequence, addr);
                    continue;
                } else {
                    debug!("Chunk {} from {} is ahead of ack {}, asking for resend", header.sequence, addr, ack);
                    connection.signal_resend();
                    continue;
                }
            }

            return Some(Chunk {
                client_id: self.client_id,
                addr,
                response_token: NET_TOKEN_NONE,
                flags: if header.is_vital() { SENDFLAG_VITAL } else { 0 },
                data,
            });
        }
    }
}
