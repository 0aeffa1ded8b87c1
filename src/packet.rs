use std::borrow::Cow;

use byteorder::{BigEndian, ByteOrder};

use crate::error::FormatError;
use crate::huffman::Huffman;
use crate::{
    NET_MAX_PAYLOAD, NET_PACKETHEADERSIZE, NET_PACKETHEADERSIZE_CONNLESS, NET_PACKETHEADERSIZE_LEGACY,
    NET_PACKETHEADERSIZE_LEGACY_CONNLESS, NET_PACKETVERSION, NET_PACKETVERSION_LEGACY, NET_SEQUENCE_MASK, NET_TOKEN_NONE,
};

pub const PACKETFLAG_CONTROL: u8 = 1;
pub const PACKETFLAG_CONNLESS: u8 = 2;
pub const PACKETFLAG_RESEND: u8 = 4;
pub const PACKETFLAG_COMPRESSION: u8 = 8;

pub const CHUNKFLAG_VITAL: u8 = 1;
pub const CHUNKFLAG_RESEND: u8 = 2;

const MAX_PACKET_BYTES: usize = NET_PACKETHEADERSIZE_CONNLESS + NET_MAX_PAYLOAD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlMessage {
    KeepAlive = 0,
    Connect = 1,
    ConnectAccept = 2,
    Accept = 3,
    Close = 4,
    Token = 5,
}

impl ControlMessage {
    pub fn from_u8(value: u8) -> Option<Self> {
        use ControlMessage::*;

        let message = match value {
            0 => KeepAlive,
            1 => Connect,
            2 => ConnectAccept,
            3 => Accept,
            4 => Close,
            5 => Token,
            _ => return None,
        };
        Some(message)
    }
}

/// Header preceding every chunk inside a packet payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub flags: u8,
    pub size: u16,
    /// Only transmitted for vital chunks.
    pub sequence: u16,
}

impl ChunkHeader {
    pub fn is_vital(&self) -> bool {
        self.flags & CHUNKFLAG_VITAL != 0
    }

    pub fn header_size(&self) -> usize {
        if self.is_vital() {
            3
        } else {
            2
        }
    }

    pub fn pack(&self, out: &mut Vec<u8>) {
        out.push(((self.flags & 0x03) << 6) | ((self.size >> 6) & 0x3f) as u8);
        let mut size_low = (self.size & 0x3f) as u8;
        if self.is_vital() {
            size_low |= ((self.sequence >> 2) & 0xc0) as u8;
            out.push(size_low);
            out.push((self.sequence & 0xff) as u8);
        } else {
            out.push(size_low);
        }
    }

    /// Reads a chunk header, returning it along with the number of bytes consumed.
    pub fn unpack(data: &[u8]) -> Result<(Self, usize), FormatError> {
        if data.len() < 2 {
            return Err(FormatError::TruncatedChunkHeader);
        }

        let flags = (data[0] >> 6) & 0x03;
        let size = (((data[0] & 0x3f) as u16) << 6) | (data[1] & 0x3f) as u16;
        let mut header = ChunkHeader { flags, size, sequence: 0 };
        if header.is_vital() {
            if data.len() < 3 {
                return Err(FormatError::TruncatedChunkHeader);
            }
            header.sequence = ((((data[1] & 0xc0) as u16) << 2) | data[2] as u16) & NET_SEQUENCE_MASK;
            return Ok((header, 3));
        }

        Ok((header, 2))
    }
}

/// A packet as assembled for sending or as decoded from the wire.
/// `data` holds either the chunk stream or the control message with its extra bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketConstruct {
    pub version: u8,
    pub token: u32,
    /// Only carried by connless packets.
    pub response_token: u32,
    pub flags: u8,
    pub ack: u16,
    pub num_chunks: u8,
    pub data: Vec<u8>,
}

impl Default for PacketConstruct {
    fn default() -> Self {
        Self {
            version: NET_PACKETVERSION,
            token: NET_TOKEN_NONE,
            response_token: NET_TOKEN_NONE,
            flags: 0,
            ack: 0,
            num_chunks: 0,
            data: Vec::with_capacity(NET_MAX_PAYLOAD),
        }
    }
}

impl PacketConstruct {
    pub fn control(message: ControlMessage, extra: &[u8]) -> Self {
        let mut data = Vec::with_capacity(1 + extra.len());
        data.push(message as u8);
        data.extend_from_slice(extra);

        Self {
            flags: PACKETFLAG_CONTROL,
            data,
            ..Default::default()
        }
    }

    pub fn connless(token: u32, response_token: u32, data: &[u8]) -> Self {
        Self {
            token,
            response_token,
            flags: PACKETFLAG_CONNLESS,
            data: data.to_vec(),
            ..Default::default()
        }
    }

    pub fn is_control(&self) -> bool {
        self.flags & PACKETFLAG_CONTROL != 0
    }

    pub fn is_connless(&self) -> bool {
        self.flags & PACKETFLAG_CONNLESS != 0
    }

    pub fn control_message(&self) -> Option<ControlMessage> {
        if !self.is_control() {
            return None;
        }
        self.data.first().and_then(|&id| ControlMessage::from_u8(id))
    }

    /// Bytes following the control message id.
    pub fn control_extra(&self) -> &[u8] {
        if self.data.is_empty() {
            return &[];
        }
        &self.data[1..]
    }

    pub fn header_size(&self) -> usize {
        match (self.version == NET_PACKETVERSION_LEGACY, self.is_connless()) {
            (true, true) => NET_PACKETHEADERSIZE_LEGACY_CONNLESS,
            (true, false) => NET_PACKETHEADERSIZE_LEGACY,
            (false, true) => NET_PACKETHEADERSIZE_CONNLESS,
            (false, false) => NET_PACKETHEADERSIZE,
        }
    }

    /// Serializes the packet. Chunk payloads of connected packets are compressed
    /// when that makes them strictly smaller.
    pub fn pack(&self, huffman: &Huffman) -> Vec<u8> {
        let mut flags = self.flags & !PACKETFLAG_COMPRESSION;
        let mut payload = Cow::Borrowed(&self.data[..]);
        if flags & (PACKETFLAG_CONTROL | PACKETFLAG_CONNLESS) == 0 && !self.data.is_empty() {
            let compressed = huffman.compress(&self.data);
            if compressed.len() < self.data.len() {
                flags |= PACKETFLAG_COMPRESSION;
                payload = Cow::Owned(compressed);
            }
        }

        let header_size = self.header_size();
        let mut buffer = vec![0u8; header_size];
        let connless = self.is_connless();
        let flags_ack = ((flags << 4) & 0xf0) | ((self.ack >> 8) & 0x0f) as u8;

        if self.version == NET_PACKETVERSION_LEGACY {
            if connless {
                buffer.fill(0xff);
            } else {
                buffer[0] = flags_ack;
                buffer[1] = (self.ack & 0xff) as u8;
                buffer[2] = self.num_chunks;
            }
        } else {
            buffer[3] = self.version;
            BigEndian::write_u32(&mut buffer[4..8], self.token);
            if connless {
                buffer[8..11].fill(0xff);
                BigEndian::write_u32(&mut buffer[11..15], self.response_token);
            } else {
                buffer[8] = flags_ack;
                buffer[9] = (self.ack & 0xff) as u8;
                buffer[10] = self.num_chunks;
            }
        }

        buffer.extend_from_slice(&payload);
        buffer
    }

    /// Decodes a datagram. Compressed payloads are expanded, so the returned packet never
    /// carries the compression flag.
    pub fn unpack(buffer: &[u8], huffman: &Huffman) -> Result<Self, FormatError> {
        if buffer.len() < NET_PACKETHEADERSIZE_LEGACY {
            return Err(FormatError::PacketTooSmall(buffer.len()));
        }
        if buffer.len() > MAX_PACKET_BYTES {
            return Err(FormatError::PacketTooLarge(buffer.len()));
        }

        let mut packet = PacketConstruct::default();
        let payload: &[u8];

        let versioned = buffer[..3] == [0, 0, 0] && buffer.len() > NET_PACKETHEADERSIZE_LEGACY;
        if versioned {
            if buffer.len() < NET_PACKETHEADERSIZE {
                return Err(FormatError::PacketTooSmall(buffer.len()));
            }
            packet.version = buffer[3];
            if packet.version != NET_PACKETVERSION && packet.version != NET_PACKETVERSION_LEGACY {
                return Err(FormatError::UnsupportedVersion(packet.version));
            }
            packet.token = BigEndian::read_u32(&buffer[4..8]);
            let flags = buffer[8] >> 4;
            if flags & PACKETFLAG_CONNLESS != 0 {
                if buffer.len() < NET_PACKETHEADERSIZE_CONNLESS {
                    return Err(FormatError::PacketTooSmall(buffer.len()));
                }
                packet.flags = PACKETFLAG_CONNLESS;
                packet.response_token = BigEndian::read_u32(&buffer[11..15]);
                payload = &buffer[NET_PACKETHEADERSIZE_CONNLESS..];
            } else {
                packet.flags = flags;
                packet.ack = (((buffer[8] & 0x0f) as u16) << 8) | buffer[9] as u16;
                packet.num_chunks = buffer[10];
                payload = &buffer[NET_PACKETHEADERSIZE..];
            }
        } else {
            packet.version = NET_PACKETVERSION_LEGACY;
            let flags = buffer[0] >> 4;
            if flags & PACKETFLAG_CONNLESS != 0 {
                if buffer.len() < NET_PACKETHEADERSIZE_LEGACY_CONNLESS {
                    return Err(FormatError::PacketTooSmall(buffer.len()));
                }
                packet.flags = PACKETFLAG_CONNLESS;
                payload = &buffer[NET_PACKETHEADERSIZE_LEGACY_CONNLESS..];
            } else {
                packet.flags = flags;
                packet.ack = (((buffer[0] & 0x0f) as u16) << 8) | buffer[1] as u16;
                packet.num_chunks = buffer[2];
                payload = &buffer[NET_PACKETHEADERSIZE_LEGACY..];
            }
        }

        if packet.is_connless() {
            packet.data = payload.to_vec();
            return Ok(packet);
        }

        if packet.flags & PACKETFLAG_COMPRESSION != 0 {
            packet.data = huffman.decompress(payload, NET_MAX_PAYLOAD)?;
            packet.flags &= !PACKETFLAG_COMPRESSION;
        } else {
            if payload.len() > NET_MAX_PAYLOAD {
                return Err(FormatError::PacketTooLarge(buffer.len()));
            }
            packet.data = payload.to_vec();
        }

        if packet.is_control() {
            if packet.data.is_empty() {
                return Err(FormatError::MissingControlMessage);
            }
        } else if packet.num_chunks as usize * 2 > packet.data.len() {
            return Err(FormatError::InvalidChunkCount(packet.num_chunks));
        }

        Ok(packet)
    }

    /// Returns true if a chunk with its header still fits in the payload.
    pub fn has_room_for(&self, header: &ChunkHeader) -> bool {
        self.data.len() + header.header_size() + header.size as usize <= NET_MAX_PAYLOAD
    }

    pub fn clear(&mut self) {
        self.flags = 0;
        self.ack = 0;
        self.num_chunks = 0;
        self.data.clear();
    }
}
