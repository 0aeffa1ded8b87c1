use std::io;

use thiserror::Error;

use crate::{NET_CONN_BUFFERSIZE, NET_MAX_CHUNKSIZE};

/// Malformed header, chunk or compressed stream. The packet is dropped as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("packet is too small ({0} bytes)")]
    PacketTooSmall(usize),
    #[error("packet is too large ({0} bytes)")]
    PacketTooLarge(usize),
    #[error("unsupported packet version {0}")]
    UnsupportedVersion(u8),
    #[error("declared {0} chunks do not fit in the payload")]
    InvalidChunkCount(u8),
    #[error("control packet without a message")]
    MissingControlMessage,
    #[error("chunk header is truncated")]
    TruncatedChunkHeader,
    #[error("compressed stream ended before the end symbol")]
    UnexpectedEndOfStream,
    #[error("decompressed data does not fit in {0} bytes")]
    OutputOverflow(usize),
}

/// Enum with possibles errors that can occur.
#[derive(Debug, Error)]
pub enum NetError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("resend buffer is full ({} bytes)", NET_CONN_BUFFERSIZE)]
    BufferFull,
    #[error("chunk of {0} bytes is above the {} bytes limit", NET_MAX_CHUNKSIZE)]
    ChunkTooLarge(usize),
    #[error("connection is not established")]
    NotConnected,
    #[error("client {0} was not found")]
    ClientNotFound(usize),
    #[error("this server is full")]
    ServerFull,
    #[error("only {0} clients with the same address are allowed")]
    TooManyClientsFromIp(usize),
    #[error(transparent)]
    Io(#[from] io::Error),
}
