use std::net::SocketAddr;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use log::{debug, trace};
use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};
use sha2::{Digest, Sha256};

use crate::packet::{ControlMessage, PacketConstruct};
use crate::{NET_TOKENREQUEST_DATASIZE, NET_TOKEN_NONE};

/// Stateless address validation. Tokens are derived from the peer address and a secret seed,
/// so the server can verify a handshake without keeping per-peer state.
#[derive(Debug)]
pub struct TokenManager {
    rng: ChaCha20Rng,
    seed: u64,
    prev_seed: u64,
    seed_rotation: Duration,
    seed_time: Duration,
}

impl TokenManager {
    pub fn new(rng: ChaCha20Rng, seed_rotation: Duration) -> Self {
        let mut manager = Self {
            rng,
            seed: 0,
            prev_seed: 0,
            seed_rotation,
            seed_time: Duration::ZERO,
        };
        manager.generate_seed();
        manager.generate_seed();
        manager
    }

    pub fn from_entropy(seed_rotation: Duration) -> Self {
        Self::new(ChaCha20Rng::from_entropy(), seed_rotation)
    }

    /// Moves the current seed to the previous one and draws a new current seed.
    pub fn generate_seed(&mut self) {
        self.prev_seed = self.seed;
        self.seed = self.rng.next_u64();
    }

    /// Rotates the seed once `seed_rotation` passed since the last rotation.
    pub fn update(&mut self, current_time: Duration) {
        if current_time.saturating_sub(self.seed_time) >= self.seed_rotation {
            trace!("Rotating token seed");
            self.generate_seed();
            self.seed_time = current_time;
        }
    }

    pub fn generate_token(addr: &SocketAddr, seed: u64) -> u32 {
        let mut sha256 = Sha256::default();
        match addr {
            SocketAddr::V4(data) => sha256.update(data.ip().octets()),
            SocketAddr::V6(data) => sha256.update(data.ip().octets()),
        }
        sha256.update(addr.port().to_be_bytes());
        sha256.update(seed.to_le_bytes());

        let digest = sha256.finalize();
        let token = digest.chunks_exact(4).fold(0, |acc, word| acc ^ BigEndian::read_u32(word));
        if token == NET_TOKEN_NONE {
            return NET_TOKEN_NONE - 1;
        }
        token
    }

    /// The token the peer at `addr` must present.
    pub fn token_for(&self, addr: &SocketAddr) -> u32 {
        Self::generate_token(addr, self.seed)
    }

    /// Accepts tokens derived from the current or the previous seed, so a handshake spanning a
    /// rotation still succeeds.
    pub fn check_token(&self, addr: &SocketAddr, token: u32, response_token: u32) -> bool {
        let current = Self::generate_token(addr, self.seed);
        let previous = Self::generate_token(addr, self.prev_seed);
        if token == current || token == previous {
            return true;
        }

        response_token != NET_TOKEN_NONE && (response_token == current || response_token == previous)
    }

    /// Answers a token request with the token for `addr`. Requests must be padded to
    /// [`NET_TOKENREQUEST_DATASIZE`] bytes so the reply is never larger than the request.
    pub fn process_token_message(&self, addr: &SocketAddr, packet: &PacketConstruct) -> Option<PacketConstruct> {
        if packet.control_message() != Some(ControlMessage::Token) {
            return None;
        }

        let extra = packet.control_extra();
        if extra.len() < NET_TOKENREQUEST_DATASIZE {
            debug!("Ignoring token request from {} with only {} bytes", addr, extra.len());
            return None;
        }

        let peer_token = BigEndian::read_u32(&extra[..4]);
        let mut reply = PacketConstruct::control(ControlMessage::Token, &self.token_for(addr).to_be_bytes());
        reply.token = peer_token;
        Some(reply)
    }
}
