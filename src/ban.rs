use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanType {
    /// Packets are dropped without an answer.
    Soft,
    /// The peer is told it is banned before the packet is dropped.
    Drop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanInfo {
    pub ban_type: BanType,
    pub reason: String,
}

/// Ban list consulted for every datagram and console connection.
pub trait NetBan {
    fn is_banned(&self, addr: &SocketAddr) -> Option<BanInfo>;
}

impl<F> NetBan for F
where
    F: Fn(&SocketAddr) -> Option<BanInfo>,
{
    fn is_banned(&self, addr: &SocketAddr) -> Option<BanInfo> {
        self(addr)
    }
}
