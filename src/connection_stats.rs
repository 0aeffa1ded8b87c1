/// Running totals of a connection, reset whenever the connection is reset.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    pub sent_packets: u64,
    pub sent_bytes: u64,
    pub recv_packets: u64,
    pub recv_bytes: u64,
    /// Packets rejected because of a bad token, ack or format.
    pub dropped_packets: u64,
    pub resent_chunks: u64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn sent_packet(&mut self, bytes: usize) {
        self.sent_packets += 1;
        self.sent_bytes += bytes as u64;
    }

    pub(crate) fn received_packet(&mut self, bytes: usize) {
        self.recv_packets += 1;
        self.recv_bytes += bytes as u64;
    }

    pub(crate) fn dropped_packet(&mut self) {
        self.dropped_packets += 1;
    }

    pub(crate) fn resent_chunk(&mut self) {
        self.resent_chunks += 1;
    }
}
