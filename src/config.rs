use std::time::Duration;

use crate::{NET_MAX_CLIENTS, NET_MAX_CONSOLE_CLIENTS};

/// Timing configuration of a single connection.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionConfig {
    /// Time a vital chunk waits for an ack before being resent.
    pub resend_time: Duration,
    /// Time without any packet from the peer before the connection errors out.
    pub timeout: Duration,
    /// Idle time after which an empty keep-alive is sent.
    pub keepalive_interval: Duration,
    /// Maximum time queued chunks wait before being flushed by `update`.
    pub flush_interval: Duration,
    /// Interval between repeated handshake messages while connecting.
    pub handshake_interval: Duration,
    /// Silence after which the client reports problems.
    pub got_problems_threshold: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            resend_time: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(1),
            flush_interval: Duration::from_millis(500),
            handshake_interval: Duration::from_millis(500),
            got_problems_threshold: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServerConfig {
    /// Number of connection slots, at most [`NET_MAX_CLIENTS`].
    pub max_clients: usize,
    /// Number of slots a single IP address may hold.
    pub max_clients_per_ip: usize,
    /// How often the token seed is rotated.
    pub seed_rotation: Duration,
    pub connection: ConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_clients: NET_MAX_CLIENTS,
            max_clients_per_ip: 4,
            seed_rotation: Duration::from_secs(16),
            connection: ConnectionConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConsoleConfig {
    /// Number of console slots, at most [`NET_MAX_CONSOLE_CLIENTS`].
    pub max_clients: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            max_clients: NET_MAX_CONSOLE_CLIENTS,
        }
    }
}
