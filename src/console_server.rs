use std::net::{SocketAddr, TcpListener};

use log::{debug, trace, warn};

use crate::ban::{BanType, NetBan};
use crate::config::ConsoleConfig;
use crate::console::{ConsoleConnection, ConsoleState};
use crate::error::NetError;
use crate::server::{DelClientCallback, NewClientCallback};
use crate::transport::{ConsoleListener, ConsoleStream};
use crate::{ClientId, NET_MAX_CONSOLE_CLIENTS};

/// Administration console: a stream listener with a small table of line based connections.
pub struct NetConsole {
    listener: Box<dyn ConsoleListener>,
    slots: Box<[ConsoleConnection]>,
    ban: Option<Box<dyn NetBan>>,
    new_client: Option<NewClientCallback>,
    del_client: Option<DelClientCallback>,
}

impl std::fmt::Debug for NetConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetConsole")
            .field("listener", &self.listener)
            .field("slots", &self.slots)
            .finish()
    }
}

impl NetConsole {
    /// Listens for TCP console connections on `addr`.
    pub fn open(addr: SocketAddr, config: ConsoleConfig) -> Result<Self, NetError> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self::new(Box::new(listener), config))
    }

    pub fn new(listener: Box<dyn ConsoleListener>, config: ConsoleConfig) -> Self {
        let max_clients = config.max_clients.clamp(1, NET_MAX_CONSOLE_CLIENTS);
        let slots: Vec<ConsoleConnection> = (0..max_clients).map(|_| ConsoleConnection::new()).collect();

        Self {
            listener,
            slots: slots.into_boxed_slice(),
            ban: None,
            new_client: None,
            del_client: None,
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
        Ok(self.listener.addr()?)
    }

    pub fn max_clients(&self) -> usize {
        self.slots.len()
    }

    pub fn client_addr(&self, client_id: ClientId) -> Option<SocketAddr> {
        self.slots.get(client_id.raw()).and_then(|c| c.peer_addr())
    }

    /// Takes ownership of an accepted stream. Refused streams are told why and closed.
    pub fn accept_client(&mut self, mut stream: Box<dyn ConsoleStream>, addr: SocketAddr) -> Result<ClientId, NetError> {
        let mut refusal = None;
        if self
            .slots
            .iter()
            .any(|c| c.state() == ConsoleState::Online && c.peer_addr().map(|a| a.ip()) == Some(addr.ip()))
        {
            refusal = Some(("only one client per IP allowed", NetError::TooManyClientsFromIp(1)));
        }

        let free_slot = self.slots.iter().position(|c| c.state() == ConsoleState::Offline);
        if refusal.is_none() && free_slot.is_none() {
            refusal = Some(("no free slot available", NetError::ServerFull));
        }

        if let Some((reason, error)) = refusal {
            warn!("Refusing console connection from {}: {}", addr, reason);
            if let Err(e) = stream.send(reason.as_bytes()) {
                debug!("Failed to send refusal to {}: {}", addr, e);
            }
            stream.close();
            return Err(error);
        }

        let index = free_slot.ok_or(NetError::ServerFull)?;
        self.slots[index].init(stream, addr);
        debug!("Console client {} connected from {}", index, addr);
        if let Some(new_client) = self.new_client.as_mut() {
            new_client(ClientId::from_raw(index), addr);
        }
        Ok(ClientId::from_raw(index))
    }

    /// Accepts pending streams and pulls data for every connection, dropping broken ones.
    pub fn update(&mut self) -> Result<(), NetError> {
        while let Some((mut stream, addr)) = self.listener.try_accept()? {
            let banned = self.ban.as_ref().and_then(|ban| ban.is_banned(&addr));
            if let Some(ban) = banned {
                match ban.ban_type {
                    BanType::Soft => trace!("Closing console connection from banned address {}", addr),
                    BanType::Drop => {
                        let reason = format!("You have been banned ({})", ban.reason);
                        if let Err(e) = stream.send(reason.as_bytes()) {
                            debug!("Failed to send ban reason to {}: {}", addr, e);
                        }
                    }
                }
                stream.close();
                continue;
            }

            if let Err(e) = self.accept_client(stream, addr) {
                debug!("Console connection from {} refused: {}", addr, e);
            }
        }

        for index in 0..self.slots.len() {
            self.slots[index].update();
            if self.slots[index].state() == ConsoleState::Error {
                let reason = self.slots[index].error_string().to_owned();
                self.release_slot(index, &reason);
            }
        }

        Ok(())
    }

    /// Returns the next complete line of any client.
    pub fn recv(&mut self) -> Option<(ClientId, String)> {
        self.slots
            .iter_mut()
            .enumerate()
            .find_map(|(index, connection)| connection.recv().map(|line| (ClientId::from_raw(index), line)))
    }

    pub fn send(&mut self, client_id: ClientId, line: &str) -> Result<(), NetError> {
        let index = client_id.raw();
        let connection = self.slots.get_mut(index).ok_or(NetError::ClientNotFound(index))?;
        connection.send(line)
    }

    fn release_slot(&mut self, index: usize, reason: &str) {
        debug!("Console client {} dropped: {}", index, reason);
        if let Some(del_client) = self.del_client.as_mut() {
            del_client(ClientId::from_raw(index), reason);
        }
        self.slots[index].disconnect(reason);
    }

    pub fn drop_client(&mut self, client_id: ClientId, reason: &str) -> Result<(), NetError> {
        let index = client_id.raw();
        match self.slots.get(index) {
            Some(connection) if connection.state() != ConsoleState::Offline => {}
            _ => return Err(NetError::ClientNotFound(index)),
        }

        self.release_slot(index, reason);
        Ok(())
    }

    /// Disconnects every console client.
    pub fn close(&mut self) {
        for index in 0..self.slots.len() {
            if self.slots[index].state() != ConsoleState::Offline {
                self.release_slot(index, "Console shutdown");
            }
        }
    }
}
