use std::net::SocketAddr;

use log::debug;

use crate::error::NetError;
use crate::transport::ConsoleStream;
use crate::NET_MAX_PACKETSIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleState {
    Offline,
    Online,
    Error,
}

/// Line based connection over a stream. The line ending of the peer is learned from the first
/// complete line and used for everything sent afterwards.
#[derive(Debug)]
pub struct ConsoleConnection {
    state: ConsoleState,
    stream: Option<Box<dyn ConsoleStream>>,
    peer_addr: Option<SocketAddr>,
    buffer: Box<[u8; NET_MAX_PACKETSIZE]>,
    buffer_offset: usize,
    line_ending: Vec<u8>,
    line_ending_detected: bool,
    error_string: String,
}

impl Default for ConsoleConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleConnection {
    pub fn new() -> Self {
        Self {
            state: ConsoleState::Offline,
            stream: None,
            peer_addr: None,
            buffer: Box::new([0; NET_MAX_PACKETSIZE]),
            buffer_offset: 0,
            line_ending: b"\n".to_vec(),
            line_ending_detected: false,
            error_string: String::new(),
        }
    }

    pub fn init(&mut self, stream: Box<dyn ConsoleStream>, addr: SocketAddr) {
        self.reset();
        self.stream = Some(stream);
        self.peer_addr = Some(addr);
        self.state = ConsoleState::Online;
    }

    pub fn reset(&mut self) {
        self.state = ConsoleState::Offline;
        self.stream = None;
        self.peer_addr = None;
        self.buffer_offset = 0;
        self.line_ending = b"\n".to_vec();
        self.line_ending_detected = false;
        self.error_string.clear();
    }

    pub fn state(&self) -> ConsoleState {
        self.state
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn error_string(&self) -> &str {
        &self.error_string
    }

    fn set_error(&mut self, reason: &str) {
        debug!("Console connection {:?}: {}", self.peer_addr, reason);
        self.state = ConsoleState::Error;
        self.error_string = reason.to_owned();
    }

    /// Sends `reason` as a last line unless the stream already failed, then closes it.
    pub fn disconnect(&mut self, reason: &str) {
        if self.state == ConsoleState::Offline {
            return;
        }

        if self.state == ConsoleState::Online && !reason.is_empty() {
            if let Err(e) = self.send(reason) {
                debug!("Failed to send disconnect reason to {:?}: {}", self.peer_addr, e);
            }
        }

        if let Some(stream) = self.stream.as_mut() {
            stream.close();
        }
        self.reset();
    }

    /// Pulls pending bytes from the stream.
    pub fn update(&mut self) {
        if self.state != ConsoleState::Online {
            return;
        }

        if self.buffer_offset >= self.buffer.len() - 1 {
            self.set_error("too weak connection (out of buffer)");
            return;
        }

        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        match stream.try_read(&mut self.buffer[self.buffer_offset..]) {
            Ok(None) => {}
            Ok(Some(0)) => self.set_error("remote end closed the connection"),
            Ok(Some(len)) => self.buffer_offset += len,
            Err(e) => {
                debug!("Console stream error: {}", e);
                self.set_error("connection failure");
            }
        }
    }

    /// Returns the next complete line, without its terminator and control characters.
    pub fn recv(&mut self) -> Option<String> {
        if self.state != ConsoleState::Online || self.buffer_offset == 0 {
            return None;
        }

        let buffer = &self.buffer[..self.buffer_offset];
        let start = buffer.iter().position(|&b| b != b'\r' && b != b'\n').unwrap_or(buffer.len());
        let end = start + buffer[start..].iter().position(|&b| b == b'\r' || b == b'\n')?;

        if !self.line_ending_detected {
            self.line_ending = vec![buffer[end]];
            if let Some(&next) = buffer.get(end + 1) {
                if next != buffer[end] && (next == b'\r' || next == b'\n') {
                    self.line_ending.push(next);
                }
            }
            self.line_ending_detected = true;
        }

        let line: String = String::from_utf8_lossy(&buffer[start..end]).chars().filter(|c| !c.is_control()).collect();

        // Leftover terminators are skipped by the next call
        self.buffer.copy_within(end + 1..self.buffer_offset, 0);
        self.buffer_offset -= end + 1;

        Some(line)
    }

    /// Sends one line followed by the detected line ending.
    pub fn send(&mut self, line: &str) -> Result<(), NetError> {
        if self.state != ConsoleState::Online {
            return Err(NetError::NotConnected);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(NetError::NotConnected);
        };

        let mut data = Vec::with_capacity(line.len() + self.line_ending.len());
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(&self.line_ending);
        if let Err(e) = stream.send(&data) {
            self.set_error("failed to send packet");
            return Err(e.into());
        }
        Ok(())
    }
}
