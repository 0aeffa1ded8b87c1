use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;

use crate::error::NetError;

/// A vital chunk waiting for the peer to acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResendEntry {
    pub flags: u8,
    pub sequence: u16,
    pub data: Bytes,
    pub first_send_time: Duration,
    pub last_send_time: Duration,
}

/// Bounded queue of unacknowledged vital chunks, oldest first.
#[derive(Debug)]
pub struct ResendBuffer {
    entries: VecDeque<ResendEntry>,
    memory_usage_bytes: usize,
    max_memory_usage_bytes: usize,
}

impl ResendBuffer {
    pub fn new(max_memory_usage_bytes: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            memory_usage_bytes: 0,
            max_memory_usage_bytes,
        }
    }

    pub fn can_store(&self, size_bytes: usize) -> bool {
        size_bytes + self.memory_usage_bytes <= self.max_memory_usage_bytes
    }

    pub fn push(&mut self, entry: ResendEntry) -> Result<(), NetError> {
        if !self.can_store(entry.data.len()) {
            return Err(NetError::BufferFull);
        }

        self.memory_usage_bytes += entry.data.len();
        self.entries.push_back(entry);
        Ok(())
    }

    pub fn front(&self) -> Option<&ResendEntry> {
        self.entries.front()
    }

    pub fn pop_front(&mut self) -> Option<ResendEntry> {
        let entry = self.entries.pop_front()?;
        self.memory_usage_bytes -= entry.data.len();
        Some(entry)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResendEntry> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ResendEntry> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn memory_usage(&self) -> usize {
        self.memory_usage_bytes
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.memory_usage_bytes = 0;
    }
}
