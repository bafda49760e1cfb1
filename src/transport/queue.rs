//! Bounded priority queue of outbound frames.
//!
//! Entries are ordered by (priority, insertion sequence): strict priority,
//! FIFO within a class. The queue does no I/O.

use std::collections::BTreeMap;

use tracing::trace;

use crate::core::{NodeId, Priority, SessionToken, TxError};

/// A unit of outbound work awaiting transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Completion token.
    pub token: SessionToken,
    /// Frame bytes handed to the radio.
    pub payload: Vec<u8>,
    /// Destination node.
    pub destination: NodeId,
    /// Priority class.
    pub priority: Priority,
    /// Frames the destination will send back.
    pub expected_responses: u8,
    sequence: u64,
}

impl QueueEntry {
    /// Create an entry expecting no responses.
    pub fn new(token: SessionToken, payload: Vec<u8>, destination: NodeId, priority: Priority) -> Self {
        Self {
            token,
            payload,
            destination,
            priority,
            expected_responses: 0,
            sequence: 0,
        }
    }

    /// Set the number of expected response frames.
    pub fn with_expected_responses(mut self, count: u8) -> Self {
        self.expected_responses = count;
        self
    }

    /// Insertion sequence, assigned when the entry is pushed.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Priority + FIFO ordered queue with a capacity bound.
#[derive(Debug)]
pub struct TxQueue {
    entries: BTreeMap<(Priority, u64), QueueEntry>,
    next_sequence: u64,
    capacity: usize,
}

impl TxQueue {
    /// Create an empty queue holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            next_sequence: 0,
            capacity,
        }
    }

    /// Insert an entry. Never blocks; fails when the queue is full.
    pub fn push(&mut self, mut entry: QueueEntry) -> Result<(), TxError> {
        if self.entries.len() >= self.capacity {
            return Err(TxError::QueueFull {
                capacity: self.capacity,
            });
        }

        entry.sequence = self.next_sequence;
        self.next_sequence += 1;

        trace!(
            token = %entry.token,
            priority = ?entry.priority,
            sequence = entry.sequence,
            "queued"
        );
        self.entries.insert((entry.priority, entry.sequence), entry);
        Ok(())
    }

    /// Highest priority, oldest entry.
    pub fn peek(&self) -> Option<&QueueEntry> {
        self.entries.values().next()
    }

    /// Remove and return the highest priority, oldest entry.
    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.entries.pop_first().map(|(_, entry)| entry)
    }

    /// Remove entries matching `predicate`, returning how many were removed.
    pub fn remove_matching<F>(&mut self, predicate: F) -> usize
    where
        F: FnMut(&QueueEntry) -> bool,
    {
        self.drain_matching(predicate).len()
    }

    /// Remove entries matching `predicate` and return them in queue order.
    pub fn drain_matching<F>(&mut self, mut predicate: F) -> Vec<QueueEntry>
    where
        F: FnMut(&QueueEntry) -> bool,
    {
        let keys: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| predicate(entry))
            .map(|(key, _)| *key)
            .collect();

        keys.into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .collect()
    }

    /// Whether an entry with `token` is queued.
    pub fn contains(&self, token: SessionToken) -> bool {
        self.entries.values().any(|entry| entry.token == token)
    }

    /// Pending entries in dequeue order.
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.values()
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
