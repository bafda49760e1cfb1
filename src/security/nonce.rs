//! Nonce tables.
//!
//! One table tracks the nonces we issued to peers, another the nonces peers
//! issued to us. Both hold at most one entry per peer: issuing or storing a
//! new nonce replaces the previous one. Every nonce is single use and
//! expires after the table's lifetime.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use rand::RngCore;
use tracing::trace;

use crate::core::{NodeId, SecurityError, S0_NONCE_SIZE};

/// An 8-byte S0 nonce. The first byte is its identifier on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce([u8; S0_NONCE_SIZE]);

impl Nonce {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; S0_NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generate a random nonce.
    pub fn random<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; S0_NONCE_SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Identifier carried as the receiver nonce id.
    pub fn id(&self) -> u8 {
        self.0[0]
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; S0_NONCE_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce(id=0x{:02x})", self.id())
    }
}

/// A nonce bound to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceEntry {
    /// Peer the nonce belongs to.
    pub peer: NodeId,
    /// Nonce value.
    pub nonce: Nonce,
    /// When it was issued or received.
    pub issued_at: Instant,
    /// Set once consumed.
    pub used: bool,
}

impl NonceEntry {
    fn is_valid(&self, now: Instant, lifetime: Duration) -> bool {
        !self.used && now < self.issued_at + lifetime
    }
}

/// Per-peer single-use nonces with a fixed lifetime.
#[derive(Debug)]
pub struct NonceTable {
    entries: HashMap<NodeId, NonceEntry>,
    lifetime: Duration,
}

impl NonceTable {
    /// Create an empty table.
    pub fn new(lifetime: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            lifetime,
        }
    }

    /// Issue a fresh nonce to `peer`, invalidating the previous one.
    ///
    /// The identifier byte is non-zero and unique among outstanding nonces.
    pub fn issue<R: RngCore + ?Sized>(&mut self, peer: NodeId, now: Instant, rng: &mut R) -> Nonce {
        let nonce = loop {
            let candidate = Nonce::random(rng);
            let id = candidate.id();
            let taken = self
                .entries
                .values()
                .any(|e| e.peer != peer && e.nonce.id() == id && e.is_valid(now, self.lifetime));
            if id != 0 && !taken {
                break candidate;
            }
        };

        trace!(%peer, nonce_id = nonce.id(), "issued nonce");
        self.insert(peer, nonce, now);
        nonce
    }

    /// Store a nonce for `peer`, replacing the previous one.
    pub fn insert(&mut self, peer: NodeId, nonce: Nonce, now: Instant) {
        self.entries.insert(
            peer,
            NonceEntry {
                peer,
                nonce,
                issued_at: now,
                used: false,
            },
        );
    }

    /// Find the valid nonce of `peer` with identifier `nonce_id` without
    /// consuming it.
    pub fn lookup(&self, peer: NodeId, nonce_id: u8, now: Instant) -> Result<Nonce, SecurityError> {
        self.entries
            .get(&peer)
            .filter(|e| e.nonce.id() == nonce_id && e.is_valid(now, self.lifetime))
            .map(|e| e.nonce)
            .ok_or(SecurityError::ReplayOrUnknownNonce {
                node: peer,
                nonce_id,
            })
    }

    /// Validate and consume the nonce of `peer` with identifier `nonce_id`.
    pub fn consume(&mut self, peer: NodeId, nonce_id: u8, now: Instant) -> Result<Nonce, SecurityError> {
        let nonce = self.lookup(peer, nonce_id, now)?;
        if let Some(entry) = self.entries.get_mut(&peer) {
            entry.used = true;
        }
        Ok(nonce)
    }

    /// Take the valid nonce of `peer`, marking it used.
    pub fn take_unused(&mut self, peer: NodeId, now: Instant) -> Option<Nonce> {
        let entry = self.entries.get_mut(&peer)?;
        if !entry.is_valid(now, self.lifetime) {
            return None;
        }
        entry.used = true;
        Some(entry.nonce)
    }

    /// Whether `peer` has a valid nonce.
    pub fn has_unused(&self, peer: NodeId, now: Instant) -> bool {
        self.entries
            .get(&peer)
            .is_some_and(|e| e.is_valid(now, self.lifetime))
    }

    /// Entry stored for `peer`, valid or not.
    pub fn get(&self, peer: NodeId) -> Option<&NonceEntry> {
        self.entries.get(&peer)
    }

    /// Drop used and expired entries. Returns how many were dropped.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let lifetime = self.lifetime;
        self.entries.retain(|_, e| e.is_valid(now, lifetime));
        before - self.entries.len()
    }

    /// Forget everything about `peer`.
    pub fn clear_peer(&mut self, peer: NodeId) {
        self.entries.remove(&peer);
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
