//! In-memory collaborators for tests and simulations.
//!
//! [`MemoryStorage`] keeps node records in a map, [`RecordingRadio`] accepts
//! every frame and remembers it. Both are cheap to share between a controller
//! and the test driving it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use crate::core::{
    ControllerStorage, InclusionProtocol, KeyClasses, NodeId, RadioError, RadioLink, StorageError,
    TxOptions,
};
use crate::security::NetworkKey;

/// Everything storage knows about one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeRecord {
    /// Granted key classes.
    pub granted_keys: KeyClasses,
    /// Node supports S2.
    pub s2_capable: bool,
    /// Node proved it can talk securely.
    pub security_capable: bool,
    /// Protocol the node was included with.
    pub protocol: InclusionProtocol,
    /// Implemented command class versions.
    pub command_classes: HashMap<u8, u8>,
}

#[derive(Debug, Default)]
struct StorageState {
    network_key: Option<[u8; 16]>,
    nodes: HashMap<NodeId, NodeRecord>,
    unavailable: bool,
}

/// Map-backed [`ControllerStorage`].
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<StorageState>,
}

impl MemoryStorage {
    /// Empty storage without a network key.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty storage holding `key` as the S0 network key.
    pub fn with_network_key(key: [u8; 16]) -> Self {
        let storage = Self::new();
        storage.set_network_key(Some(key));
        storage
    }

    /// Replace the network key.
    pub fn set_network_key(&self, key: Option<[u8; 16]>) {
        self.lock().network_key = key;
    }

    /// Insert or replace a node record.
    pub fn add_node(&self, node: NodeId, record: NodeRecord) {
        self.lock().nodes.insert(node, record);
    }

    /// Record the inclusion protocol of `node`.
    pub fn set_protocol(&self, node: NodeId, protocol: InclusionProtocol) {
        self.lock().nodes.entry(node).or_default().protocol = protocol;
    }

    /// Snapshot of the record of `node`.
    pub fn node(&self, node: NodeId) -> Option<NodeRecord> {
        self.lock().nodes.get(&node).cloned()
    }

    /// Make every call fail with a backend error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StorageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read<T>(&self, node: NodeId, f: impl FnOnce(&NodeRecord) -> T) -> Result<T, StorageError> {
        let state = self.lock();
        if state.unavailable {
            return Err(StorageError::Backend("unavailable".into()));
        }
        state.nodes.get(&node).map(f).ok_or(StorageError::NodeNotFound(node))
    }

    fn write(&self, node: NodeId, f: impl FnOnce(&mut NodeRecord)) -> Result<(), StorageError> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(StorageError::Backend("unavailable".into()));
        }
        f(state.nodes.entry(node).or_default());
        Ok(())
    }
}

impl ControllerStorage for MemoryStorage {
    fn get_granted_keys(&self, node: NodeId) -> Result<KeyClasses, StorageError> {
        self.read(node, |r| r.granted_keys)
    }

    fn is_node_s2_capable(&self, node: NodeId) -> Result<bool, StorageError> {
        self.read(node, |r| r.s2_capable)
    }

    fn set_node_security_capable(&self, node: NodeId, capable: bool) -> Result<(), StorageError> {
        self.write(node, |r| r.security_capable = capable)
    }

    fn get_inclusion_protocol(&self, node: NodeId) -> Result<InclusionProtocol, StorageError> {
        self.read(node, |r| r.protocol)
    }

    fn get_command_class_version(&self, node: NodeId, class: u8) -> Result<u8, StorageError> {
        self.read(node, |r| r.command_classes.get(&class).copied().unwrap_or(0))
    }

    fn s0_network_key(&self) -> Result<NetworkKey, StorageError> {
        let state = self.lock();
        if state.unavailable {
            return Err(StorageError::Backend("unavailable".into()));
        }
        state.network_key.map(NetworkKey::new).ok_or(StorageError::KeyNotProvisioned)
    }

    fn add_granted_keys(&self, node: NodeId, keys: KeyClasses) -> Result<(), StorageError> {
        self.write(node, |r| r.granted_keys = r.granted_keys.union(keys))
    }
}

/// A frame handed to [`RecordingRadio`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    /// Frame bytes.
    pub frame: Vec<u8>,
    /// Destination node.
    pub destination: NodeId,
    /// Options passed with the frame.
    pub options: TxOptions,
}

#[derive(Debug, Default)]
struct RadioState {
    sent: Vec<SentFrame>,
    refusals: VecDeque<RadioError>,
}

/// [`RadioLink`] that records frames. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingRadio {
    state: Arc<Mutex<RadioState>>,
}

impl RecordingRadio {
    /// Radio that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next frame with `error`. Calls stack up in order.
    pub fn reject_next(&self, error: RadioError) {
        self.lock().refusals.push_back(error);
    }

    /// Frames accepted so far.
    pub fn sent(&self) -> Vec<SentFrame> {
        self.lock().sent.clone()
    }

    /// Frames accepted so far, clearing the record.
    pub fn take_sent(&self) -> Vec<SentFrame> {
        std::mem::take(&mut self.lock().sent)
    }

    /// Most recently accepted frame.
    pub fn last(&self) -> Option<SentFrame> {
        self.lock().sent.last().cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RadioState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RadioLink for RecordingRadio {
    fn send_raw_frame(
        &mut self,
        frame: &[u8],
        destination: NodeId,
        options: &TxOptions,
    ) -> Result<(), RadioError> {
        let mut state = self.lock();
        if let Some(error) = state.refusals.pop_front() {
            return Err(error);
        }
        state.sent.push(SentFrame {
            frame: frame.to_vec(),
            destination,
            options: *options,
        });
        Ok(())
    }
}
