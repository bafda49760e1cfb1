//! Interfaces to the collaborators the controller does not own.
//!
//! The radio and the persistent node store live outside this crate. The
//! controller only talks to them through these traits.

use super::error::{RadioError, StorageError};
use super::types::{InclusionProtocol, KeyClasses, NodeId, TxOptions};
use crate::security::NetworkKey;

/// Raw frame output towards the radio.
///
/// Accepting a frame only means the link layer took it. Delivery is reported
/// later through `on_transmission_result`.
///
/// # Requirements
///
/// - MUST return `RadioError::Busy` when the protocol stack is sending its own
///   frames, so the caller backs off instead of counting a failed attempt.
/// - MUST NOT block waiting for the link-layer acknowledgment.
pub trait RadioLink {
    /// Hand `frame` to the link layer.
    fn send_raw_frame(
        &mut self,
        frame: &[u8],
        destination: NodeId,
        options: &TxOptions,
    ) -> Result<(), RadioError>;
}

impl<R: RadioLink + ?Sized> RadioLink for Box<R> {
    fn send_raw_frame(
        &mut self,
        frame: &[u8],
        destination: NodeId,
        options: &TxOptions,
    ) -> Result<(), RadioError> {
        (**self).send_raw_frame(frame, destination, options)
    }
}

/// Node and key store shared by the controller and the embedding application.
///
/// The security layer holds it as `Arc<S>` and reads key material on every
/// use, so a key change in storage is picked up by the next frame.
///
/// Failures are never fatal: callers log them and fall back to "unknown" or
/// "not capable".
///
/// # Example
///
/// ```ignore
/// struct Store { key: [u8; 16] }
///
/// impl ControllerStorage for Store {
///     fn get_granted_keys(&self, _node: NodeId) -> Result<KeyClasses, StorageError> {
///         Ok(KeyClasses::S0)
///     }
///     fn is_node_s2_capable(&self, _node: NodeId) -> Result<bool, StorageError> {
///         Ok(false)
///     }
///     fn set_node_security_capable(&self, _node: NodeId, _capable: bool) -> Result<(), StorageError> {
///         Ok(())
///     }
///     fn get_inclusion_protocol(&self, _node: NodeId) -> Result<InclusionProtocol, StorageError> {
///         Ok(InclusionProtocol::ZWave)
///     }
///     fn get_command_class_version(&self, _node: NodeId, _class: u8) -> Result<u8, StorageError> {
///         Ok(1)
///     }
///     fn s0_network_key(&self) -> Result<NetworkKey, StorageError> {
///         Ok(NetworkKey::new(self.key))
///     }
/// }
/// ```
pub trait ControllerStorage: Send + Sync {
    /// Key classes granted to `node`.
    fn get_granted_keys(&self, node: NodeId) -> Result<KeyClasses, StorageError>;

    /// Whether `node` supports S2 and therefore must not be talked to over S0.
    fn is_node_s2_capable(&self, node: NodeId) -> Result<bool, StorageError>;

    /// Record whether `node` proved it can communicate securely.
    fn set_node_security_capable(&self, node: NodeId, capable: bool) -> Result<(), StorageError>;

    /// Protocol `node` was included with.
    fn get_inclusion_protocol(&self, node: NodeId) -> Result<InclusionProtocol, StorageError>;

    /// Version of `class` implemented by `node`. `0` means not supported.
    fn get_command_class_version(&self, node: NodeId, class: u8) -> Result<u8, StorageError>;

    /// The S0 network key.
    fn s0_network_key(&self) -> Result<NetworkKey, StorageError>;

    /// Grant additional key classes to `node`.
    fn add_granted_keys(&self, node: NodeId, keys: KeyClasses) -> Result<(), StorageError> {
        let _ = (node, keys);
        Ok(())
    }
}
