//! Error types for the controller core.
//!
//! No error in this crate is fatal to the controller: the worst outcome is a
//! failed individual send or inclusion attempt, after which the machine is
//! back to idle and serviceable.

use thiserror::Error;

use super::types::NodeId;

/// Errors of a single outbound frame.
///
/// Returned synchronously from enqueue for rejected entries, and as the
/// completion outcome of accepted ones.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TxError {
    /// Queue capacity exceeded, nothing was enqueued.
    #[error("transmit queue full (capacity {capacity})")]
    QueueFull {
        /// Configured capacity.
        capacity: usize,
    },

    /// Empty payload.
    #[error("empty payload")]
    EmptyPayload,

    /// Payload larger than a single frame allows.
    #[error("payload too large: {len} bytes, limit {max}")]
    PayloadTooLarge {
        /// Payload length.
        len: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// Destination cannot be addressed.
    #[error("invalid destination node {0}")]
    InvalidDestination(NodeId),

    /// Bounded retries used up.
    #[error("retries exhausted after {attempts} attempts")]
    RetryExhausted {
        /// Attempts made.
        attempts: u32,
    },

    /// Aborted through the API.
    #[error("aborted by caller")]
    AbortedByCaller,

    /// Removed by a queue flush.
    #[error("cancelled by queue flush")]
    Cancelled,

    /// Peer did not hand out a nonce in time.
    #[error("no nonce received from node {0}")]
    NonceTimeout(NodeId),

    /// Security 0 cannot be used towards this destination.
    #[error("security 0 unavailable towards node {0}")]
    SecurityUnavailable(NodeId),
}

impl TxError {
    /// Check whether this error is reported synchronously at enqueue time.
    pub fn is_rejected_at_enqueue(&self) -> bool {
        matches!(
            self,
            TxError::QueueFull { .. }
                | TxError::EmptyPayload
                | TxError::PayloadTooLarge { .. }
                | TxError::InvalidDestination(_)
                | TxError::SecurityUnavailable(_)
        )
    }
}

/// Security 0 wire parsing errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Frame is too short.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum expected size.
        expected: usize,
        /// Actual size received.
        actual: usize,
    },

    /// Not a Security command class frame.
    #[error("not a security frame (command class 0x{0:02x})")]
    NotSecurityFrame(u8),

    /// Unknown Security command.
    #[error("unknown security command 0x{0:02x}")]
    UnknownCommand(u8),

    /// Field holds a value the command does not allow.
    #[error("invalid {0} field")]
    InvalidField(&'static str),
}

/// Errors in the Security 0 layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// Frame references a nonce we never issued, that expired, or that was used.
    /// The frame is dropped without side effects.
    #[error("replayed or unknown nonce 0x{nonce_id:02x} from node {node}")]
    ReplayOrUnknownNonce {
        /// Sender.
        node: NodeId,
        /// Receiver nonce identifier carried by the frame.
        nonce_id: u8,
    },

    /// MAC verification failed.
    #[error("authentication failed for frame from node {0}")]
    AuthenticationFailed(NodeId),

    /// Malformed frame.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Storage has no network key.
    #[error("no network key available")]
    MissingNetworkKey,

    /// S0 frame from a node that must use S2.
    #[error("security downgrade: node {0} is S2 capable")]
    SecurityDowngrade(NodeId),

    /// Peer did not answer an inclusion step in time.
    #[error("inclusion of node {node} timed out in state {state}")]
    InclusionTimeout {
        /// Node being included.
        node: NodeId,
        /// State label when the timeout fired.
        state: &'static str,
    },

    /// Another inclusion is running.
    #[error("inclusion of node {0} already in progress")]
    InclusionBusy(NodeId),

    /// Inclusion aborted through the API.
    #[error("inclusion of node {0} aborted")]
    InclusionAborted(NodeId),

    /// Peer does not support scheme 0.
    #[error("node {0} does not support security scheme 0")]
    SchemeNotSupported(NodeId),

    /// Node cannot run S0 (Long Range, invalid id).
    #[error("node {0} cannot use security 0")]
    S0NotSupported(NodeId),

    /// A frame needed to progress inclusion could not be delivered.
    #[error("inclusion frame to node {0} could not be delivered")]
    InclusionFrameFailed(NodeId),
}

impl SecurityError {
    /// Check if this error drops the frame without any response.
    pub fn is_silent_drop(&self) -> bool {
        matches!(
            self,
            SecurityError::ReplayOrUnknownNonce { .. }
                | SecurityError::AuthenticationFailed(_)
                | SecurityError::Frame(_)
                | SecurityError::SecurityDowngrade(_)
        )
    }

    /// Check if this error ends an inclusion attempt.
    pub fn is_inclusion_failure(&self) -> bool {
        matches!(
            self,
            SecurityError::InclusionTimeout { .. }
                | SecurityError::InclusionAborted(_)
                | SecurityError::SchemeNotSupported(_)
                | SecurityError::InclusionFrameFailed(_)
        )
    }
}

/// Errors reported by the storage adapter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Node is not known to storage.
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    /// Key material has not been provisioned.
    #[error("key material not provisioned")]
    KeyNotProvisioned,

    /// Backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors returned by the radio when handing over a frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RadioError {
    /// The protocol stack is sending its own frames.
    #[error("radio busy: protocol stack is sending frames")]
    Busy,

    /// Frame refused by the link layer.
    #[error("frame rejected by link layer")]
    Rejected,

    /// Transport to the radio failed.
    #[error("radio i/o error: {0}")]
    Io(String),
}

/// Top-level controller errors.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Transmission error.
    #[error("transmit error: {0}")]
    Tx(#[from] TxError),

    /// Security error.
    #[error("security error: {0}")]
    Security(#[from] SecurityError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Radio error.
    #[error("radio error: {0}")]
    Radio(#[from] RadioError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Controller task has stopped.
    #[error("controller task stopped")]
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_rejections() {
        assert!(TxError::QueueFull { capacity: 4 }.is_rejected_at_enqueue());
        assert!(TxError::EmptyPayload.is_rejected_at_enqueue());
        assert!(TxError::InvalidDestination(NodeId(0)).is_rejected_at_enqueue());

        assert!(!TxError::RetryExhausted { attempts: 2 }.is_rejected_at_enqueue());
        assert!(!TxError::Cancelled.is_rejected_at_enqueue());
        assert!(!TxError::NonceTimeout(NodeId(3)).is_rejected_at_enqueue());
    }

    #[test]
    fn test_silent_drop_errors() {
        let replay = SecurityError::ReplayOrUnknownNonce {
            node: NodeId(5),
            nonce_id: 0x42,
        };
        assert!(replay.is_silent_drop());
        assert!(SecurityError::AuthenticationFailed(NodeId(5)).is_silent_drop());
        assert!(SecurityError::Frame(FrameError::UnknownCommand(0x11)).is_silent_drop());

        assert!(!SecurityError::MissingNetworkKey.is_silent_drop());
        assert!(!SecurityError::InclusionBusy(NodeId(5)).is_silent_drop());
    }

    #[test]
    fn test_inclusion_failures() {
        let timeout = SecurityError::InclusionTimeout {
            node: NodeId(9),
            state: "KEY_SET_SENT",
        };
        assert!(timeout.is_inclusion_failure());
        assert!(SecurityError::SchemeNotSupported(NodeId(9)).is_inclusion_failure());
        assert!(!SecurityError::AuthenticationFailed(NodeId(9)).is_inclusion_failure());
    }

    #[test]
    fn test_error_display() {
        let err = ControllerError::from(TxError::QueueFull { capacity: 8 });
        assert_eq!(err.to_string(), "transmit error: transmit queue full (capacity 8)");

        let err = SecurityError::ReplayOrUnknownNonce {
            node: NodeId(7),
            nonce_id: 0xab,
        };
        assert_eq!(err.to_string(), "replayed or unknown nonce 0xab from node 7");
    }
}
