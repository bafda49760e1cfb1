//! Tunable timing and capacity settings.
//!
//! Configuration is a typed value the embedding application builds. Defaults
//! come from [`constants`](super::constants).

use std::time::Duration;

use super::constants::*;
use super::error::ControllerError;
use super::types::NodeId;

/// Transmission scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxConfig {
    /// Maximum pending entries.
    pub queue_capacity: usize,
    /// Attempts per entry, including the first one.
    pub retry_limit: u32,
    /// Time the radio gets to report a result.
    pub transmit_timeout: Duration,
    /// First retry delay.
    pub retry_backoff: Duration,
    /// Retry delay cap.
    pub max_retry_backoff: Duration,
    /// Wait per expected response frame.
    pub response_timeout: Duration,
    /// Wait per announced additional frame.
    pub additional_frames_timeout: Duration,
    /// Wait while the protocol stack is sending.
    pub protocol_busy_backoff: Duration,
    /// Wait after foreign routed traffic.
    pub unsolicited_routed_backoff: Duration,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry_limit: DEFAULT_RETRY_LIMIT,
            transmit_timeout: DEFAULT_TRANSMIT_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            max_retry_backoff: MAX_RETRY_BACKOFF,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            additional_frames_timeout: DEFAULT_ADDITIONAL_FRAMES_TIMEOUT,
            protocol_busy_backoff: DEFAULT_PROTOCOL_BUSY_BACKOFF,
            unsolicited_routed_backoff: DEFAULT_UNSOLICITED_ROUTED_BACKOFF,
        }
    }
}

impl TxConfig {
    /// Set the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the attempt limit.
    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    /// Set the transmit timeout.
    pub fn with_transmit_timeout(mut self, timeout: Duration) -> Self {
        self.transmit_timeout = timeout;
        self
    }

    /// Set the initial retry delay.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the per-response wait.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the per-frame wait for announced frames.
    pub fn with_additional_frames_timeout(mut self, timeout: Duration) -> Self {
        self.additional_frames_timeout = timeout;
        self
    }

    /// Set the protocol-busy wait.
    pub fn with_protocol_busy_backoff(mut self, backoff: Duration) -> Self {
        self.protocol_busy_backoff = backoff;
        self
    }

    /// Set the wait after unsolicited routed frames.
    pub fn with_unsolicited_routed_backoff(mut self, backoff: Duration) -> Self {
        self.unsolicited_routed_backoff = backoff;
        self
    }
}

/// Security 0 settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S0Config {
    /// Lifetime of nonces we issue.
    pub nonce_lifetime: Duration,
    /// Lifetime of nonces peers issue to us.
    pub peer_nonce_lifetime: Duration,
    /// Time a peer gets to answer a Nonce Get.
    pub nonce_request_timeout: Duration,
    /// Time a peer gets per inclusion step.
    pub inclusion_step_timeout: Duration,
    /// Time the first half of a sequenced message is kept.
    pub reassembly_timeout: Duration,
    /// Classes we answer with in a Commands Supported Report.
    pub supported_command_classes: Vec<u8>,
}

impl Default for S0Config {
    fn default() -> Self {
        Self {
            nonce_lifetime: DEFAULT_NONCE_LIFETIME,
            peer_nonce_lifetime: DEFAULT_PEER_NONCE_LIFETIME,
            nonce_request_timeout: DEFAULT_NONCE_REQUEST_TIMEOUT,
            inclusion_step_timeout: DEFAULT_INCLUSION_STEP_TIMEOUT,
            reassembly_timeout: DEFAULT_REASSEMBLY_TIMEOUT,
            supported_command_classes: Vec::new(),
        }
    }
}

impl S0Config {
    /// Set the lifetime of issued nonces.
    pub fn with_nonce_lifetime(mut self, lifetime: Duration) -> Self {
        self.nonce_lifetime = lifetime;
        self
    }

    /// Set the Nonce Get timeout.
    pub fn with_nonce_request_timeout(mut self, timeout: Duration) -> Self {
        self.nonce_request_timeout = timeout;
        self
    }

    /// Set the inclusion step timeout.
    pub fn with_inclusion_step_timeout(mut self, timeout: Duration) -> Self {
        self.inclusion_step_timeout = timeout;
        self
    }

    /// Set the classes advertised as securely supported.
    pub fn with_supported_command_classes(mut self, classes: Vec<u8>) -> Self {
        self.supported_command_classes = classes;
        self
    }
}

/// Complete controller configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Our own node id, used as the MAC source.
    pub node_id: NodeId,
    /// Scheduler settings.
    pub tx: TxConfig,
    /// Security 0 settings.
    pub s0: S0Config,
}

impl ControllerConfig {
    /// Defaults for the controller at `node_id`.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            tx: TxConfig::default(),
            s0: S0Config::default(),
        }
    }

    /// Replace the scheduler settings.
    pub fn with_tx(mut self, tx: TxConfig) -> Self {
        self.tx = tx;
        self
    }

    /// Replace the Security 0 settings.
    pub fn with_s0(mut self, s0: S0Config) -> Self {
        self.s0 = s0;
        self
    }

    /// Reject settings the state machines cannot run with.
    pub fn validate(&self) -> Result<(), ControllerError> {
        if !self.node_id.is_classic() {
            return Err(ControllerError::Config(format!(
                "controller node id {} is not a classic node id",
                self.node_id
            )));
        }
        if self.tx.queue_capacity == 0 {
            return Err(ControllerError::Config("queue capacity must be non-zero".into()));
        }
        if self.tx.retry_limit == 0 {
            return Err(ControllerError::Config("retry limit must be at least 1".into()));
        }
        if self.tx.transmit_timeout.is_zero() {
            return Err(ControllerError::Config("transmit timeout must be non-zero".into()));
        }
        if self.s0.nonce_lifetime.is_zero() || self.s0.nonce_request_timeout.is_zero() {
            return Err(ControllerError::Config("nonce timeouts must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::new(NodeId(1))
    }
}
