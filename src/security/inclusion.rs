//! S0 key exchange, includer role.
//!
//! ```text
//! IDLE ──start──▶ SCHEME_GET_SENT ──Scheme Report──▶ KEY_SET_SENT
//!   ▲                                                     │
//!   │ timeout / abort / failure            Network Key Verify
//!   │                                                     ▼
//!   └──────────── COMPLETE ◀──Commands Supported Report── KEY_VERIFIED
//! ```
//!
//! This type only tracks state and deadlines. The S0 transport sends the
//! frames each step asks for.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::core::{NodeId, SecurityError};

/// Inclusion progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InclusionState {
    /// No inclusion running.
    #[default]
    Idle,
    /// Scheme Get sent, Scheme Report awaited.
    SchemeGetSent,
    /// Network Key Set sent, Network Key Verify awaited.
    KeySetSent,
    /// Key verified, Commands Supported Report awaited.
    KeyVerified,
    /// Last inclusion finished.
    Complete,
}

impl InclusionState {
    /// Diagnostic label.
    pub fn label(self) -> &'static str {
        match self {
            InclusionState::Idle => "IDLE",
            InclusionState::SchemeGetSent => "SCHEME_GET_SENT",
            InclusionState::KeySetSent => "KEY_SET_SENT",
            InclusionState::KeyVerified => "KEY_VERIFIED",
            InclusionState::Complete => "COMPLETE",
        }
    }

    /// Waiting on the peer.
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            InclusionState::SchemeGetSent | InclusionState::KeySetSent | InclusionState::KeyVerified
        )
    }
}

impl fmt::Display for InclusionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What the transport must do after an inclusion input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InclusionStep {
    /// Input does not belong to the running inclusion.
    Ignore,
    /// Send the Network Key Set under the temporary key.
    SendNetworkKeySet,
    /// Send Commands Supported Get under the network key.
    SendCommandsSupportedGet,
    /// More reports are coming, keep waiting.
    Wait,
    /// Inclusion finished.
    Complete {
        /// Node included.
        node: NodeId,
        /// Classes the node supports securely.
        supported: Vec<u8>,
        /// Classes the node controls securely.
        controlled: Vec<u8>,
    },
    /// Inclusion failed and is back to idle.
    Fail {
        /// Node that was being included.
        node: NodeId,
        /// Cause.
        error: SecurityError,
    },
}

/// Includer-side inclusion state machine.
#[derive(Debug)]
pub struct S0Inclusion {
    state: InclusionState,
    node: Option<NodeId>,
    deadline: Option<Instant>,
    step_timeout: Duration,
    supported: Vec<u8>,
    controlled: Vec<u8>,
}

impl S0Inclusion {
    /// Idle machine with the given per-step timeout.
    pub fn new(step_timeout: Duration) -> Self {
        Self {
            state: InclusionState::Idle,
            node: None,
            deadline: None,
            step_timeout,
            supported: Vec::new(),
            controlled: Vec::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> InclusionState {
        self.state
    }

    /// Node being (or last) included.
    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    /// Deadline of the current step.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Begin including `node`. The caller sends the Scheme Get.
    pub fn start(&mut self, node: NodeId, now: Instant) -> Result<(), SecurityError> {
        if self.state.is_in_progress() {
            return Err(SecurityError::InclusionBusy(self.node.unwrap_or(node)));
        }

        info!(%node, "starting S0 inclusion");
        self.node = Some(node);
        self.supported.clear();
        self.controlled.clear();
        self.advance(InclusionState::SchemeGetSent, now);
        Ok(())
    }

    /// Scheme Report from `node`.
    pub fn on_scheme_report(&mut self, node: NodeId, schemes: u8, now: Instant) -> InclusionStep {
        if !self.is_waiting(node, InclusionState::SchemeGetSent) {
            return InclusionStep::Ignore;
        }
        // bit 0 set means scheme 0 is not supported
        if schemes & 0x01 != 0 {
            return self.fail(SecurityError::SchemeNotSupported(node));
        }
        self.advance(InclusionState::KeySetSent, now);
        InclusionStep::SendNetworkKeySet
    }

    /// Authenticated Network Key Verify from `node`.
    pub fn on_network_key_verify(&mut self, node: NodeId, now: Instant) -> InclusionStep {
        if !self.is_waiting(node, InclusionState::KeySetSent) {
            return InclusionStep::Ignore;
        }
        self.advance(InclusionState::KeyVerified, now);
        InclusionStep::SendCommandsSupportedGet
    }

    /// Authenticated Commands Supported Report from `node`.
    pub fn on_commands_supported_report(
        &mut self,
        node: NodeId,
        reports_to_follow: u8,
        supported: &[u8],
        controlled: &[u8],
        now: Instant,
    ) -> InclusionStep {
        if !self.is_waiting(node, InclusionState::KeyVerified) {
            return InclusionStep::Ignore;
        }
        self.supported.extend_from_slice(supported);
        self.controlled.extend_from_slice(controlled);

        if reports_to_follow > 0 {
            self.deadline = Some(now + self.step_timeout);
            return InclusionStep::Wait;
        }

        info!(%node, "S0 inclusion complete");
        self.state = InclusionState::Complete;
        self.deadline = None;
        InclusionStep::Complete {
            node,
            supported: std::mem::take(&mut self.supported),
            controlled: std::mem::take(&mut self.controlled),
        }
    }

    /// Fail the current step if its deadline passed.
    pub fn on_timeout(&mut self, now: Instant) -> InclusionStep {
        match (self.node, self.deadline) {
            (Some(node), Some(deadline)) if now >= deadline => {
                warn!(%node, state = %self.state, "inclusion step timed out");
                self.fail(SecurityError::InclusionTimeout {
                    node,
                    state: self.state.label(),
                })
            }
            _ => InclusionStep::Ignore,
        }
    }

    /// Abort through the API.
    pub fn abort(&mut self) -> InclusionStep {
        match self.node {
            Some(node) if self.state.is_in_progress() => self.fail(SecurityError::InclusionAborted(node)),
            _ => InclusionStep::Ignore,
        }
    }

    /// A frame the inclusion depends on could not be delivered to `node`.
    pub fn on_frame_failed(&mut self, node: NodeId) -> InclusionStep {
        if self.state.is_in_progress() && self.node == Some(node) {
            self.fail(SecurityError::InclusionFrameFailed(node))
        } else {
            InclusionStep::Ignore
        }
    }

    /// Whether `node` is being included right now.
    pub fn is_including(&self, node: NodeId) -> bool {
        self.state.is_in_progress() && self.node == Some(node)
    }

    fn is_waiting(&self, node: NodeId, state: InclusionState) -> bool {
        self.state == state && self.node == Some(node)
    }

    fn advance(&mut self, state: InclusionState, now: Instant) {
        debug!(from = %self.state, to = %state, "inclusion state");
        self.state = state;
        self.deadline = Some(now + self.step_timeout);
    }

    /// Fail the running inclusion with `error` and return to idle.
    pub fn fail(&mut self, error: SecurityError) -> InclusionStep {
        let node = self.node.unwrap_or(NodeId(0));
        warn!(%node, %error, "S0 inclusion failed");
        self.state = InclusionState::Idle;
        self.deadline = None;
        self.supported.clear();
        self.controlled.clear();
        InclusionStep::Fail { node, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: Duration = Duration::from_secs(10);

    fn at_key_set_sent(node: NodeId, now: Instant) -> S0Inclusion {
        let mut inclusion = S0Inclusion::new(STEP);
        inclusion.start(node, now).unwrap();
        assert_eq!(inclusion.on_scheme_report(node, 0x00, now), InclusionStep::SendNetworkKeySet);
        inclusion
    }

    #[test]
    fn test_full_handshake() {
        let now = Instant::now();
        let node = NodeId(6);
        let mut inclusion = at_key_set_sent(node, now);
        assert_eq!(inclusion.state(), InclusionState::KeySetSent);

        assert_eq!(
            inclusion.on_network_key_verify(node, now),
            InclusionStep::SendCommandsSupportedGet
        );
        assert_eq!(
            inclusion.on_commands_supported_report(node, 1, &[0x25], &[], now),
            InclusionStep::Wait
        );
        assert_eq!(
            inclusion.on_commands_supported_report(node, 0, &[0x62], &[0x20], now),
            InclusionStep::Complete {
                node,
                supported: vec![0x25, 0x62],
                controlled: vec![0x20],
            }
        );
        assert_eq!(inclusion.state(), InclusionState::Complete);
        assert_eq!(inclusion.deadline(), None);
    }

    #[test]
    fn test_timeout_in_key_set_sent() {
        let now = Instant::now();
        let node = NodeId(6);
        let mut inclusion = at_key_set_sent(node, now);

        assert_eq!(inclusion.on_timeout(now + STEP - Duration::from_millis(1)), InclusionStep::Ignore);
        assert_eq!(
            inclusion.on_timeout(now + STEP),
            InclusionStep::Fail {
                node,
                error: SecurityError::InclusionTimeout {
                    node,
                    state: "KEY_SET_SENT"
                },
            }
        );
        assert_eq!(inclusion.state(), InclusionState::Idle);
        assert!(inclusion.start(node, now + STEP).is_ok());
    }

    #[test]
    fn test_scheme_not_supported() {
        let now = Instant::now();
        let mut inclusion = S0Inclusion::new(STEP);
        inclusion.start(NodeId(3), now).unwrap();

        let step = inclusion.on_scheme_report(NodeId(3), 0x01, now);
        assert!(matches!(
            step,
            InclusionStep::Fail {
                error: SecurityError::SchemeNotSupported(_),
                ..
            }
        ));
        assert_eq!(inclusion.state(), InclusionState::Idle);
    }

    #[test]
    fn test_busy_and_foreign_frames() {
        let now = Instant::now();
        let mut inclusion = S0Inclusion::new(STEP);
        inclusion.start(NodeId(3), now).unwrap();

        assert_eq!(
            inclusion.start(NodeId(4), now).unwrap_err(),
            SecurityError::InclusionBusy(NodeId(3))
        );
        assert_eq!(inclusion.on_scheme_report(NodeId(4), 0, now), InclusionStep::Ignore);
        assert_eq!(inclusion.on_network_key_verify(NodeId(3), now), InclusionStep::Ignore);
    }

    #[test]
    fn test_abort_and_frame_failure() {
        let now = Instant::now();
        let mut inclusion = S0Inclusion::new(STEP);
        assert_eq!(inclusion.abort(), InclusionStep::Ignore);

        inclusion.start(NodeId(3), now).unwrap();
        assert!(matches!(inclusion.abort(), InclusionStep::Fail { .. }));

        inclusion.start(NodeId(3), now).unwrap();
        assert_eq!(
            inclusion.on_frame_failed(NodeId(3)),
            InclusionStep::Fail {
                node: NodeId(3),
                error: SecurityError::InclusionFrameFailed(NodeId(3)),
            }
        );
    }
}
