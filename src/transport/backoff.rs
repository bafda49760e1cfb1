//! Backoff reasons and their wait policies.
//!
//! Timed reasons wait a configured duration. Watched reasons wait for frames
//! from a specific node: every observed frame counts down the remaining
//! frames and restarts the per-frame timeout, and the wait ends when the
//! count reaches zero or the timeout passes.

use std::fmt;
use std::time::{Duration, Instant};

use crate::core::{NodeId, TxConfig, RETRY_BACKOFF_MULTIPLIER};

/// Why the scheduler holds off transmitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffReason {
    /// The completed session expects `remaining` response frames from `node`.
    CurrentSessionId {
        /// Node the responses come from.
        node: NodeId,
        /// Responses still outstanding.
        remaining: u8,
    },

    /// The application announced `remaining` more frames from `node`.
    ExpectedAdditionalFrames {
        /// Node the frames come from.
        node: NodeId,
        /// Frames still outstanding.
        remaining: u8,
    },

    /// The protocol stack is sending its own frames.
    ProtocolSendingFrames,

    /// A routed frame arrived unsolicited. Its routed ack must get through.
    IncomingUnsolicitedRoutedFrame {
        /// Sender of the routed frame.
        source: NodeId,
    },

    /// Waiting before re-attempting a failed transmission.
    RetryDelay {
        /// Failed attempts so far.
        attempt: u32,
    },
}

impl BackoffReason {
    /// Diagnostic label.
    pub fn label(&self) -> &'static str {
        match self {
            BackoffReason::CurrentSessionId { .. } => "CURRENT_SESSION_ID",
            BackoffReason::ExpectedAdditionalFrames { .. } => "EXPECTED_ADDITIONAL_FRAMES",
            BackoffReason::ProtocolSendingFrames => "PROTOCOL_SENDING_FRAMES",
            BackoffReason::IncomingUnsolicitedRoutedFrame { .. } => {
                "INCOMING_UNSOLICITED_ROUTED_FRAME"
            }
            BackoffReason::RetryDelay { .. } => "RETRY_DELAY",
        }
    }

    /// Node whose frames end this backoff, for watched reasons.
    pub fn watched_node(&self) -> Option<NodeId> {
        match self {
            BackoffReason::CurrentSessionId { node, .. }
            | BackoffReason::ExpectedAdditionalFrames { node, .. } => Some(*node),
            _ => None,
        }
    }

    /// Wait applied when entering this backoff, and again after each
    /// observed frame for watched reasons.
    pub fn wait(&self, config: &TxConfig) -> Duration {
        match self {
            BackoffReason::CurrentSessionId { .. } => config.response_timeout,
            BackoffReason::ExpectedAdditionalFrames { .. } => config.additional_frames_timeout,
            BackoffReason::ProtocolSendingFrames => config.protocol_busy_backoff,
            BackoffReason::IncomingUnsolicitedRoutedFrame { .. } => {
                config.unsolicited_routed_backoff
            }
            BackoffReason::RetryDelay { attempt } => retry_delay(config, *attempt),
        }
    }
}

impl fmt::Display for BackoffReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffReason::CurrentSessionId { node, remaining }
            | BackoffReason::ExpectedAdditionalFrames { node, remaining } => {
                write!(f, "{}(node {}, {} remaining)", self.label(), node, remaining)
            }
            BackoffReason::IncomingUnsolicitedRoutedFrame { source } => {
                write!(f, "{}(from {})", self.label(), source)
            }
            BackoffReason::RetryDelay { attempt } => write!(f, "{}(attempt {})", self.label(), attempt),
            BackoffReason::ProtocolSendingFrames => f.write_str(self.label()),
        }
    }
}

/// Result of feeding an inbound frame to a backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Frame is unrelated to this backoff.
    Ignored,
    /// One awaited frame seen, more outstanding. The deadline moved.
    Extended,
    /// Last awaited frame seen. The backoff is over.
    Satisfied,
}

/// An active backoff: its reason and when it ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    reason: BackoffReason,
    deadline: Instant,
}

impl Backoff {
    /// Enter a backoff at `now` for `reason`.
    pub fn start(reason: BackoffReason, now: Instant, config: &TxConfig) -> Self {
        Self {
            reason,
            deadline: now + reason.wait(config),
        }
    }

    /// Current reason.
    pub fn reason(&self) -> &BackoffReason {
        &self.reason
    }

    /// When the wait ends if nothing is observed.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Check if the deadline has passed.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Feed a frame received from `source`.
    pub fn observe(&mut self, source: NodeId, now: Instant, config: &TxConfig) -> Observation {
        let wait = self.reason.wait(config);
        match &mut self.reason {
            BackoffReason::CurrentSessionId { node, remaining }
            | BackoffReason::ExpectedAdditionalFrames { node, remaining }
                if *node == source =>
            {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    Observation::Satisfied
                } else {
                    self.deadline = now + wait;
                    Observation::Extended
                }
            }
            _ => Observation::Ignored,
        }
    }
}

/// Delay before the next attempt after `attempt` failures.
///
/// Doubles per failure starting from `retry_backoff`, capped at
/// `max_retry_backoff`.
pub fn retry_delay(config: &TxConfig, attempt: u32) -> Duration {
    let mut delay = config.retry_backoff;
    for _ in 1..attempt {
        delay = delay.saturating_mul(RETRY_BACKOFF_MULTIPLIER);
        if delay >= config.max_retry_backoff {
            return config.max_retry_backoff;
        }
    }
    delay.min(config.max_retry_backoff)
}
