//! Transmission state machine.
//!
//! Owns the single transmission session and pulls entries from the
//! [`TxQueue`]. It performs no I/O: every method takes the current instant
//! and returns [`TxAction`]s for the driver to execute.
//!
//! ```text
//!            enqueue / backoff over
//!   IDLE ─────────────────────────────▶ TRANSMISSION_ONGOING
//!    ▲                                     │      │
//!    │ success, no responses expected      │      │ failure (retries left),
//!    │ or final failure / abort            │      │ radio busy, success
//!    │◀────────────────────────────────────┘      │ with responses expected
//!    │                                            ▼
//!    └──────────── backoff over, no session ── BACKOFF
//! ```

use std::fmt;
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use super::backoff::{Backoff, BackoffReason, Observation};
use super::queue::{QueueEntry, TxQueue};
use crate::core::{
    NodeId, RadioError, RxOptions, SessionToken, TxConfig, TxError, TxOptions, TxOutcome,
    MAX_FRAME_PAYLOAD,
};

/// Externally visible state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// No active session.
    Idle,
    /// Frame handed to the radio, awaiting its result.
    TransmissionOngoing,
    /// Waiting before the next attempt or the next dequeue.
    Backoff,
}

impl TxState {
    /// Diagnostic label.
    pub fn label(self) -> &'static str {
        match self {
            TxState::Idle => "IDLE",
            TxState::TransmissionOngoing => "TRANSMISSION_ONGOING",
            TxState::Backoff => "BACKOFF",
        }
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Work for the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxAction {
    /// Hand `frame` to the radio. A refusal goes back through
    /// [`TxProcess::on_send_rejected`].
    Transmit {
        /// Session token.
        token: SessionToken,
        /// Frame bytes.
        frame: Vec<u8>,
        /// Destination node.
        destination: NodeId,
        /// Radio options.
        options: TxOptions,
    },

    /// Entry finished.
    Complete {
        /// Session token.
        token: SessionToken,
        /// Final status.
        outcome: TxOutcome,
    },
}

#[derive(Debug)]
enum Phase {
    Idle,
    Transmitting { deadline: Instant },
    Backoff(Backoff),
}

#[derive(Debug)]
struct TxSession {
    entry: QueueEntry,
    failures: u32,
}

/// Scheduler owning the queue and the single in-flight session.
#[derive(Debug)]
pub struct TxProcess {
    config: TxConfig,
    queue: TxQueue,
    phase: Phase,
    session: Option<TxSession>,
    /// Set while the radio still holds a frame we aborted.
    stale_until: Option<Instant>,
    flush_ongoing: bool,
    last_destination: Option<NodeId>,
}

impl TxProcess {
    /// Create an idle scheduler.
    pub fn new(config: TxConfig) -> Self {
        Self {
            queue: TxQueue::new(config.queue_capacity),
            config,
            phase: Phase::Idle,
            session: None,
            stale_until: None,
            flush_ongoing: false,
            last_destination: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> TxState {
        match self.phase {
            Phase::Idle => TxState::Idle,
            Phase::Transmitting { .. } => TxState::TransmissionOngoing,
            Phase::Backoff(_) => TxState::Backoff,
        }
    }

    /// Reason of the current backoff.
    pub fn backoff_reason(&self) -> Option<&BackoffReason> {
        match &self.phase {
            Phase::Backoff(backoff) => Some(backoff.reason()),
            _ => None,
        }
    }

    /// Token of the active session.
    pub fn active_token(&self) -> Option<SessionToken> {
        self.session.as_ref().map(|s| s.entry.token)
    }

    /// The pending queue.
    pub fn queue(&self) -> &TxQueue {
        &self.queue
    }

    /// Settings in use.
    pub fn config(&self) -> &TxConfig {
        &self.config
    }

    /// Whether a flushed frame is still held by the radio.
    pub fn is_queue_flush_ongoing(&self) -> bool {
        self.flush_ongoing
    }

    /// Earliest instant at which [`on_timeout`](Self::on_timeout) has work.
    pub fn next_deadline(&self) -> Option<Instant> {
        let phase_deadline = match &self.phase {
            Phase::Idle => None,
            Phase::Transmitting { deadline } => Some(*deadline),
            Phase::Backoff(backoff) => Some(backoff.deadline()),
        };
        match (phase_deadline, self.stale_until) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Validate and queue an entry, then dispatch if idle.
    ///
    /// Rejections are synchronous and leave the queue untouched.
    pub fn enqueue(&mut self, entry: QueueEntry, now: Instant) -> Result<Vec<TxAction>, TxError> {
        if entry.payload.is_empty() {
            return Err(TxError::EmptyPayload);
        }
        if entry.payload.len() > MAX_FRAME_PAYLOAD {
            return Err(TxError::PayloadTooLarge {
                len: entry.payload.len(),
                max: MAX_FRAME_PAYLOAD,
            });
        }
        if !entry.destination.is_unicast() && !entry.destination.is_broadcast() {
            return Err(TxError::InvalidDestination(entry.destination));
        }

        debug!(
            token = %entry.token,
            destination = %entry.destination,
            priority = ?entry.priority,
            len = entry.payload.len(),
            "enqueue"
        );
        self.queue.push(entry)?;
        Ok(self.check_queue(now))
    }

    /// Dequeue and transmit the next entry if the radio is free.
    pub fn check_queue(&mut self, now: Instant) -> Vec<TxAction> {
        if !matches!(self.phase, Phase::Idle) || self.session.is_some() {
            return Vec::new();
        }
        if self.stale_until.is_some() {
            trace!("holding queue until aborted frame is released");
            return Vec::new();
        }
        let Some(entry) = self.queue.pop() else {
            return Vec::new();
        };

        self.session = Some(TxSession { entry, failures: 0 });
        self.transmit(now)
    }

    /// Link-layer result of the frame in flight.
    ///
    /// `retry_count` is the number of link-layer retries the radio made and
    /// is only logged.
    pub fn on_transmission_result(&mut self, success: bool, retry_count: u8, now: Instant) -> Vec<TxAction> {
        if !matches!(self.phase, Phase::Transmitting { .. }) {
            if self.stale_until.take().is_some() {
                debug!(success, "aborted frame released by radio");
                self.flush_ongoing = false;
                return self.check_queue(now);
            }
            warn!(state = %self.state(), "transmission result without a frame in flight");
            return Vec::new();
        }

        if success {
            self.on_success(retry_count, now)
        } else {
            self.on_failure(now)
        }
    }

    /// The radio refused the hand-off of the frame in flight.
    pub fn on_send_rejected(&mut self, error: RadioError, now: Instant) -> Vec<TxAction> {
        if !matches!(self.phase, Phase::Transmitting { .. }) {
            return Vec::new();
        }

        match error {
            RadioError::Busy => {
                debug!("protocol stack busy, backing off");
                self.enter_backoff(BackoffReason::ProtocolSendingFrames, now);
                Vec::new()
            }
            other => {
                warn!(error = %other, "radio refused frame");
                self.on_failure(now)
            }
        }
    }

    /// Resolve expired waits.
    pub fn on_timeout(&mut self, now: Instant) -> Vec<TxAction> {
        let mut actions = Vec::new();

        if self.stale_until.is_some_and(|until| now >= until) {
            debug!("aborted frame never reported, releasing queue");
            self.stale_until = None;
            self.flush_ongoing = false;
        }

        let expired = match &self.phase {
            Phase::Idle => None,
            Phase::Transmitting { deadline } => (now >= *deadline).then_some(None),
            Phase::Backoff(backoff) => backoff.is_expired(now).then_some(Some(*backoff.reason())),
        };

        match expired {
            Some(None) => {
                warn!("no transmission result within timeout");
                actions.extend(self.on_failure(now));
            }
            Some(Some(reason)) => {
                debug!(%reason, "backoff over");
                self.phase = Phase::Idle;
                if self.session.is_some() {
                    actions.extend(self.transmit(now));
                }
            }
            None => {}
        }

        actions.extend(self.check_queue(now));
        actions
    }

    /// Look at every inbound frame for backoff decisions.
    pub fn inspect_received_frame(&mut self, source: NodeId, rx: &RxOptions, now: Instant) -> Vec<TxAction> {
        if let Phase::Backoff(backoff) = &mut self.phase {
            let observation = backoff.observe(source, now, &self.config);
            let reason = *backoff.reason();
            return match observation {
                Observation::Satisfied => {
                    debug!(%source, "awaited frames received");
                    self.phase = Phase::Idle;
                    self.check_queue(now)
                }
                Observation::Extended => {
                    trace!(%source, %reason, "awaited frame received");
                    Vec::new()
                }
                Observation::Ignored => Vec::new(),
            };
        }

        let idle = matches!(self.phase, Phase::Idle) && self.session.is_none();
        if idle && rx.routed && !rx.multicast {
            debug!(%source, "unsolicited routed frame, backing off");
            self.enter_backoff(BackoffReason::IncomingUnsolicitedRoutedFrame { source }, now);
        }
        Vec::new()
    }

    /// Announce `count` more frames from the last destination. `0` ends the
    /// wait.
    pub fn set_expected_additional_frames(&mut self, count: u8, now: Instant) -> Vec<TxAction> {
        if self.session.is_some() {
            debug!(count, "session active, ignoring expected frame count");
            return Vec::new();
        }

        if count == 0 {
            let watching = self
                .backoff_reason()
                .is_some_and(|reason| reason.watched_node().is_some());
            if watching {
                self.phase = Phase::Idle;
                return self.check_queue(now);
            }
            return Vec::new();
        }

        let Some(node) = self.last_destination else {
            warn!(count, "no previous destination to expect frames from");
            return Vec::new();
        };
        self.enter_backoff(
            BackoffReason::ExpectedAdditionalFrames {
                node,
                remaining: count,
            },
            now,
        );
        Vec::new()
    }

    /// Abort the active session or backoff.
    pub fn abort_transmission(&mut self, now: Instant) -> Vec<TxAction> {
        let mut actions = self.abort_session(TxError::AbortedByCaller, now);
        actions.extend(self.check_queue(now));
        actions
    }

    /// Abort the active session and cancel every queued entry.
    pub fn flush_queue(&mut self, now: Instant) -> Vec<TxAction> {
        let mut actions = self.abort_session(TxError::AbortedByCaller, now);
        let drained = self.queue.drain_matching(|_| true);
        info!(cancelled = drained.len(), "flushing transmit queue");

        actions.extend(drained.into_iter().map(|entry| TxAction::Complete {
            token: entry.token,
            outcome: Err(TxError::Cancelled),
        }));
        self.flush_ongoing = self.stale_until.is_some();
        actions
    }

    /// Abort or remove one entry.
    pub fn cancel(&mut self, token: SessionToken, now: Instant) -> Vec<TxAction> {
        if self.active_token() == Some(token) {
            return self.abort_transmission(now);
        }
        if self.queue.remove_matching(|entry| entry.token == token) > 0 {
            debug!(%token, "cancelled queued entry");
            return vec![TxAction::Complete {
                token,
                outcome: Err(TxError::AbortedByCaller),
            }];
        }
        Vec::new()
    }

    /// Abort the active entry if it matches `predicate` and remove every
    /// queued entry that does. All of them complete with `error`.
    pub fn cancel_matching<F>(&mut self, predicate: F, error: TxError, now: Instant) -> Vec<TxAction>
    where
        F: Fn(&QueueEntry) -> bool,
    {
        let mut actions = Vec::new();
        if self.session.as_ref().is_some_and(|s| predicate(&s.entry)) {
            actions.extend(self.abort_session(error.clone(), now));
        }

        let drained = self.queue.drain_matching(&predicate);
        if !drained.is_empty() {
            debug!(removed = drained.len(), %error, "cancelled queued entries");
        }
        actions.extend(drained.into_iter().map(|entry| TxAction::Complete {
            token: entry.token,
            outcome: Err(error.clone()),
        }));
        actions.extend(self.check_queue(now));
        actions
    }

    /// Log state, queue depth and backoff.
    pub fn log_state(&self) {
        info!(
            state = %self.state(),
            queue_depth = self.queue.len(),
            active = ?self.active_token(),
            backoff = ?self.backoff_reason(),
            flush_ongoing = self.flush_ongoing,
            "tx process"
        );
    }

    fn transmit(&mut self, now: Instant) -> Vec<TxAction> {
        let Some(session) = &self.session else {
            return Vec::new();
        };
        let entry = &session.entry;
        self.last_destination = Some(entry.destination);
        self.phase = Phase::Transmitting {
            deadline: now + self.config.transmit_timeout,
        };

        debug!(
            token = %entry.token,
            destination = %entry.destination,
            attempt = session.failures + 1,
            "transmitting"
        );
        vec![TxAction::Transmit {
            token: entry.token,
            frame: entry.payload.clone(),
            destination: entry.destination,
            options: TxOptions::for_destination(entry.destination, entry.expected_responses),
        }]
    }

    fn on_success(&mut self, retry_count: u8, now: Instant) -> Vec<TxAction> {
        self.phase = Phase::Idle;
        let Some(session) = self.session.take() else {
            return Vec::new();
        };
        let entry = session.entry;
        debug!(token = %entry.token, retry_count, "transmission succeeded");

        let mut actions = vec![TxAction::Complete {
            token: entry.token,
            outcome: Ok(()),
        }];
        if entry.expected_responses > 0 && entry.destination.is_unicast() {
            self.enter_backoff(
                BackoffReason::CurrentSessionId {
                    node: entry.destination,
                    remaining: entry.expected_responses,
                },
                now,
            );
        } else {
            actions.extend(self.check_queue(now));
        }
        actions
    }

    fn on_failure(&mut self, now: Instant) -> Vec<TxAction> {
        self.phase = Phase::Idle;
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        session.failures += 1;
        let failures = session.failures;

        if failures < self.config.retry_limit {
            debug!(token = %session.entry.token, failures, "transmission failed, retrying");
            self.enter_backoff(BackoffReason::RetryDelay { attempt: failures }, now);
            return Vec::new();
        }

        let token = session.entry.token;
        self.session = None;
        warn!(%token, failures, "retries exhausted");
        let mut actions = vec![TxAction::Complete {
            token,
            outcome: Err(TxError::RetryExhausted { attempts: failures }),
        }];
        actions.extend(self.check_queue(now));
        actions
    }

    fn enter_backoff(&mut self, reason: BackoffReason, now: Instant) {
        trace!(%reason, "entering backoff");
        self.phase = Phase::Backoff(Backoff::start(reason, now, &self.config));
    }

    fn abort_session(&mut self, error: TxError, now: Instant) -> Vec<TxAction> {
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        if let Phase::Transmitting { deadline } = phase {
            self.stale_until = Some(deadline.max(now));
        }

        match self.session.take() {
            Some(session) => {
                info!(token = %session.entry.token, %error, "aborting transmission");
                vec![TxAction::Complete {
                    token: session.entry.token,
                    outcome: Err(error),
                }]
            }
            None => Vec::new(),
        }
    }
}
