//! Controller: the transmission scheduler and the Security 0 transport
//! driven against a radio.
//!
//! Every entry point is one discrete step taking `now`. Actions produced by
//! the state machines are executed before the call returns, and results for
//! the application are queued as [`ControllerEvent`]s for
//! [`poll_event`](Controller::poll_event).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::core::{
    ControllerConfig, ControllerError, ControllerStorage, NodeId, Priority, RadioLink, RxOptions,
    SecurityError, SessionToken, TxError, TxOutcome, COMMAND_CLASS_SECURITY,
};
use crate::security::{
    FrameOrigin, InclusionEvent, InclusionState, ReceivedFrame, S0Action, S0Transport,
};
use crate::transport::{QueueEntry, TxAction, TxProcess, TxState};

/// An application frame to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    /// Command bytes.
    pub payload: Vec<u8>,
    /// Destination node.
    pub destination: NodeId,
    /// Queue priority.
    pub priority: Priority,
    /// Wrap in Security 0.
    pub security_required: bool,
    /// Frames the destination will send back.
    pub expected_responses: u8,
}

impl TxRequest {
    /// Plain frame at normal priority.
    pub fn new(payload: Vec<u8>, destination: NodeId) -> Self {
        Self {
            payload,
            destination,
            priority: Priority::Normal,
            security_required: false,
            expected_responses: 0,
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Require Security 0.
    pub fn secure(mut self) -> Self {
        self.security_required = true;
        self
    }

    /// Set the number of expected response frames.
    pub fn with_expected_responses(mut self, count: u8) -> Self {
        self.expected_responses = count;
        self
    }
}

/// Results for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// An enqueued frame finished.
    TxComplete {
        /// Token returned by enqueue.
        token: SessionToken,
        /// Final status.
        outcome: TxOutcome,
    },
    /// A command arrived.
    FrameReceived {
        /// The command.
        frame: ReceivedFrame,
        /// Radio metadata.
        rx: RxOptions,
    },
    /// S0 inclusion finished.
    Inclusion(InclusionEvent),
    /// A security frame was dropped.
    SecurityDrop {
        /// Sender.
        source: NodeId,
        /// Why.
        error: SecurityError,
    },
}

/// The controller core.
pub struct Controller<S, R> {
    config: ControllerConfig,
    tx: TxProcess,
    s0: S0Transport<S>,
    radio: R,
    next_token: u64,
    /// Scheduler tokens of frames emitted by the security layer.
    origins: HashMap<SessionToken, (NodeId, FrameOrigin)>,
    events: VecDeque<ControllerEvent>,
}

impl<S: ControllerStorage, R: RadioLink> Controller<S, R> {
    /// Create a controller.
    pub fn new(config: ControllerConfig, storage: Arc<S>, radio: R) -> Result<Self, ControllerError> {
        config.validate()?;
        let s0 = S0Transport::new(config.node_id, config.s0.clone(), storage);
        Ok(Self::assemble(config, s0, radio))
    }

    /// Create a controller whose nonces come from `rng`.
    pub fn with_rng(
        config: ControllerConfig,
        storage: Arc<S>,
        radio: R,
        rng: StdRng,
    ) -> Result<Self, ControllerError> {
        config.validate()?;
        let s0 = S0Transport::with_rng(config.node_id, config.s0.clone(), storage, rng);
        Ok(Self::assemble(config, s0, radio))
    }

    fn assemble(config: ControllerConfig, s0: S0Transport<S>, radio: R) -> Self {
        Self {
            tx: TxProcess::new(config.tx.clone()),
            config,
            s0,
            radio,
            next_token: 1,
            origins: HashMap::new(),
            events: VecDeque::new(),
        }
    }

    /// Our node id.
    pub fn node_id(&self) -> NodeId {
        self.config.node_id
    }

    /// The radio.
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// The transmission scheduler.
    pub fn tx(&self) -> &TxProcess {
        &self.tx
    }

    /// The Security 0 transport.
    pub fn s0(&self) -> &S0Transport<S> {
        &self.s0
    }

    /// Scheduler state.
    pub fn state(&self) -> TxState {
        self.tx.state()
    }

    /// Inclusion progress.
    pub fn inclusion_state(&self) -> InclusionState {
        self.s0.inclusion_state()
    }

    /// Whether a flushed frame is still held by the radio.
    pub fn is_queue_flush_ongoing(&self) -> bool {
        self.tx.is_queue_flush_ongoing()
    }

    /// Earliest instant at which [`on_timeout`](Self::on_timeout) has work.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.tx.next_deadline(), self.s0.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Next result for the application.
    pub fn poll_event(&mut self) -> Option<ControllerEvent> {
        self.events.pop_front()
    }

    /// Queue `payload` for `destination`.
    pub fn enqueue(
        &mut self,
        payload: Vec<u8>,
        destination: NodeId,
        priority: Priority,
        security_required: bool,
        now: Instant,
    ) -> Result<SessionToken, TxError> {
        let mut request = TxRequest::new(payload, destination).with_priority(priority);
        request.security_required = security_required;
        self.submit(request, now)
    }

    /// Queue a request. Rejections are synchronous and nothing is queued.
    ///
    /// Secure payloads still waiting for a nonce count against the queue
    /// capacity.
    pub fn submit(&mut self, request: TxRequest, now: Instant) -> Result<SessionToken, TxError> {
        let capacity = self.tx.queue().capacity();
        if self.tx.queue().len() + self.s0.total_pending() >= capacity {
            return Err(TxError::QueueFull { capacity });
        }

        let token = self.allocate_token();
        if request.security_required {
            let actions = self.s0.send_data(
                token,
                request.payload,
                request.destination,
                request.priority,
                request.expected_responses,
                now,
            )?;
            let tx_actions = self.apply_s0(actions, RxOptions::default(), now);
            self.execute(tx_actions, now);
        } else {
            let entry = QueueEntry::new(token, request.payload, request.destination, request.priority)
                .with_expected_responses(request.expected_responses);
            let actions = self.tx.enqueue(entry, now)?;
            self.execute(actions, now);
        }
        Ok(token)
    }

    /// Abort the frame in flight.
    pub fn abort_transmission(&mut self, now: Instant) {
        let actions = self.tx.abort_transmission(now);
        self.execute(actions, now);
    }

    /// Abort or remove one frame. Returns false if `token` is unknown or
    /// already finished.
    pub fn cancel(&mut self, token: SessionToken, now: Instant) -> bool {
        if let Some(action) = self.s0.abort_send(token) {
            let mut tx_actions = self.apply_s0(vec![action], RxOptions::default(), now);
            tx_actions.extend(self.discard_idle_nonce_requests(now));
            self.execute(tx_actions, now);
            return true;
        }

        let actions = self.tx.cancel(token, now);
        if actions.is_empty() {
            return false;
        }
        self.execute(actions, now);
        true
    }

    /// Abort the frame in flight and cancel everything pending.
    pub fn flush_queue(&mut self, now: Instant) {
        let actions = self.s0.flush(now);
        let tx_actions = self.apply_s0(actions, RxOptions::default(), now);
        self.execute(tx_actions, now);

        let actions = self.tx.flush_queue(now);
        self.execute(actions, now);
    }

    /// Announce `count` more frames from the last destination.
    pub fn set_expected_additional_frames(&mut self, count: u8, now: Instant) {
        let actions = self.tx.set_expected_additional_frames(count, now);
        self.execute(actions, now);
    }

    /// Begin S0 inclusion of `node`.
    pub fn start_s0_inclusion(&mut self, node: NodeId, now: Instant) -> Result<(), SecurityError> {
        let actions = self.s0.start_inclusion(node, now)?;
        let tx_actions = self.apply_s0(actions, RxOptions::default(), now);
        self.execute(tx_actions, now);
        Ok(())
    }

    /// Abort the running S0 inclusion.
    pub fn abort_s0_inclusion(&mut self, now: Instant) {
        let actions = self.s0.abort_inclusion(now);
        let tx_actions = self.apply_s0(actions, RxOptions::default(), now);
        self.execute(tx_actions, now);
    }

    /// Inbound frame from the radio.
    pub fn on_frame_received(&mut self, raw: &[u8], source: NodeId, rx: RxOptions, now: Instant) {
        if raw.first() == Some(&COMMAND_CLASS_SECURITY) {
            match self.s0.on_frame_received(raw, source, now) {
                Ok(actions) => {
                    let tx_actions = self.apply_s0(actions, rx, now);
                    self.execute(tx_actions, now);
                }
                Err(error) => {
                    if error.is_silent_drop() {
                        debug!(%source, %error, "security frame dropped");
                    } else {
                        warn!(%source, %error, "security frame dropped");
                    }
                    self.events.push_back(ControllerEvent::SecurityDrop { source, error });
                }
            }
        } else {
            self.events.push_back(ControllerEvent::FrameReceived {
                frame: ReceivedFrame {
                    source,
                    payload: raw.to_vec(),
                    secure: false,
                },
                rx,
            });
        }

        let actions = self.tx.inspect_received_frame(source, &rx, now);
        self.execute(actions, now);
    }

    /// Link-layer result of the frame in flight.
    pub fn on_transmission_result(&mut self, success: bool, retry_count: u8, now: Instant) {
        let actions = self.tx.on_transmission_result(success, retry_count, now);
        self.execute(actions, now);
    }

    /// Resolve expired waits.
    pub fn on_timeout(&mut self, now: Instant) {
        let actions = self.s0.on_timeout(now);
        let tx_actions = self.apply_s0(actions, RxOptions::default(), now);
        self.execute(tx_actions, now);

        let actions = self.tx.on_timeout(now);
        self.execute(actions, now);
    }

    /// Log scheduler and inclusion state.
    pub fn log_state(&self) {
        self.tx.log_state();
        info!(
            inclusion = %self.s0.inclusion_state(),
            security_frames_in_flight = self.origins.len(),
            pending_events = self.events.len(),
            "controller"
        );
    }

    fn allocate_token(&mut self) -> SessionToken {
        let token = SessionToken(self.next_token);
        self.next_token += 1;
        token
    }

    /// Hand security-layer output to the scheduler and the event queue.
    fn apply_s0(&mut self, actions: Vec<S0Action>, rx: RxOptions, now: Instant) -> Vec<TxAction> {
        let mut work: VecDeque<S0Action> = actions.into();
        let mut tx_actions = Vec::new();

        while let Some(action) = work.pop_front() {
            match action {
                S0Action::Send(frame) => {
                    let token = match frame.origin {
                        FrameOrigin::Application(token) => token,
                        _ => self.allocate_token(),
                    };
                    let destination = frame.destination;
                    let origin = frame.origin;
                    self.origins.insert(token, (destination, origin));

                    let entry = QueueEntry::new(token, frame.payload, destination, frame.priority)
                        .with_expected_responses(frame.expected_responses);
                    match self.tx.enqueue(entry, now) {
                        Ok(actions) => tx_actions.extend(actions),
                        Err(error) => {
                            warn!(%destination, ?origin, %error, "security frame not queued");
                            self.origins.remove(&token);
                            if let FrameOrigin::Application(token) = origin {
                                self.events.push_back(ControllerEvent::TxComplete {
                                    token,
                                    outcome: Err(error),
                                });
                            }
                            work.extend(self.s0.on_send_complete(destination, origin, false, now));
                        }
                    }
                }
                S0Action::Complete { token, outcome } => {
                    self.events.push_back(ControllerEvent::TxComplete { token, outcome });
                }
                S0Action::Deliver(frame) => {
                    self.events.push_back(ControllerEvent::FrameReceived { frame, rx });
                }
                S0Action::Inclusion(event) => {
                    if let InclusionEvent::Failed { node, .. } = &event {
                        let node = *node;
                        tx_actions.extend(self.discard_security_frames(
                            node,
                            |origin| matches!(origin, FrameOrigin::Inclusion | FrameOrigin::NonceGet),
                            now,
                        ));
                    }
                    self.events.push_back(ControllerEvent::Inclusion(event));
                }
            }
        }
        tx_actions
    }

    /// Cancel scheduler entries the security layer emitted for `node` whose
    /// origin matches `stale`. Their completions still reach the security
    /// layer through [`execute`](Self::execute).
    fn discard_security_frames(
        &mut self,
        node: NodeId,
        stale: impl Fn(FrameOrigin) -> bool,
        now: Instant,
    ) -> Vec<TxAction> {
        let tokens: HashSet<SessionToken> = self
            .origins
            .iter()
            .filter(|(_, (destination, origin))| *destination == node && stale(*origin))
            .map(|(token, _)| *token)
            .collect();
        if tokens.is_empty() {
            return Vec::new();
        }

        debug!(%node, frames = tokens.len(), "discarding security frames");
        self.tx
            .cancel_matching(|entry| tokens.contains(&entry.token), TxError::Cancelled, now)
    }

    /// Drop Nonce Gets to peers that no longer have anything to send.
    fn discard_idle_nonce_requests(&mut self, now: Instant) -> Vec<TxAction> {
        let idle: HashSet<NodeId> = self
            .origins
            .values()
            .filter(|(peer, origin)| *origin == FrameOrigin::NonceGet && self.s0.pending_count(*peer) == 0)
            .map(|(peer, _)| *peer)
            .collect();

        let mut actions = Vec::new();
        for peer in idle {
            actions.extend(self.discard_security_frames(peer, |origin| origin == FrameOrigin::NonceGet, now));
        }
        actions
    }

    /// Execute scheduler output against the radio.
    fn execute(&mut self, actions: Vec<TxAction>, now: Instant) {
        let mut work: VecDeque<TxAction> = actions.into();

        while let Some(action) = work.pop_front() {
            match action {
                TxAction::Transmit {
                    token,
                    frame,
                    destination,
                    options,
                } => {
                    if self.tx.active_token() != Some(token) {
                        debug!(%token, "frame cancelled before hand-off");
                        continue;
                    }
                    if let Err(error) = self.radio.send_raw_frame(&frame, destination, &options) {
                        debug!(%token, %error, "radio refused frame");
                        work.extend(self.tx.on_send_rejected(error, now));
                    }
                }
                TxAction::Complete { token, outcome } => match self.origins.remove(&token) {
                    Some((destination, origin)) => {
                        let s0_actions = self.s0.on_send_complete(destination, origin, outcome.is_ok(), now);
                        if let FrameOrigin::Application(_) = origin {
                            self.events.push_back(ControllerEvent::TxComplete { token, outcome });
                        }
                        work.extend(self.apply_s0(s0_actions, RxOptions::default(), now));
                    }
                    None => {
                        self.events.push_back(ControllerEvent::TxComplete { token, outcome });
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::{RadioError, TxConfig};
    use crate::testing::{MemoryStorage, RecordingRadio};

    fn controller() -> Controller<MemoryStorage, RecordingRadio> {
        let storage = Arc::new(MemoryStorage::with_network_key([0x42; 16]));
        let config = ControllerConfig::new(NodeId(1)).with_tx(TxConfig::default().with_queue_capacity(3));
        Controller::new(config, storage, RecordingRadio::new()).unwrap()
    }

    fn completions(controller: &mut Controller<MemoryStorage, RecordingRadio>) -> Vec<(SessionToken, TxOutcome)> {
        std::iter::from_fn(|| controller.poll_event())
            .filter_map(|event| match event {
                ControllerEvent::TxComplete { token, outcome } => Some((token, outcome)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_plain_frame_round_trip() {
        let mut controller = controller();
        let now = Instant::now();

        let token = controller
            .enqueue(vec![0x25, 0x01, 0xff], NodeId(5), Priority::Normal, false, now)
            .unwrap();
        let sent = controller.radio().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].frame, vec![0x25, 0x01, 0xff]);
        assert_eq!(sent[0].destination, NodeId(5));

        controller.on_transmission_result(true, 0, now);
        assert_eq!(completions(&mut controller), vec![(token, Ok(()))]);
        assert_eq!(controller.state(), TxState::Idle);
    }

    #[test]
    fn test_queue_full_is_synchronous() {
        let mut controller = controller();
        let now = Instant::now();

        for _ in 0..4 {
            controller
                .enqueue(vec![0x20, 0x02], NodeId(5), Priority::Normal, false, now)
                .unwrap();
        }
        let err = controller
            .enqueue(vec![0x20, 0x02], NodeId(5), Priority::Normal, false, now)
            .unwrap_err();
        assert_eq!(err, TxError::QueueFull { capacity: 3 });
        assert!(err.is_rejected_at_enqueue());
    }

    #[test]
    fn test_secure_payloads_count_against_capacity() {
        let mut controller = controller();
        let now = Instant::now();

        for _ in 0..3 {
            controller
                .enqueue(vec![0x25, 0x01, 0xff], NodeId(5), Priority::Normal, true, now)
                .unwrap();
        }
        assert_eq!(controller.s0().pending_count(NodeId(5)), 3);
        assert!(controller.tx().queue().is_empty());

        let err = controller
            .enqueue(vec![0x25, 0x01, 0x00], NodeId(5), Priority::Normal, true, now)
            .unwrap_err();
        assert_eq!(err, TxError::QueueFull { capacity: 3 });
        assert_eq!(
            controller
                .enqueue(vec![0x20, 0x02], NodeId(6), Priority::Normal, false, now)
                .unwrap_err(),
            TxError::QueueFull { capacity: 3 }
        );
        assert_eq!(controller.s0().pending_count(NodeId(5)), 3);
        assert_eq!(controller.radio().sent().len(), 1);
        assert!(completions(&mut controller).is_empty());
    }

    #[test]
    fn test_secure_frame_to_long_range_node_rejected() {
        let mut controller = controller();
        let err = controller
            .enqueue(vec![0x25, 0x01], NodeId(300), Priority::Normal, true, Instant::now())
            .unwrap_err();
        assert_eq!(err, TxError::SecurityUnavailable(NodeId(300)));
        assert!(controller.radio().sent().is_empty());
    }

    #[test]
    fn test_radio_busy_retries_after_backoff() {
        let mut controller = controller();
        let now = Instant::now();
        controller.radio().reject_next(RadioError::Busy);

        controller
            .enqueue(vec![0x25, 0x01], NodeId(5), Priority::Normal, false, now)
            .unwrap();
        assert!(controller.radio().sent().is_empty());
        assert_eq!(controller.state(), TxState::Backoff);

        let deadline = controller.next_deadline().unwrap();
        controller.on_timeout(deadline);
        assert_eq!(controller.radio().sent().len(), 1);
        assert_eq!(controller.state(), TxState::TransmissionOngoing);
    }

    #[test]
    fn test_plain_frames_are_delivered() {
        let mut controller = controller();
        let rx = RxOptions {
            rssi: Some(-60),
            ..RxOptions::default()
        };
        controller.on_frame_received(&[0x25, 0x03, 0x00], NodeId(9), rx, Instant::now());

        assert_eq!(
            controller.poll_event(),
            Some(ControllerEvent::FrameReceived {
                frame: ReceivedFrame {
                    source: NodeId(9),
                    payload: vec![0x25, 0x03, 0x00],
                    secure: false,
                },
                rx,
            })
        );
    }

    #[test]
    fn test_malformed_security_frame_dropped() {
        let mut controller = controller();
        controller.on_frame_received(&[0x98, 0x81, 0x00], NodeId(9), RxOptions::default(), Instant::now());

        assert!(matches!(
            controller.poll_event(),
            Some(ControllerEvent::SecurityDrop {
                source: NodeId(9),
                error: SecurityError::Frame(_),
            })
        ));
    }

    #[test]
    fn test_nonce_get_is_answered_first() {
        let mut controller = controller();
        let now = Instant::now();
        controller
            .enqueue(vec![0x20, 0x01, 0x00], NodeId(5), Priority::High, false, now)
            .unwrap();
        controller
            .enqueue(vec![0x20, 0x01, 0xff], NodeId(6), Priority::High, false, now)
            .unwrap();

        controller.on_frame_received(&[0x98, 0x40], NodeId(7), RxOptions::default(), now);
        controller.on_transmission_result(true, 0, now);

        let sent = controller.radio().sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].destination, NodeId(7));
        assert_eq!(sent[1].frame[..2], [0x98, 0x80]);
        assert!(controller.s0().issued_nonces().has_unused(NodeId(7), now));
    }

    #[test]
    fn test_cancel_pending_secure_payload() {
        let mut controller = controller();
        let now = Instant::now();
        controller
            .enqueue(vec![0x25, 0x01], NodeId(5), Priority::Normal, true, now)
            .unwrap();
        let second = controller
            .enqueue(vec![0x25, 0x00], NodeId(5), Priority::Normal, true, now)
            .unwrap();

        assert!(controller.cancel(second, now));
        assert!(!controller.cancel(second, now));
        assert_eq!(
            completions(&mut controller),
            vec![(second, Err(TxError::AbortedByCaller))]
        );
        assert_eq!(controller.s0().pending_count(NodeId(5)), 1);
    }

    #[test]
    fn test_cancel_drops_nonce_get_nobody_needs() {
        let mut controller = controller();
        let now = Instant::now();
        controller
            .enqueue(vec![0x25, 0x01, 0xff], NodeId(9), Priority::Normal, false, now)
            .unwrap();
        let token = controller
            .enqueue(vec![0x25, 0x01], NodeId(5), Priority::Normal, true, now)
            .unwrap();
        assert_eq!(controller.tx().queue().len(), 1);

        assert!(controller.cancel(token, now));
        assert!(controller.tx().queue().is_empty());
        assert_eq!(controller.s0().next_deadline(), None);

        controller.on_transmission_result(true, 0, now);
        let sent = controller.radio().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].destination, NodeId(9));
        assert_eq!(controller.state(), TxState::Idle);
    }

    #[test]
    fn test_aborted_inclusion_frames_never_transmitted() {
        let mut controller = controller();
        let now = Instant::now();
        let plain = controller
            .enqueue(vec![0x25, 0x01, 0xff], NodeId(9), Priority::Normal, false, now)
            .unwrap();

        controller.start_s0_inclusion(NodeId(5), now).unwrap();
        assert_eq!(controller.tx().queue().len(), 1);
        controller.abort_s0_inclusion(now);
        assert!(controller.tx().queue().is_empty());

        controller.on_transmission_result(true, 0, now);
        let sent = controller.radio().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].destination, NodeId(9));

        let events: Vec<_> = std::iter::from_fn(|| controller.poll_event()).collect();
        assert_eq!(
            events,
            vec![
                ControllerEvent::Inclusion(InclusionEvent::Failed {
                    node: NodeId(5),
                    error: SecurityError::InclusionAborted(NodeId(5)),
                }),
                ControllerEvent::TxComplete {
                    token: plain,
                    outcome: Ok(()),
                },
            ]
        );

        controller.start_s0_inclusion(NodeId(5), now).unwrap();
        assert_eq!(controller.radio().last().unwrap().frame, vec![0x98, 0x04, 0x00]);
    }

    #[test]
    fn test_nonce_timeout_fails_pending_payloads() {
        let mut controller = controller();
        let now = Instant::now();
        let token = controller
            .enqueue(vec![0x25, 0x01], NodeId(5), Priority::Normal, true, now)
            .unwrap();
        controller.on_transmission_result(true, 0, now);

        controller.on_timeout(now + Duration::from_secs(10));
        assert_eq!(
            completions(&mut controller),
            vec![(token, Err(TxError::NonceTimeout(NodeId(5))))]
        );
        assert_eq!(controller.s0().pending_count(NodeId(5)), 0);
    }
}
