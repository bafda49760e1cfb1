//! Security 0 transport.
//!
//! Wraps outbound commands in Message Encapsulation frames, unwraps inbound
//! ones, runs the nonce exchange and drives the inclusion handshake. Like the
//! transmission scheduler it performs no I/O and returns [`S0Action`]s.
//!
//! Outbound flow for a peer without a stored nonce:
//!
//! ```text
//!  send_data(P1), send_data(P2)
//!        │
//!        ├── Send(Nonce Get, Control priority)
//!        │                      ◀── Nonce Report
//!        ├── Send(P1 as 0xC1, asks for the next nonce)
//!        │                      ◀── Nonce Report
//!        └── Send(P2 as 0x81)
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, trace, warn};

use super::cipher::{message_iv, open, seal};
use super::frame::{EncapsulatedFrame, SecurityCommand, SequenceInfo};
use super::inclusion::{InclusionState, InclusionStep, S0Inclusion};
use super::keys::NetworkKey;
use super::nonce::{Nonce, NonceTable};
use crate::core::{
    ControllerStorage, InclusionProtocol, KeyClasses, NodeId, Priority, S0Config, SecurityError,
    SessionToken, TxError, TxOutcome, COMMAND_CLASS_SECURITY, S0_MAX_SINGLE_FRAME_PAYLOAD,
    S0_SCHEME_0,
};

/// Who a frame handed to the scheduler belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameOrigin {
    /// Encrypted application payload.
    Application(SessionToken),
    /// Nonce request on behalf of pending payloads.
    NonceGet,
    /// Nonce handed to a peer.
    NonceReport,
    /// Inclusion handshake frame.
    Inclusion,
    /// Answer to a peer's Commands Supported Get.
    CommandsReport,
}

/// A frame for the transmission scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Destination node.
    pub destination: NodeId,
    /// Frame bytes.
    pub payload: Vec<u8>,
    /// Queue priority.
    pub priority: Priority,
    /// Frames the destination will send back.
    pub expected_responses: u8,
    /// Owner of the frame.
    pub origin: FrameOrigin,
}

/// A command for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFrame {
    /// Sender.
    pub source: NodeId,
    /// Command bytes.
    pub payload: Vec<u8>,
    /// Arrived inside an authenticated encapsulation.
    pub secure: bool,
}

/// Inclusion results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InclusionEvent {
    /// Node holds the network key.
    Completed {
        /// Included node.
        node: NodeId,
        /// Classes the node supports securely.
        supported: Vec<u8>,
        /// Classes the node controls securely.
        controlled: Vec<u8>,
    },
    /// Inclusion ended without granting the key.
    Failed {
        /// Node.
        node: NodeId,
        /// Cause.
        error: SecurityError,
    },
}

/// Work for the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S0Action {
    /// Queue a frame for transmission.
    Send(OutboundFrame),
    /// Application payload finished before reaching the scheduler.
    Complete {
        /// Session token.
        token: SessionToken,
        /// Final status.
        outcome: TxOutcome,
    },
    /// Decrypted command for the application.
    Deliver(ReceivedFrame),
    /// Inclusion finished.
    Inclusion(InclusionEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Network,
    Temporary,
}

#[derive(Debug)]
struct PendingPayload {
    origin: FrameOrigin,
    command: Vec<u8>,
    priority: Priority,
    expected_responses: u8,
    key: KeyKind,
}

#[derive(Debug, Default)]
struct PeerState {
    pending: BTreeMap<(Priority, u64), PendingPayload>,
    /// Set while a nonce from the peer is awaited.
    nonce_deadline: Option<Instant>,
}

#[derive(Debug)]
struct PartialMessage {
    counter: u8,
    data: Vec<u8>,
    deadline: Instant,
}

/// Security 0 encapsulation, nonce exchange and inclusion.
pub struct S0Transport<S> {
    node_id: NodeId,
    config: S0Config,
    storage: Arc<S>,
    rng: StdRng,
    /// Nonces we issued to peers.
    issued: NonceTable,
    /// Nonces peers issued to us.
    received: NonceTable,
    peers: HashMap<NodeId, PeerState>,
    reassembly: HashMap<NodeId, PartialMessage>,
    inclusion: S0Inclusion,
    next_sequence: u64,
}

impl<S: ControllerStorage> S0Transport<S> {
    /// Create a transport for the controller at `node_id`.
    pub fn new(node_id: NodeId, config: S0Config, storage: Arc<S>) -> Self {
        Self::with_rng(node_id, config, storage, StdRng::from_entropy())
    }

    /// Create a transport drawing nonces from `rng`.
    pub fn with_rng(node_id: NodeId, config: S0Config, storage: Arc<S>, rng: StdRng) -> Self {
        Self {
            node_id,
            issued: NonceTable::new(config.nonce_lifetime),
            received: NonceTable::new(config.peer_nonce_lifetime),
            inclusion: S0Inclusion::new(config.inclusion_step_timeout),
            config,
            storage,
            rng,
            peers: HashMap::new(),
            reassembly: HashMap::new(),
            next_sequence: 0,
        }
    }

    /// Shared storage.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Nonces issued to peers.
    pub fn issued_nonces(&self) -> &NonceTable {
        &self.issued
    }

    /// Nonces received from peers.
    pub fn received_nonces(&self) -> &NonceTable {
        &self.received
    }

    /// Inclusion progress.
    pub fn inclusion_state(&self) -> InclusionState {
        self.inclusion.state()
    }

    /// Payloads waiting for a nonce from `peer`.
    pub fn pending_count(&self, peer: NodeId) -> usize {
        self.peers.get(&peer).map_or(0, |s| s.pending.len())
    }

    /// Payloads waiting for a nonce from any peer.
    pub fn total_pending(&self) -> usize {
        self.peers.values().map(|s| s.pending.len()).sum()
    }

    /// Earliest instant at which [`on_timeout`](Self::on_timeout) has work.
    pub fn next_deadline(&self) -> Option<Instant> {
        let nonce_waits = self.peers.values().filter_map(|s| s.nonce_deadline);
        let partials = self.reassembly.values().map(|p| p.deadline);
        nonce_waits.chain(partials).chain(self.inclusion.deadline()).min()
    }

    /// Encrypt `command` for `destination`.
    ///
    /// Without a stored nonce from the peer the payload is held and a Nonce
    /// Get is emitted first.
    pub fn send_data(
        &mut self,
        token: SessionToken,
        command: Vec<u8>,
        destination: NodeId,
        priority: Priority,
        expected_responses: u8,
        now: Instant,
    ) -> Result<Vec<S0Action>, TxError> {
        if command.is_empty() {
            return Err(TxError::EmptyPayload);
        }
        if command.len() > S0_MAX_SINGLE_FRAME_PAYLOAD {
            return Err(TxError::PayloadTooLarge {
                len: command.len(),
                max: S0_MAX_SINGLE_FRAME_PAYLOAD,
            });
        }
        if let Err(error) = self.check_peer(destination) {
            debug!(%destination, %error, "security 0 unavailable");
            return Err(TxError::SecurityUnavailable(destination));
        }
        if self.network_key().is_err() {
            return Err(TxError::SecurityUnavailable(destination));
        }

        debug!(%token, %destination, len = command.len(), "secure send");
        let payload = PendingPayload {
            origin: FrameOrigin::Application(token),
            command,
            priority,
            expected_responses,
            key: KeyKind::Network,
        };
        Ok(self.queue_secure(destination, payload, now))
    }

    /// Remove a payload still waiting for a nonce.
    pub fn abort_send(&mut self, token: SessionToken) -> Option<S0Action> {
        let origin = FrameOrigin::Application(token);
        for state in self.peers.values_mut() {
            let key = state
                .pending
                .iter()
                .find(|(_, p)| p.origin == origin)
                .map(|(key, _)| *key);
            if let Some(key) = key {
                state.pending.remove(&key);
                debug!(%token, "secure payload aborted");
                return Some(S0Action::Complete {
                    token,
                    outcome: Err(TxError::AbortedByCaller),
                });
            }
        }
        None
    }

    /// Cancel every payload waiting for a nonce.
    pub fn flush(&mut self, now: Instant) -> Vec<S0Action> {
        let peers = std::mem::take(&mut self.peers);
        let mut actions = Vec::new();
        for (peer, state) in peers {
            for payload in state.pending.into_values() {
                actions.extend(self.fail_payload(peer, payload, TxError::Cancelled, now));
            }
        }
        actions
    }

    /// Handle an inbound Security command class frame.
    ///
    /// Errors mean the frame was dropped. Nothing was consumed or delivered.
    pub fn on_frame_received(
        &mut self,
        raw: &[u8],
        source: NodeId,
        now: Instant,
    ) -> Result<Vec<S0Action>, SecurityError> {
        let command = SecurityCommand::parse(raw)?;
        trace!(%source, command = command.name(), "security frame");

        match command {
            SecurityCommand::NonceGet => {
                self.check_peer(source)?;
                Ok(vec![self.nonce_report(source, now)])
            }
            SecurityCommand::NonceReport { nonce } => {
                self.received.insert(source, nonce, now);
                if let Some(state) = self.peers.get_mut(&source) {
                    state.nonce_deadline = None;
                }
                Ok(self.pump(source, now))
            }
            SecurityCommand::MessageEncapsulation(frame) => self.decapsulate(source, frame, now),
            SecurityCommand::SchemeReport { schemes } => {
                let step = self.inclusion.on_scheme_report(source, schemes, now);
                Ok(self.drive_inclusion(step, now))
            }
            SecurityCommand::SchemeGet { .. } => {
                self.check_peer(source)?;
                Ok(vec![S0Action::Send(OutboundFrame {
                    destination: source,
                    payload: SecurityCommand::SchemeReport { schemes: S0_SCHEME_0 }.encode(),
                    priority: Priority::Critical,
                    expected_responses: 0,
                    origin: FrameOrigin::CommandsReport,
                })])
            }
            other => {
                debug!(%source, command = other.name(), "ignoring unencrypted security command");
                Ok(Vec::new())
            }
        }
    }

    /// Delivery result of a frame this transport emitted.
    pub fn on_send_complete(
        &mut self,
        destination: NodeId,
        origin: FrameOrigin,
        success: bool,
        now: Instant,
    ) -> Vec<S0Action> {
        if success {
            return Vec::new();
        }

        match origin {
            FrameOrigin::NonceGet => {
                warn!(%destination, "nonce get not delivered");
                self.fail_nonce_wait(destination, now)
            }
            FrameOrigin::Inclusion => {
                let step = self.inclusion.on_frame_failed(destination);
                self.drive_inclusion(step, now)
            }
            FrameOrigin::Application(_) => {
                // the peer never saw a 0xC1, so ask for the next nonce explicitly
                if let Some(state) = self.peers.get_mut(&destination) {
                    state.nonce_deadline = None;
                }
                self.pump(destination, now)
            }
            FrameOrigin::NonceReport | FrameOrigin::CommandsReport => Vec::new(),
        }
    }

    /// Begin S0 inclusion of `node`.
    pub fn start_inclusion(&mut self, node: NodeId, now: Instant) -> Result<Vec<S0Action>, SecurityError> {
        self.check_peer(node)?;
        self.network_key()?;
        self.inclusion.start(node, now)?;

        let mut actions = self.clear_peer(node, TxError::SecurityUnavailable(node));
        actions.push(S0Action::Send(OutboundFrame {
            destination: node,
            payload: SecurityCommand::SchemeGet { schemes: S0_SCHEME_0 }.encode(),
            priority: Priority::Critical,
            expected_responses: 1,
            origin: FrameOrigin::Inclusion,
        }));
        Ok(actions)
    }

    /// Abort the running inclusion.
    pub fn abort_inclusion(&mut self, now: Instant) -> Vec<S0Action> {
        let step = self.inclusion.abort();
        self.drive_inclusion(step, now)
    }

    /// Resolve expired nonce waits, partial messages and inclusion steps.
    pub fn on_timeout(&mut self, now: Instant) -> Vec<S0Action> {
        let step = self.inclusion.on_timeout(now);
        let mut actions = self.drive_inclusion(step, now);

        let expired: Vec<NodeId> = self
            .peers
            .iter()
            .filter(|(_, s)| s.nonce_deadline.is_some_and(|d| now >= d))
            .map(|(peer, _)| *peer)
            .collect();
        for peer in expired {
            actions.extend(self.fail_nonce_wait(peer, now));
        }

        self.reassembly.retain(|peer, partial| {
            let keep = now < partial.deadline;
            if !keep {
                debug!(%peer, "dropping incomplete sequenced message");
            }
            keep
        });
        self.issued.purge_expired(now);
        self.received.purge_expired(now);
        actions
    }

    fn check_peer(&self, node: NodeId) -> Result<(), SecurityError> {
        if !node.is_classic() {
            return Err(SecurityError::S0NotSupported(node));
        }
        match self.storage.get_inclusion_protocol(node) {
            Ok(InclusionProtocol::LongRange) => Err(SecurityError::S0NotSupported(node)),
            Ok(_) => Ok(()),
            Err(error) => {
                debug!(%node, %error, "inclusion protocol unknown");
                Ok(())
            }
        }
    }

    fn network_key(&self) -> Result<NetworkKey, SecurityError> {
        self.storage.s0_network_key().map_err(|error| {
            warn!(%error, "network key unavailable");
            SecurityError::MissingNetworkKey
        })
    }

    fn is_downgrade(&self, node: NodeId) -> bool {
        let s2_capable = self.storage.is_node_s2_capable(node).unwrap_or_else(|error| {
            debug!(%node, %error, "s2 capability unknown");
            false
        });
        let keys = self.storage.get_granted_keys(node).unwrap_or_else(|error| {
            debug!(%node, %error, "granted keys unknown");
            KeyClasses::NONE
        });
        s2_capable && keys.has_s2()
    }

    fn nonce_report(&mut self, peer: NodeId, now: Instant) -> S0Action {
        let nonce = self.issued.issue(peer, now, &mut self.rng);
        S0Action::Send(OutboundFrame {
            destination: peer,
            payload: SecurityCommand::NonceReport { nonce }.encode(),
            priority: Priority::Control,
            expected_responses: 0,
            origin: FrameOrigin::NonceReport,
        })
    }

    fn queue_secure(&mut self, peer: NodeId, payload: PendingPayload, now: Instant) -> Vec<S0Action> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.peers
            .entry(peer)
            .or_default()
            .pending
            .insert((payload.priority, sequence), payload);
        self.pump(peer, now)
    }

    /// Encrypt the next pending payload, or ask for a nonce.
    fn pump(&mut self, peer: NodeId, now: Instant) -> Vec<S0Action> {
        let has_pending = self.peers.get(&peer).is_some_and(|s| !s.pending.is_empty());
        if !has_pending {
            return Vec::new();
        }

        if let Some(nonce) = self.received.take_unused(peer, now) {
            return self.encrypt_next(peer, nonce, now);
        }

        let state = self.peers.entry(peer).or_default();
        if state.nonce_deadline.is_some() {
            return Vec::new();
        }
        state.nonce_deadline = Some(now + self.config.nonce_request_timeout);

        debug!(%peer, "requesting nonce");
        vec![S0Action::Send(OutboundFrame {
            destination: peer,
            payload: SecurityCommand::NonceGet.encode(),
            priority: Priority::Control,
            expected_responses: 1,
            origin: FrameOrigin::NonceGet,
        })]
    }

    fn encrypt_next(&mut self, peer: NodeId, receiver_nonce: Nonce, now: Instant) -> Vec<S0Action> {
        let Some(state) = self.peers.get_mut(&peer) else {
            return Vec::new();
        };
        let Some((_, payload)) = state.pending.pop_first() else {
            return Vec::new();
        };
        let more = !state.pending.is_empty();
        state.nonce_deadline = more.then(|| now + self.config.nonce_request_timeout);

        let key = match payload.key {
            KeyKind::Temporary => NetworkKey::temporary(),
            KeyKind::Network => match self.network_key() {
                Ok(key) => key,
                Err(_) => return self.fail_payload(peer, payload, TxError::SecurityUnavailable(peer), now),
            },
        };
        let (Some(source), Some(destination)) = (self.node_id.as_classic_byte(), peer.as_classic_byte()) else {
            return self.fail_payload(peer, payload, TxError::SecurityUnavailable(peer), now);
        };

        let sender_nonce = Nonce::random(&mut self.rng);
        let iv = message_iv(&sender_nonce, &receiver_nonce);
        let mut plaintext = Vec::with_capacity(1 + payload.command.len());
        plaintext.push(SequenceInfo::SINGLE.to_byte());
        plaintext.extend_from_slice(&payload.command);

        let mut frame = EncapsulatedFrame {
            request_nonce: more,
            sender_nonce,
            ciphertext: Vec::new(),
            receiver_nonce_id: receiver_nonce.id(),
            mac: [0; 8],
        };
        let Some((ciphertext, mac)) = seal(&key.derive(), &iv, frame.command_id(), source, destination, &plaintext)
        else {
            let error = TxError::PayloadTooLarge {
                len: payload.command.len(),
                max: S0_MAX_SINGLE_FRAME_PAYLOAD,
            };
            return self.fail_payload(peer, payload, error, now);
        };
        frame.ciphertext = ciphertext;
        frame.mac = mac;

        trace!(%peer, origin = ?payload.origin, request_nonce = more, "encapsulated");
        vec![S0Action::Send(OutboundFrame {
            destination: peer,
            payload: SecurityCommand::MessageEncapsulation(frame).encode(),
            priority: payload.priority,
            expected_responses: payload.expected_responses.saturating_add(u8::from(more)),
            origin: payload.origin,
        })]
    }

    fn decapsulate(
        &mut self,
        source: NodeId,
        frame: EncapsulatedFrame,
        now: Instant,
    ) -> Result<Vec<S0Action>, SecurityError> {
        if self.is_downgrade(source) {
            return Err(SecurityError::SecurityDowngrade(source));
        }
        let receiver_nonce = self.issued.lookup(source, frame.receiver_nonce_id, now)?;
        let key = self.network_key()?;
        let (Some(src), Some(dst)) = (source.as_classic_byte(), self.node_id.as_classic_byte()) else {
            return Err(SecurityError::S0NotSupported(source));
        };

        let iv = message_iv(&frame.sender_nonce, &receiver_nonce);
        let plaintext = open(
            &key.derive(),
            &iv,
            frame.command_id(),
            src,
            dst,
            &frame.ciphertext,
            &frame.mac,
        )
        .ok_or(SecurityError::AuthenticationFailed(source))?;
        self.issued.consume(source, frame.receiver_nonce_id, now)?;

        if let Err(error) = self.storage.set_node_security_capable(source, true) {
            warn!(%source, %error, "failed to record security capability");
        }
        if let Err(error) = self.storage.add_granted_keys(source, KeyClasses::S0) {
            warn!(%source, %error, "failed to record granted S0 key");
        }

        let mut actions = Vec::new();
        if frame.request_nonce {
            actions.push(self.nonce_report(source, now));
        }

        let Some((&sequence, command)) = plaintext.split_first() else {
            return Ok(actions);
        };
        if let Some(command) = self.reassemble(source, SequenceInfo::from_byte(sequence), command, now) {
            actions.extend(self.handle_decrypted(source, command, now));
        }
        Ok(actions)
    }

    fn reassemble(&mut self, source: NodeId, info: SequenceInfo, part: &[u8], now: Instant) -> Option<Vec<u8>> {
        if !info.sequenced {
            return Some(part.to_vec());
        }
        if !info.second_frame {
            trace!(%source, counter = info.counter, "first half of sequenced message");
            self.reassembly.insert(
                source,
                PartialMessage {
                    counter: info.counter,
                    data: part.to_vec(),
                    deadline: now + self.config.reassembly_timeout,
                },
            );
            return None;
        }

        match self.reassembly.remove(&source) {
            Some(first) if first.counter == info.counter && now < first.deadline => {
                let mut data = first.data;
                data.extend_from_slice(part);
                Some(data)
            }
            _ => {
                debug!(%source, counter = info.counter, "second half without a matching first half");
                None
            }
        }
    }

    fn handle_decrypted(&mut self, source: NodeId, command: Vec<u8>, now: Instant) -> Vec<S0Action> {
        if command.first() != Some(&COMMAND_CLASS_SECURITY) {
            return vec![S0Action::Deliver(ReceivedFrame {
                source,
                payload: command,
                secure: true,
            })];
        }

        match SecurityCommand::parse(&command) {
            Ok(SecurityCommand::NetworkKeyVerify) => {
                let step = self.inclusion.on_network_key_verify(source, now);
                self.drive_inclusion(step, now)
            }
            Ok(SecurityCommand::CommandsSupportedReport {
                reports_to_follow,
                supported,
                controlled,
            }) => {
                let step = self.inclusion.on_commands_supported_report(
                    source,
                    reports_to_follow,
                    &supported,
                    &controlled,
                    now,
                );
                self.drive_inclusion(step, now)
            }
            Ok(SecurityCommand::CommandsSupportedGet) => {
                let report = SecurityCommand::CommandsSupportedReport {
                    reports_to_follow: 0,
                    supported: self.config.supported_command_classes.clone(),
                    controlled: Vec::new(),
                };
                let payload = PendingPayload {
                    origin: FrameOrigin::CommandsReport,
                    command: report.encode(),
                    priority: Priority::High,
                    expected_responses: 0,
                    key: KeyKind::Network,
                };
                self.queue_secure(source, payload, now)
            }
            Ok(other) => {
                debug!(%source, command = other.name(), "ignoring encapsulated security command");
                Vec::new()
            }
            Err(error) => {
                debug!(%source, %error, "malformed encapsulated security command");
                Vec::new()
            }
        }
    }

    fn drive_inclusion(&mut self, step: InclusionStep, now: Instant) -> Vec<S0Action> {
        match step {
            InclusionStep::Ignore | InclusionStep::Wait => Vec::new(),
            InclusionStep::SendNetworkKeySet => {
                let Some(node) = self.inclusion.node() else {
                    return Vec::new();
                };
                let key = match self.network_key() {
                    Ok(key) => key,
                    Err(error) => {
                        let step = self.inclusion.fail(error);
                        return self.drive_inclusion(step, now);
                    }
                };
                let payload = PendingPayload {
                    origin: FrameOrigin::Inclusion,
                    command: SecurityCommand::NetworkKeySet { key }.encode(),
                    priority: Priority::Critical,
                    expected_responses: 0,
                    key: KeyKind::Temporary,
                };
                self.queue_secure(node, payload, now)
            }
            InclusionStep::SendCommandsSupportedGet => {
                let Some(node) = self.inclusion.node() else {
                    return Vec::new();
                };
                if let Err(error) = self.storage.add_granted_keys(node, KeyClasses::S0) {
                    warn!(%node, %error, "failed to record granted S0 key");
                }
                if let Err(error) = self.storage.set_node_security_capable(node, true) {
                    warn!(%node, %error, "failed to record security capability");
                }
                let payload = PendingPayload {
                    origin: FrameOrigin::Inclusion,
                    command: SecurityCommand::CommandsSupportedGet.encode(),
                    priority: Priority::Critical,
                    expected_responses: 0,
                    key: KeyKind::Network,
                };
                self.queue_secure(node, payload, now)
            }
            InclusionStep::Complete {
                node,
                supported,
                controlled,
            } => vec![S0Action::Inclusion(InclusionEvent::Completed {
                node,
                supported,
                controlled,
            })],
            InclusionStep::Fail { node, error } => {
                let mut actions = self.clear_peer(node, TxError::SecurityUnavailable(node));
                actions.push(S0Action::Inclusion(InclusionEvent::Failed { node, error }));
                actions
            }
        }
    }

    fn fail_payload(&mut self, peer: NodeId, payload: PendingPayload, error: TxError, now: Instant) -> Vec<S0Action> {
        match payload.origin {
            FrameOrigin::Application(token) => vec![S0Action::Complete {
                token,
                outcome: Err(error),
            }],
            FrameOrigin::Inclusion => {
                let step = self.inclusion.on_frame_failed(peer);
                self.drive_inclusion(step, now)
            }
            _ => Vec::new(),
        }
    }

    fn fail_nonce_wait(&mut self, peer: NodeId, now: Instant) -> Vec<S0Action> {
        let Some(state) = self.peers.remove(&peer) else {
            return Vec::new();
        };
        if !state.pending.is_empty() {
            warn!(%peer, pending = state.pending.len(), "no nonce from peer");
        }

        let mut actions = Vec::new();
        for payload in state.pending.into_values() {
            actions.extend(self.fail_payload(peer, payload, TxError::NonceTimeout(peer), now));
        }
        actions
    }

    /// Drop all nonce, pending and reassembly state of `peer`.
    fn clear_peer(&mut self, peer: NodeId, error: TxError) -> Vec<S0Action> {
        self.issued.clear_peer(peer);
        self.received.clear_peer(peer);
        self.reassembly.remove(&peer);

        let Some(state) = self.peers.remove(&peer) else {
            return Vec::new();
        };
        info!(%peer, pending = state.pending.len(), "cleared security state");
        state
            .pending
            .into_values()
            .filter_map(|payload| match payload.origin {
                FrameOrigin::Application(token) => Some(S0Action::Complete {
                    token,
                    outcome: Err(error.clone()),
                }),
                _ => None,
            })
            .collect()
    }
}
