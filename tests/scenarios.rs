//! End-to-end controller scenarios against a simulated device.

mod common;

use std::time::Duration;

use common::{CONTROLLER, DEVICE, Harness, NETWORK_KEY};
use zwave_controller::prelude::*;

#[test]
fn nonce_get_precedes_queued_secure_payloads() {
    let mut h = Harness::new();
    let p1 = h
        .controller
        .enqueue(vec![0x25, 0x01, 0xff], DEVICE, Priority::High, true, h.now)
        .unwrap();
    let p2 = h
        .controller
        .enqueue(vec![0x25, 0x01, 0x00], DEVICE, Priority::Low, true, h.now)
        .unwrap();

    h.relay();

    assert_eq!(h.air_commands(), vec![Some(0x40), Some(0xc1), Some(0x81)]);
    assert!(h.air.iter().all(|f| f.destination == DEVICE));
    assert_eq!(h.air[0].options.expected_responses, 1);
    assert_eq!(h.air[1].options.expected_responses, 1);
    assert_eq!(h.completions(), vec![(p1, Ok(())), (p2, Ok(()))]);

    let payloads: Vec<_> = h.device_inbox.iter().map(|f| (f.payload.clone(), f.secure)).collect();
    assert_eq!(
        payloads,
        vec![(vec![0x25, 0x01, 0xff], true), (vec![0x25, 0x01, 0x00], true)]
    );
    assert_eq!(h.controller.state(), TxState::Idle);
}

#[test]
fn nonce_request_overtakes_queued_plain_frames() {
    let mut h = Harness::new();
    // keep the radio busy so everything below is queued
    h.controller
        .enqueue(vec![0x20, 0x01, 0xff], NodeId(9), Priority::Normal, false, h.now)
        .unwrap();
    h.controller
        .enqueue(vec![0x20, 0x01, 0x00], NodeId(9), Priority::High, false, h.now)
        .unwrap();
    h.controller
        .enqueue(vec![0x62, 0x01, 0x00], DEVICE, Priority::Normal, true, h.now)
        .unwrap();

    h.controller.on_transmission_result(true, 0, h.now);
    let sent = h.radio.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].frame, vec![0x98, 0x40]);
    assert_eq!(sent[1].destination, DEVICE);
}

#[test]
fn retry_exhausted_then_next_entry() {
    let mut h = Harness::new();
    let first = h
        .controller
        .enqueue(vec![0x20, 0x01, 0xff], DEVICE, Priority::Normal, false, h.now)
        .unwrap();
    let second = h
        .controller
        .enqueue(vec![0x20, 0x01, 0x00], DEVICE, Priority::Normal, false, h.now)
        .unwrap();

    h.controller.on_transmission_result(false, 3, h.now);
    assert_eq!(h.controller.state(), TxState::Backoff);
    let retry_at = h.controller.next_deadline().unwrap();
    h.controller.on_timeout(retry_at);
    h.controller.on_transmission_result(false, 3, retry_at);

    let frames: Vec<_> = h.radio.sent().into_iter().map(|f| f.frame).collect();
    assert_eq!(
        frames,
        vec![vec![0x20, 0x01, 0xff], vec![0x20, 0x01, 0xff], vec![0x20, 0x01, 0x00]]
    );
    assert_eq!(
        h.completions(),
        vec![(first, Err(TxError::RetryExhausted { attempts: 2 }))]
    );
    assert_eq!(h.controller.tx().active_token(), Some(second));
}

#[test]
fn flush_then_enqueue_waits_for_stale_result() {
    let mut h = Harness::new();
    let active = h
        .controller
        .enqueue(vec![0x20, 0x01, 0xff], DEVICE, Priority::Normal, false, h.now)
        .unwrap();
    let queued = h
        .controller
        .enqueue(vec![0x20, 0x01, 0x00], DEVICE, Priority::Normal, false, h.now)
        .unwrap();

    h.controller.flush_queue(h.now);
    assert!(h.controller.is_queue_flush_ongoing());
    assert_eq!(
        h.completions(),
        vec![
            (active, Err(TxError::AbortedByCaller)),
            (queued, Err(TxError::Cancelled)),
        ]
    );

    let fresh = h
        .controller
        .enqueue(vec![0x25, 0x02], DEVICE, Priority::Normal, false, h.now)
        .unwrap();
    assert_eq!(h.radio.sent().len(), 1);

    // the aborted frame's result arrives and releases the queue
    h.controller.on_transmission_result(true, 0, h.now);
    assert!(!h.controller.is_queue_flush_ongoing());
    let last = h.radio.last().unwrap();
    assert_eq!(last.frame, vec![0x25, 0x02]);
    assert_eq!(h.controller.tx().active_token(), Some(fresh));
}

#[test]
fn unknown_nonce_is_dropped_without_side_effects() {
    let mut h = Harness::new();
    let token = h
        .controller
        .enqueue(vec![0x25, 0x01, 0xff], DEVICE, Priority::Normal, true, h.now)
        .unwrap();
    h.relay();
    assert_eq!(h.completions(), vec![(token, Ok(()))]);

    // replay the encapsulated frame back at the device
    let encapsulated = h.air.last().unwrap().frame.clone();
    let before = h.device_inbox.len();
    h.device_receive(&encapsulated);
    assert!(matches!(
        h.device_errors.as_slice(),
        [SecurityError::ReplayOrUnknownNonce { node: CONTROLLER, .. }]
    ));
    assert_eq!(h.device_inbox.len(), before);

    // a frame naming a nonce the controller never issued
    let mut forged = encapsulated;
    let id_index = forged.len() - 9;
    forged[id_index] = forged[id_index].wrapping_add(1);
    h.controller.on_frame_received(&forged, DEVICE, RxOptions::default(), h.now);
    assert!(matches!(
        h.events().as_slice(),
        [ControllerEvent::SecurityDrop {
            source: DEVICE,
            error: SecurityError::ReplayOrUnknownNonce { .. },
        }]
    ));
    assert_eq!(h.controller.s0().issued_nonces().len(), 0);
}

#[test]
fn secure_command_from_device_is_delivered() {
    let mut h = Harness::new();
    h.device_send(1, vec![0x71, 0x05, 0x06, 0xff]);
    h.relay();

    let events = h.events();
    let frames: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ControllerEvent::FrameReceived { frame, .. } => Some(frame.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        frames,
        vec![ReceivedFrame {
            source: DEVICE,
            payload: vec![0x71, 0x05, 0x06, 0xff],
            secure: true,
        }]
    );
    assert!(h.storage.node(DEVICE).unwrap().security_capable);
}

#[test]
fn full_s0_inclusion() {
    let device_config = S0Config::default().with_supported_command_classes(vec![0x25, 0x62, 0x71]);
    let mut h = Harness::uninitialized_device(device_config);

    h.controller.start_s0_inclusion(DEVICE, h.now).unwrap();
    assert_eq!(h.controller.inclusion_state(), InclusionState::SchemeGetSent);
    h.relay();

    // scheme get, nonce get, network key set under the temporary key
    assert_eq!(h.air_commands(), vec![Some(0x04), Some(0x40), Some(0x81)]);
    assert_eq!(h.controller.inclusion_state(), InclusionState::KeySetSent);
    assert!(h.device_errors.is_empty());

    // the device installs the key and verifies it
    h.device_storage.set_network_key(Some(NETWORK_KEY));
    h.device_send(1, vec![0x98, 0x07]);
    h.relay();

    assert!(h.device_errors.is_empty());
    let inclusions: Vec<_> = h
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ControllerEvent::Inclusion(event) => Some(event),
            _ => None,
        })
        .collect();
    assert_eq!(
        inclusions,
        vec![InclusionEvent::Completed {
            node: DEVICE,
            supported: vec![0x25, 0x62, 0x71],
            controlled: vec![],
        }]
    );
    assert_eq!(h.controller.inclusion_state(), InclusionState::Complete);

    let record = h.storage.node(DEVICE).unwrap();
    assert!(record.granted_keys.contains(KeyClasses::S0));
    assert!(record.security_capable);
}

#[test]
fn inclusion_stuck_in_key_set_sent_then_restart() {
    let mut h = Harness::uninitialized_device(S0Config::default());
    h.controller.start_s0_inclusion(DEVICE, h.now).unwrap();
    h.relay();
    assert_eq!(h.controller.inclusion_state(), InclusionState::KeySetSent);
    h.events();

    let step = S0Config::default().inclusion_step_timeout;
    let later = h.now + step;
    h.controller.on_timeout(later);

    assert_eq!(
        h.events(),
        vec![ControllerEvent::Inclusion(InclusionEvent::Failed {
            node: DEVICE,
            error: SecurityError::InclusionTimeout {
                node: DEVICE,
                state: "KEY_SET_SENT",
            },
        })]
    );
    assert_eq!(h.controller.inclusion_state(), InclusionState::Idle);
    assert!(h.storage.node(DEVICE).is_none_or(|r| !r.granted_keys.contains(KeyClasses::S0)));

    h.now = later + Duration::from_millis(1);
    h.controller.start_s0_inclusion(DEVICE, h.now).unwrap();
    assert_eq!(h.controller.inclusion_state(), InclusionState::SchemeGetSent);
    assert_eq!(h.radio.last().unwrap().frame, vec![0x98, 0x04, 0x00]);
}

#[test]
fn inclusion_aborted_by_caller() {
    let mut h = Harness::uninitialized_device(S0Config::default());
    h.controller.start_s0_inclusion(DEVICE, h.now).unwrap();
    h.controller.abort_s0_inclusion(h.now);

    assert!(matches!(
        h.events().as_slice(),
        [ControllerEvent::Inclusion(InclusionEvent::Failed {
            error: SecurityError::InclusionAborted(DEVICE),
            ..
        })]
    ));
    assert_eq!(h.controller.inclusion_state(), InclusionState::Idle);
}

#[test]
fn inclusion_timeout_with_nonce_get_on_air_sends_nothing_more() {
    let mut h = Harness::uninitialized_device(S0Config::default());
    h.controller.start_s0_inclusion(DEVICE, h.now).unwrap();
    let scheme_get = h.radio.take_sent();
    h.controller.on_transmission_result(true, 0, h.now);
    h.device_receive(&scheme_get[0].frame);

    // the scheme report made the controller ask for a nonce for the key set
    assert_eq!(h.radio.take_sent()[0].frame, vec![0x98, 0x40]);
    assert_eq!(h.controller.state(), TxState::TransmissionOngoing);

    let later = h.now + S0Config::default().inclusion_step_timeout;
    h.controller.on_timeout(later);
    assert!(matches!(
        h.events().as_slice(),
        [ControllerEvent::Inclusion(InclusionEvent::Failed {
            node: DEVICE,
            error: SecurityError::InclusionTimeout { .. },
        })]
    ));

    // the device answers late and the radio reports the aborted frame
    h.device_receive(&[0x98, 0x40]);
    h.controller.on_transmission_result(true, 0, later);
    h.controller.on_timeout(later + Duration::from_secs(70));

    assert!(h.radio.sent().is_empty());
    assert_eq!(h.controller.state(), TxState::Idle);
    assert_eq!(h.controller.s0().pending_count(DEVICE), 0);
    assert!(h.events().is_empty());
}

#[test]
fn flush_with_nonce_get_queued_sends_nothing_more() {
    let mut h = Harness::new();
    let plain = h
        .controller
        .enqueue(vec![0x20, 0x01, 0xff], NodeId(9), Priority::Normal, false, h.now)
        .unwrap();
    let secure = h
        .controller
        .enqueue(vec![0x25, 0x01, 0xff], DEVICE, Priority::Normal, true, h.now)
        .unwrap();
    assert_eq!(h.controller.tx().queue().len(), 1);

    h.controller.flush_queue(h.now);
    assert_eq!(
        h.completions(),
        vec![
            (secure, Err(TxError::Cancelled)),
            (plain, Err(TxError::AbortedByCaller)),
        ]
    );

    h.controller.on_transmission_result(true, 0, h.now);
    h.controller.on_timeout(h.now + Duration::from_secs(70));
    h.relay();

    assert_eq!(h.air.len(), 1);
    assert_eq!(h.air[0].destination, NodeId(9));
    assert_eq!(h.controller.s0().next_deadline(), None);
    assert!(h.device_inbox.is_empty());
}

#[test]
fn expected_additional_frames_hold_the_queue() {
    let mut h = Harness::new();
    h.controller
        .enqueue(vec![0x60, 0x0d, 0x01, 0x01], DEVICE, Priority::Normal, false, h.now)
        .unwrap();
    h.controller.on_transmission_result(true, 0, h.now);
    h.controller.set_expected_additional_frames(2, h.now);
    assert_eq!(h.controller.state(), TxState::Backoff);

    h.controller
        .enqueue(vec![0x20, 0x02], NodeId(7), Priority::Normal, false, h.now)
        .unwrap();
    assert_eq!(h.radio.sent().len(), 1);

    h.controller.on_frame_received(&[0x60, 0x0d, 0x01, 0x01, 0x25, 0x03, 0xff], DEVICE, RxOptions::default(), h.now);
    assert_eq!(h.radio.sent().len(), 1);
    h.controller.on_frame_received(&[0x60, 0x0d, 0x02, 0x02, 0x25, 0x03, 0x00], DEVICE, RxOptions::default(), h.now);
    assert_eq!(h.radio.sent().len(), 2);
    assert_eq!(h.radio.last().unwrap().destination, NodeId(7));
}

#[test]
fn storage_outage_is_not_fatal() {
    let mut h = Harness::new();
    h.storage.set_unavailable(true);

    assert_eq!(
        h.controller
            .enqueue(vec![0x25, 0x01], DEVICE, Priority::Normal, true, h.now)
            .unwrap_err(),
        TxError::SecurityUnavailable(DEVICE)
    );

    h.storage.set_unavailable(false);
    let token = h
        .controller
        .enqueue(vec![0x25, 0x01, 0xff], DEVICE, Priority::Normal, true, h.now)
        .unwrap();
    h.relay();
    assert_eq!(h.completions(), vec![(token, Ok(()))]);
}
