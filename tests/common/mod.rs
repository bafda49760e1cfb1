//! Controller wired to a simulated S0 device.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;
use zwave_controller::prelude::*;
use zwave_controller::testing::{MemoryStorage, RecordingRadio, SentFrame};

pub const CONTROLLER: NodeId = NodeId(1);
pub const DEVICE: NodeId = NodeId(5);
pub const NETWORK_KEY: [u8; 16] = [
    0x0f, 0x1e, 0x2d, 0x3c, 0x4b, 0x5a, 0x69, 0x78, 0x87, 0x96, 0xa5, 0xb4, 0xc3, 0xd2, 0xe1, 0xf0,
];

pub struct Harness {
    pub controller: Controller<MemoryStorage, RecordingRadio>,
    pub radio: RecordingRadio,
    pub storage: Arc<MemoryStorage>,
    pub device: S0Transport<MemoryStorage>,
    pub device_storage: Arc<MemoryStorage>,
    /// Every frame the controller put on air, in order.
    pub air: Vec<SentFrame>,
    /// Commands the device decrypted or received in the clear.
    pub device_inbox: Vec<ReceivedFrame>,
    pub device_errors: Vec<SecurityError>,
    pub now: Instant,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ControllerConfig::new(CONTROLLER))
    }

    pub fn with_config(config: ControllerConfig) -> Self {
        Self::build(config, MemoryStorage::with_network_key(NETWORK_KEY), S0Config::default())
    }

    /// Device not yet included: it only knows the all-zero temporary key.
    pub fn uninitialized_device(device_config: S0Config) -> Self {
        Self::build(
            ControllerConfig::new(CONTROLLER),
            MemoryStorage::with_network_key([0; 16]),
            device_config,
        )
    }

    fn build(config: ControllerConfig, device_storage: MemoryStorage, device_config: S0Config) -> Self {
        let storage = Arc::new(MemoryStorage::with_network_key(NETWORK_KEY));
        let radio = RecordingRadio::new();
        let controller = Controller::with_rng(
            config,
            Arc::clone(&storage),
            radio.clone(),
            StdRng::seed_from_u64(11),
        )
        .unwrap();

        let device_storage = Arc::new(device_storage);
        let device = S0Transport::with_rng(
            DEVICE,
            device_config,
            Arc::clone(&device_storage),
            StdRng::seed_from_u64(22),
        );

        Self {
            controller,
            radio,
            storage,
            device,
            device_storage,
            air: Vec::new(),
            device_inbox: Vec::new(),
            device_errors: Vec::new(),
            now: Instant::now(),
        }
    }

    /// Acknowledge every frame on air and let the device answer, until the
    /// controller has nothing more to send.
    pub fn relay(&mut self) {
        loop {
            let sent = self.radio.take_sent();
            if sent.is_empty() {
                return;
            }
            for frame in sent {
                self.air.push(frame.clone());
                self.controller.on_transmission_result(true, 0, self.now);
                if frame.destination == DEVICE {
                    self.device_receive(&frame.frame);
                }
            }
        }
    }

    /// Device handles one frame from the controller.
    pub fn device_receive(&mut self, raw: &[u8]) {
        if raw.first() != Some(&COMMAND_CLASS_SECURITY) {
            self.device_inbox.push(ReceivedFrame {
                source: CONTROLLER,
                payload: raw.to_vec(),
                secure: false,
            });
            return;
        }
        match self.device.on_frame_received(raw, CONTROLLER, self.now) {
            Ok(actions) => self.device_act(actions),
            Err(error) => self.device_errors.push(error),
        }
    }

    /// Device queues a secure command for the controller.
    pub fn device_send(&mut self, token: u64, command: Vec<u8>) {
        let actions = self
            .device
            .send_data(SessionToken(token), command, CONTROLLER, Priority::High, 0, self.now)
            .unwrap();
        self.device_act(actions);
    }

    fn device_act(&mut self, actions: Vec<S0Action>) {
        for action in actions {
            match action {
                S0Action::Send(frame) => {
                    self.controller
                        .on_frame_received(&frame.payload, DEVICE, RxOptions::default(), self.now);
                }
                S0Action::Deliver(frame) => self.device_inbox.push(frame),
                S0Action::Complete { .. } | S0Action::Inclusion(_) => {}
            }
        }
    }

    pub fn events(&mut self) -> Vec<ControllerEvent> {
        std::iter::from_fn(|| self.controller.poll_event()).collect()
    }

    pub fn completions(&mut self) -> Vec<(SessionToken, TxOutcome)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ControllerEvent::TxComplete { token, outcome } => Some((token, outcome)),
                _ => None,
            })
            .collect()
    }

    /// Command ids of security frames on air, `None` for plain frames.
    pub fn air_commands(&self) -> Vec<Option<u8>> {
        self.air
            .iter()
            .map(|f| (f.frame.first() == Some(&COMMAND_CLASS_SECURITY)).then(|| f.frame[1]))
            .collect()
    }
}
