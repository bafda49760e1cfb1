//! # zwave-controller
//!
//! Controller-side core of a Z-Wave host stack: prioritized frame
//! transmission with contention backoff and bounded retries, plus the
//! Security 0 (S0) transport and its inclusion handshake.
//!
//! The state machines perform no I/O. Every call takes `now` and returns the
//! work to perform, which [`Controller`](controller::Controller) executes
//! against a [`RadioLink`](core::RadioLink). The optional `runtime` feature
//! moves a controller into a tokio task.
//!
//! ## Feature Flags
//!
//! - `runtime` (default): tokio driver ([`runtime`])
//!
//! ## Modules
//!
//! - [`core`]: Identifiers, configuration, errors and collaborator traits
//! - [`transport`]: Priority queue, backoff and the transmission scheduler
//! - [`security`]: S0 codec, nonce tables, inclusion and transport
//! - [`controller`]: Scheduler and S0 transport wired to a radio
//! - [`runtime`]: Tokio actor (requires `runtime` feature)
//! - [`testing`]: In-memory storage and a recording radio
//!
//! ## Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! use zwave_controller::prelude::*;
//! use zwave_controller::testing::{MemoryStorage, RecordingRadio};
//!
//! let storage = Arc::new(MemoryStorage::with_network_key([0x11; 16]));
//! let radio = RecordingRadio::new();
//! let mut controller = Controller::new(ControllerConfig::new(NodeId(1)), storage, radio.clone()).unwrap();
//!
//! let now = Instant::now();
//! let token = controller
//!     .enqueue(vec![0x25, 0x01, 0xff], NodeId(5), Priority::Normal, false, now)
//!     .unwrap();
//! assert_eq!(radio.sent().len(), 1);
//!
//! controller.on_transmission_result(true, 0, now);
//! assert_eq!(
//!     controller.poll_event(),
//!     Some(ControllerEvent::TxComplete { token, outcome: Ok(()) })
//! );
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod controller;
pub mod core;
pub mod security;
pub mod testing;
pub mod transport;

#[cfg(feature = "runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
pub mod runtime;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    pub use crate::controller::{Controller, ControllerEvent, TxRequest};
    pub use crate::security::{
        FrameOrigin, InclusionEvent, InclusionState, NetworkKey, ReceivedFrame, S0Action,
        S0Transport,
    };
    pub use crate::transport::{BackoffReason, QueueEntry, TxAction, TxProcess, TxState};

    #[cfg(feature = "runtime")]
    pub use crate::runtime::{spawn, ControllerHandle, ControllerStatus, EventReceiver};
}
