//! Transmission layer: priority queue, backoff policies and the
//! single-session transmission state machine.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Application / Controller         │
//! ├─────────────────────────────────────────┤
//! │       Security 0 (optional wrap)        │
//! ├─────────────────────────────────────────┤
//! │         Transmission layer              │  ← This module
//! │   priority queue, backoff, retries      │
//! ├─────────────────────────────────────────┤
//! │               Radio                     │
//! └─────────────────────────────────────────┘
//! ```

mod backoff;
mod process;
mod queue;

pub use backoff::{retry_delay, Backoff, BackoffReason, Observation};
pub use process::{TxAction, TxProcess, TxState};
pub use queue::{QueueEntry, TxQueue};
