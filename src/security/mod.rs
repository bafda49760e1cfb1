//! Security 0 layer.
//!
//! - **Keys**: [`NetworkKey`] and the derived authentication/encryption keys
//! - **Cipher**: AES-128 OFB and the truncated CBC-MAC
//! - **Nonces**: per-peer single-use [`NonceTable`]s
//! - **Frames**: [`SecurityCommand`] wire codec
//! - **Inclusion**: includer-side key exchange ([`S0Inclusion`])
//! - **Transport**: [`S0Transport`], tying the above together

pub mod cipher;
mod frame;
mod inclusion;
mod keys;
mod nonce;
mod transport;

pub use frame::{command, EncapsulatedFrame, SecurityCommand, SequenceInfo};
pub use inclusion::{InclusionState, InclusionStep, S0Inclusion};
pub use keys::{DerivedKeys, NetworkKey};
pub use nonce::{Nonce, NonceEntry, NonceTable};
pub use transport::{
    FrameOrigin, InclusionEvent, OutboundFrame, ReceivedFrame, S0Action, S0Transport,
};
