//! Security 0 key material.
//!
//! The network key is owned by storage. The codec fetches it for every
//! operation and derives the authentication and encryption keys on the spot.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use super::cipher::encrypt_block;
use crate::core::{S0_AUTH_KEY_PATTERN, S0_ENC_KEY_PATTERN, S0_KEY_SIZE};

/// AES-128 network key.
///
/// Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct NetworkKey {
    key: [u8; S0_KEY_SIZE],
}

impl NetworkKey {
    /// Wrap raw key bytes.
    pub fn new(key: [u8; S0_KEY_SIZE]) -> Self {
        Self { key }
    }

    /// The all-zero key the Network Key Set is sent under during inclusion.
    pub fn temporary() -> Self {
        Self {
            key: [0u8; S0_KEY_SIZE],
        }
    }

    /// Get the raw key bytes.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn as_bytes(&self) -> &[u8; S0_KEY_SIZE] {
        &self.key
    }

    /// Derive the authentication and encryption keys.
    pub fn derive(&self) -> DerivedKeys {
        DerivedKeys {
            auth: encrypt_block(&self.key, &[S0_AUTH_KEY_PATTERN; S0_KEY_SIZE]),
            enc: encrypt_block(&self.key, &[S0_ENC_KEY_PATTERN; S0_KEY_SIZE]),
        }
    }
}

impl fmt::Debug for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NetworkKey(..)")
    }
}

impl Drop for NetworkKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Keys derived from a network key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKeys {
    /// CBC-MAC key, `AES(NK, 0x55..)`.
    pub auth: [u8; S0_KEY_SIZE],
    /// OFB key, `AES(NK, 0xAA..)`.
    pub enc: [u8; S0_KEY_SIZE],
}

impl fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKeys(..)")
    }
}
