//! AES-128 primitives for Security 0.
//!
//! S0 only needs the raw block function: OFB for confidentiality and a
//! CBC-MAC truncated to 8 bytes for authentication, both built here on
//! [`aes::Aes128`].

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes128, Block};

use super::keys::DerivedKeys;
use super::nonce::Nonce;
use crate::core::{AES_BLOCK_SIZE, S0_KEY_SIZE, S0_MAC_SIZE, S0_NONCE_SIZE};

/// Encrypt a single block (AES-128-ECB).
pub fn encrypt_block(key: &[u8; S0_KEY_SIZE], input: &[u8; AES_BLOCK_SIZE]) -> [u8; AES_BLOCK_SIZE] {
    let cipher = Aes128::new(key.into());
    encrypt_with(&cipher, input)
}

fn encrypt_with(cipher: &Aes128, input: &[u8; AES_BLOCK_SIZE]) -> [u8; AES_BLOCK_SIZE] {
    let mut block = Block::clone_from_slice(input);
    cipher.encrypt_block(&mut block);

    let mut out = [0u8; AES_BLOCK_SIZE];
    out.copy_from_slice(&block);
    out
}

/// AES-128-OFB. Encryption and decryption are the same operation.
pub fn aes_ofb(key: &[u8; S0_KEY_SIZE], iv: &[u8; AES_BLOCK_SIZE], data: &[u8]) -> Vec<u8> {
    let cipher = Aes128::new(key.into());
    let mut stream = *iv;
    let mut out = Vec::with_capacity(data.len());

    for chunk in data.chunks(AES_BLOCK_SIZE) {
        stream = encrypt_with(&cipher, &stream);
        out.extend(chunk.iter().zip(stream.iter()).map(|(d, k)| d ^ k));
    }
    out
}

/// S0 CBC-MAC: `E(iv)` chained over `data` zero padded to the block size,
/// truncated to [`S0_MAC_SIZE`] bytes.
pub fn cbc_mac(key: &[u8; S0_KEY_SIZE], iv: &[u8; AES_BLOCK_SIZE], data: &[u8]) -> [u8; S0_MAC_SIZE] {
    let cipher = Aes128::new(key.into());
    let mut state = encrypt_with(&cipher, iv);

    for chunk in data.chunks(AES_BLOCK_SIZE) {
        for (s, d) in state.iter_mut().zip(chunk) {
            *s ^= d;
        }
        state = encrypt_with(&cipher, &state);
    }

    let mut mac = [0u8; S0_MAC_SIZE];
    mac.copy_from_slice(&state[..S0_MAC_SIZE]);
    mac
}

/// IV for one encapsulated message: sender nonce followed by receiver nonce.
pub fn message_iv(sender: &Nonce, receiver: &Nonce) -> [u8; AES_BLOCK_SIZE] {
    let mut iv = [0u8; AES_BLOCK_SIZE];
    iv[..S0_NONCE_SIZE].copy_from_slice(sender.as_bytes());
    iv[S0_NONCE_SIZE..].copy_from_slice(receiver.as_bytes());
    iv
}

/// Header the MAC authenticates ahead of the ciphertext. `None` when the
/// length does not fit its byte.
fn mac_input(command: u8, source: u8, destination: u8, ciphertext: &[u8]) -> Option<Vec<u8>> {
    let len = u8::try_from(ciphertext.len()).ok()?;
    let mut data = Vec::with_capacity(4 + ciphertext.len());
    data.extend_from_slice(&[command, source, destination, len]);
    data.extend_from_slice(ciphertext);
    Some(data)
}

/// Encrypt `plaintext` and compute its MAC.
///
/// Returns `(ciphertext, mac)`, or `None` if `plaintext` is longer than
/// 255 bytes.
pub fn seal(
    keys: &DerivedKeys,
    iv: &[u8; AES_BLOCK_SIZE],
    command: u8,
    source: u8,
    destination: u8,
    plaintext: &[u8],
) -> Option<(Vec<u8>, [u8; S0_MAC_SIZE])> {
    let ciphertext = aes_ofb(&keys.enc, iv, plaintext);
    let mac = cbc_mac(&keys.auth, iv, &mac_input(command, source, destination, &ciphertext)?);
    Some((ciphertext, mac))
}

/// Verify `mac` and decrypt `ciphertext`. `None` when the MAC does not match
/// or the ciphertext is too long to authenticate.
pub fn open(
    keys: &DerivedKeys,
    iv: &[u8; AES_BLOCK_SIZE],
    command: u8,
    source: u8,
    destination: u8,
    ciphertext: &[u8],
    mac: &[u8; S0_MAC_SIZE],
) -> Option<Vec<u8>> {
    let expected = cbc_mac(&keys.auth, iv, &mac_input(command, source, destination, ciphertext)?);
    let diff = expected.iter().zip(mac).fold(0u8, |acc, (a, b)| acc | (a ^ b));
    if diff != 0 {
        return None;
    }
    Some(aes_ofb(&keys.enc, iv, ciphertext))
}
