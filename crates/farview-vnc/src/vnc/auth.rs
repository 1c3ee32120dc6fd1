//! VNC authentication: legacy DES challenge-response (security type 2).

use cipher::{BlockEncrypt, KeyInit};
use des::Des;

/// Compute the 16-byte response to a VNC authentication challenge.
///
/// The password is truncated/zero-padded to 8 bytes and every key byte
/// is bit-reversed (the protocol's legacy quirk), then the challenge is
/// encrypted as two independent DES-ECB blocks.  Deterministic: a fixed
/// (password, challenge) pair always yields the same response.
pub fn vnc_auth_response(challenge: &[u8; 16], password: &str) -> [u8; 16] {
    let key = make_des_key(password);
    let mut response = [0u8; 16];
    response[..8].copy_from_slice(&des_encrypt_block(&key, &challenge[..8]));
    response[8..].copy_from_slice(&des_encrypt_block(&key, &challenge[8..]));
    response
}

/// Create the DES key from a VNC password: truncate/pad to 8 bytes,
/// then reverse the bit order within each byte.
fn make_des_key(password: &str) -> [u8; 8] {
    let mut key = [0u8; 8];
    let bytes = password.as_bytes();
    let len = bytes.len().min(8);
    key[..len].copy_from_slice(&bytes[..len]);
    for b in &mut key {
        *b = reverse_bits(*b);
    }
    key
}

/// Reverse the bits in a byte.
fn reverse_bits(mut b: u8) -> u8 {
    let mut result = 0u8;
    for _ in 0..8 {
        result = (result << 1) | (b & 1);
        b >>= 1;
    }
    result
}

/// DES-ECB encryption of a single 8-byte block.
fn des_encrypt_block(key: &[u8; 8], block: &[u8]) -> [u8; 8] {
    let cipher = Des::new_from_slice(key).expect("DES key must be 8 bytes");
    let mut output = cipher::generic_array::GenericArray::clone_from_slice(&block[..8]);
    cipher.encrypt_block(&mut output);
    let mut result = [0u8; 8];
    result.copy_from_slice(&output);
    result
}
