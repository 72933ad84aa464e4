//! Per-packet AES-128-CTR encryption with a derived initialization vector.
//!
//! Every audio frame in a session is encrypted under the session-static
//! key with a 16-byte counter derived from the session nonce base, the
//! ciphertext length and the frame sequence number. The wire packet is
//! the derived nonce followed by the ciphertext; there is no padding and
//! no authentication tag, and the receive side uses the embedded nonce
//! verbatim without validating it against an expected sequence. That is
//! inherited wire behavior required for interoperability, not a security
//! property of this module.

use aes::Aes128;
use anyhow::{Result, anyhow};
use ctr::Ctr128BE;
use ctr::cipher::{KeyIvInit, StreamCipher};

type Aes128Ctr = Ctr128BE<Aes128>;

/// Symmetric key length in bytes (AES-128)
pub const KEY_LEN: usize = 16;
/// Derived nonce / wire packet header length in bytes
pub const NONCE_LEN: usize = 16;

/// Derive the per-packet counter from the session nonce base.
///
/// Layout, big-endian where multi-byte:
/// - bytes 0..2   copied from the nonce base
/// - bytes 2..4   16-bit ciphertext payload length
/// - bytes 4..12  copied from the nonce base
/// - bytes 12..16 32-bit frame sequence
///
/// Coupling length and sequence into the counter gives every outbound
/// frame a distinct keystream even though the key is session-static.
pub fn derive_nonce(base: &[u8; NONCE_LEN], payload_len: u16, sequence: u32) -> [u8; NONCE_LEN] {
    let mut nonce = *base;
    nonce[2..4].copy_from_slice(&payload_len.to_be_bytes());
    nonce[12..16].copy_from_slice(&sequence.to_be_bytes());
    nonce
}

/// Apply the AES-128-CTR keystream in place. Encryption and decryption
/// are the same operation for a stream cipher.
pub fn apply_keystream(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], data: &mut [u8]) {
    let mut cipher = Aes128Ctr::new(key.into(), nonce.into());
    cipher.apply_keystream(data);
}

/// Encrypt one frame: returns the derived nonce and the ciphertext.
pub fn encrypt_frame(
    key: &[u8; KEY_LEN],
    nonce_base: &[u8; NONCE_LEN],
    sequence: u32,
    payload: &[u8],
) -> ([u8; NONCE_LEN], Vec<u8>) {
    let nonce = derive_nonce(nonce_base, payload.len() as u16, sequence);
    let mut ciphertext = payload.to_vec();
    apply_keystream(key, &nonce, &mut ciphertext);
    (nonce, ciphertext)
}

/// Decrypt a wire packet (`nonce || ciphertext`). The embedded nonce is
/// trusted as received.
pub fn decrypt_packet(key: &[u8; KEY_LEN], packet: &[u8]) -> Result<Vec<u8>> {
    if packet.len() < NONCE_LEN {
        return Err(anyhow!("datagram shorter than nonce header: {} bytes", packet.len()));
    }
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&packet[..NONCE_LEN]);
    let mut plaintext = packet[NONCE_LEN..].to_vec();
    apply_keystream(key, &nonce, &mut plaintext);
    Ok(plaintext)
}

/// Decode a hex-encoded 16-byte value (session key or nonce base).
pub fn decode_hex16(value: &str) -> Result<[u8; 16]> {
    let bytes = hex::decode(value).map_err(|e| anyhow!("invalid hex material: {}", e))?;
    let array: [u8; 16] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("expected 16 bytes of key material, got {}", bytes.len()))?;
    Ok(array)
}
