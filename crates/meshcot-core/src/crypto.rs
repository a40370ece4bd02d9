//! Channel payload decryption
//!
//! Meshtastic channel payloads are encrypted with AES-256 in counter mode.
//! The 128-bit counter block is seeded from the packet nonce interpreted as
//! a big-endian integer; nonces shorter than 16 bytes are right-aligned.

use aes::cipher::{KeyIvInit, StreamCipher};
use aes::Aes256;
use thiserror::Error;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Required channel key length in bytes (AES-256)
pub const CHANNEL_KEY_LEN: usize = 32;

/// Counter block width in bytes
pub const COUNTER_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("channel key must be {CHANNEL_KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("cipher failure: {0}")]
    Cipher(String),
}

/// Decrypt one channel payload.
///
/// Stateless; the caller drops the packet on any error since the upstream
/// transport never replays ciphertext.
pub fn decrypt_payload(
    key: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if key.len() != CHANNEL_KEY_LEN {
        return Err(CryptoError::InvalidKeyLength(key.len()));
    }

    // Big-endian counter seed: a short nonce fills the low-order bytes
    let mut counter = [0u8; COUNTER_LEN];
    let take = nonce.len().min(COUNTER_LEN);
    counter[COUNTER_LEN - take..].copy_from_slice(&nonce[nonce.len() - take..]);

    let mut cipher = Aes256Ctr::new_from_slices(key, &counter)
        .map_err(|e| CryptoError::Cipher(e.to_string()))?;

    let mut buf = ciphertext.to_vec();
    cipher.apply_keystream(&mut buf);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> Vec<u8> {
        (0u8..32).collect()
    }

    #[test]
    fn rejects_short_key() {
        let err = decrypt_payload(&[0u8; 16], &[0u8; 16], b"payload").unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeyLength(16)));
    }

    #[test]
    fn rejects_long_key() {
        let err = decrypt_payload(&[0u8; 33], &[0u8; 16], b"payload").unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeyLength(33)));
    }

    #[test]
    fn round_trips_arbitrary_bytes() {
        let key = test_key();
        let nonce = [7u8; 16];
        let plaintext = b"telemetry packet contents, any length at all".to_vec();

        // CTR mode is its own inverse
        let ciphertext = decrypt_payload(&key, &nonce, &plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);
        let recovered = decrypt_payload(&key, &nonce, &ciphertext).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn short_nonce_is_right_aligned() {
        let key = test_key();
        let short = [0xAA, 0xBB, 0xCC, 0xDD];
        let mut padded = [0u8; 16];
        padded[12..].copy_from_slice(&short);

        let a = decrypt_payload(&key, &short, b"same input").unwrap();
        let b = decrypt_payload(&key, &padded, b"same input").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_nonce_changes_keystream() {
        let key = test_key();
        let a = decrypt_payload(&key, &[1u8; 16], b"same input").unwrap();
        let b = decrypt_payload(&key, &[2u8; 16], b"same input").unwrap();
        assert_ne!(a, b);
    }
}
