//! Gift-wrap payload sealing with ChaCha20-Poly1305.
//!
//! A sealed payload travels in event content as base64 of `nonce || ciphertext`.
//! The nonce is chosen by the caller, fresh per wrap.

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

/// Size of nonce in bytes (96 bits for ChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 12;

/// Size of authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// A ciphertext and the nonce it was sealed with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedPayload {
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext followed by the Poly1305 tag.
    pub ciphertext: Vec<u8>,
}

impl SealedPayload {
    /// The content-field form: base64 of `nonce || ciphertext`.
    pub fn to_base64(&self) -> String {
        let mut framed = Vec::with_capacity(NONCE_SIZE + self.ciphertext.len());
        framed.extend_from_slice(&self.nonce);
        framed.extend_from_slice(&self.ciphertext);
        STANDARD.encode(framed)
    }

    /// Splits a content field back into nonce and ciphertext.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let framed = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::Decryption(format!("invalid base64: {e}")))?;
        if framed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Decryption(format!(
                "sealed payload too short ({} bytes)",
                framed.len()
            )));
        }

        let (nonce, ciphertext) = framed.split_at(NONCE_SIZE);
        let mut fixed = [0u8; NONCE_SIZE];
        fixed.copy_from_slice(nonce);
        Ok(Self {
            nonce: fixed,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// Generates a fresh random nonce.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Seals `plaintext` under `key`. A nonce must never be reused with the same key.
pub fn encrypt_with_nonce(
    key: &DerivedKey,
    plaintext: &[u8],
    nonce: &[u8; NONCE_SIZE],
) -> CryptoResult<SealedPayload> {
    let ciphertext = ChaCha20Poly1305::new(key.as_bytes().into())
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    Ok(SealedPayload {
        nonce: *nonce,
        ciphertext,
    })
}

/// Opens a sealed payload. Fails on a wrong key or any modified byte.
pub fn decrypt(key: &DerivedKey, sealed: &SealedPayload) -> CryptoResult<Vec<u8>> {
    ChaCha20Poly1305::new(key.as_bytes().into())
        .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
        .map_err(|_| CryptoError::Decryption("decryption failed (wrong key or tampered data)".into()))
}
