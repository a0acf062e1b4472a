//! Abstract crypto interface consumed by the sync engine.
//!
//! The engine depends on `Arc<dyn CryptoProvider>` and never touches key
//! bytes or cipher internals directly. `DefaultCryptoProvider` wires the
//! trait to this crate's Ed25519 / X25519 / ChaCha20-Poly1305 functions;
//! tests can substitute their own implementation.

use crate::cipher::{self, SealedPayload, NONCE_SIZE};
use crate::error::CryptoResult;
use crate::key::{self, DerivedKey, Identity};
use crate::signing;
use tracker_types::{Event, UnsignedEvent};

/// Signing, verification, key agreement and payload encryption.
pub trait CryptoProvider: Send + Sync {
    /// Hashes and signs a template as `identity`.
    fn sign(&self, template: UnsignedEvent, identity: &Identity) -> CryptoResult<Event>;

    /// Checks the id and signature of an event.
    fn verify(&self, event: &Event) -> bool;

    /// Derives the pairwise key between `identity` and `counterpart` (hex public key).
    fn derive_shared_key(&self, identity: &Identity, counterpart: &str) -> CryptoResult<DerivedKey>;

    /// Encrypts `plaintext`, returning the self-describing ciphertext string.
    fn encrypt(
        &self,
        plaintext: &[u8],
        key: &DerivedKey,
        nonce: &[u8; NONCE_SIZE],
    ) -> CryptoResult<String>;

    /// Decrypts a string produced by [`CryptoProvider::encrypt`].
    fn decrypt(&self, ciphertext: &str, key: &DerivedKey) -> CryptoResult<Vec<u8>>;
}

/// The production provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCryptoProvider;

impl CryptoProvider for DefaultCryptoProvider {
    fn sign(&self, template: UnsignedEvent, identity: &Identity) -> CryptoResult<Event> {
        signing::sign_event(template, identity)
    }

    fn verify(&self, event: &Event) -> bool {
        signing::verify_event(event)
    }

    fn derive_shared_key(&self, identity: &Identity, counterpart: &str) -> CryptoResult<DerivedKey> {
        key::derive_shared_key(identity, counterpart)
    }

    fn encrypt(
        &self,
        plaintext: &[u8],
        key: &DerivedKey,
        nonce: &[u8; NONCE_SIZE],
    ) -> CryptoResult<String> {
        Ok(cipher::encrypt_with_nonce(key, plaintext, nonce)?.to_base64())
    }

    fn decrypt(&self, ciphertext: &str, key: &DerivedKey) -> CryptoResult<Vec<u8>> {
        let sealed = SealedPayload::from_base64(ciphertext)?;
        cipher::decrypt(key, &sealed)
    }
}
