//! Cryptography for the tracker sync engine.
//!
//! - **Identity**: an Ed25519 keypair that signs every event
//! - **Pairwise keys**: X25519 agreement between two identities, hashed with SHA-256
//! - **Payloads**: ChaCha20-Poly1305 with a fresh 96-bit nonce per gift wrap
//!
//! The sync layer consumes this crate only through [`CryptoProvider`].

mod cipher;
mod error;
mod key;
mod provider;
mod signing;

pub use cipher::{decrypt, encrypt_with_nonce, generate_nonce, SealedPayload, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_shared_key, parse_public_key, DerivedKey, Identity, KEY_SIZE};
pub use provider::{CryptoProvider, DefaultCryptoProvider};
pub use signing::{event_id, sign_event, verify_event};
