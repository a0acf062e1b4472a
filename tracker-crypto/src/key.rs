//! Identity keys and pairwise key derivation.
//!
//! An identity is a single Ed25519 keypair. It signs events directly, and
//! its birationally-equivalent X25519 form performs Diffie-Hellman with a
//! counterpart's identity key to derive a symmetric conversation key.

use crate::error::{CryptoError, CryptoResult};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of symmetric keys in bytes (256 bits for ChaCha20).
pub const KEY_SIZE: usize = 32;

/// Domain separation label mixed into every conversation key.
const CONVERSATION_KEY_LABEL: &[u8] = b"tracker-conversation-v1";

/// A symmetric key with automatic zeroization on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    /// Creates a key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The local user's keypair. The private half never leaves this type except
/// through [`Identity::secret_hex`], which exists for handing it back to a
/// key vault.
#[derive(Clone)]
pub struct Identity {
    signing: SigningKey,
    public_hex: String,
}

impl Identity {
    /// Generates a fresh random identity.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Restores an identity from a 32-byte secret.
    pub fn from_secret_bytes(bytes: &[u8; KEY_SIZE]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(bytes))
    }

    /// Restores an identity from a hex-encoded 32-byte secret.
    pub fn from_secret_hex(secret: &str) -> CryptoResult<Self> {
        let bytes = Zeroizing::new(decode_key_hex(secret)?);
        Ok(Self::from_secret_bytes(&bytes))
    }

    fn from_signing_key(signing: SigningKey) -> Self {
        let public_hex = hex::encode(signing.verifying_key().to_bytes());
        Self {
            signing,
            public_hex,
        }
    }

    /// Hex-encoded public key, as it appears in event `pubkey` and `p` tags.
    pub fn public_key(&self) -> &str {
        &self.public_hex
    }

    /// Hex-encoded secret key.
    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.signing.to_bytes()))
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_hex)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

fn decode_key_hex(s: &str) -> CryptoResult<[u8; KEY_SIZE]> {
    let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidKey(format!("invalid hex: {e}")))?;
    if bytes.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: bytes.len(),
        });
    }
    let mut out = [0u8; KEY_SIZE];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Parses a hex-encoded public key.
pub fn parse_public_key(hex_key: &str) -> CryptoResult<VerifyingKey> {
    let bytes = decode_key_hex(hex_key)?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| CryptoError::InvalidKey(format!("not a valid public key: {e}")))
}

/// Derives the symmetric conversation key shared between `identity` and the
/// holder of `counterpart`. Symmetric: both parties derive the same key.
pub fn derive_shared_key(identity: &Identity, counterpart: &str) -> CryptoResult<DerivedKey> {
    let counterpart = parse_public_key(counterpart)?;

    let secret = x25519_dalek::StaticSecret::from(identity.signing_key().to_scalar_bytes());
    let public = x25519_dalek::PublicKey::from(counterpart.to_montgomery().to_bytes());
    let shared = secret.diffie_hellman(&public);
    if !shared.was_contributory() {
        return Err(CryptoError::KeyDerivation(
            "counterpart key produced a non-contributory shared secret".to_string(),
        ));
    }

    let mut hasher = Sha256::new();
    hasher.update(CONVERSATION_KEY_LABEL);
    hasher.update(shared.as_bytes());
    Ok(DerivedKey::from_bytes(hasher.finalize().into()))
}
