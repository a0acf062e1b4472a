//! Event ids and Ed25519 event signatures.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{parse_public_key, Identity};
use ed25519_dalek::{Signature, Signer as _};
use sha2::{Digest, Sha256};
use tracker_types::{Event, UnsignedEvent};

/// Computes the hex event id: SHA-256 of the canonical serialization.
pub fn event_id(template: &UnsignedEvent) -> CryptoResult<String> {
    let canonical = template.canonical_json()?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

/// Signs a template as `identity`. The template's `pubkey` is replaced with
/// the identity's key so the result always verifies.
pub fn sign_event(mut template: UnsignedEvent, identity: &Identity) -> CryptoResult<Event> {
    template.pubkey = identity.public_key().to_string();
    let id = event_id(&template)?;
    let id_bytes =
        hex::decode(&id).map_err(|e| CryptoError::Signing(format!("bad event id: {e}")))?;
    let sig = identity.signing_key().sign(&id_bytes);

    Ok(Event {
        id,
        pubkey: template.pubkey,
        created_at: template.created_at,
        kind: template.kind,
        tags: template.tags,
        content: template.content,
        sig: hex::encode(sig.to_bytes()),
    })
}

/// Returns true iff the id matches the content and the signature verifies
/// against the event's own `pubkey`.
pub fn verify_event(event: &Event) -> bool {
    let Ok(expected_id) = event_id(&event.unsigned()) else {
        return false;
    };
    if expected_id != event.id {
        return false;
    }
    let Ok(key) = parse_public_key(&event.pubkey) else {
        return false;
    };
    let Ok(id_bytes) = hex::decode(&event.id) else {
        return false;
    };
    let Some(sig_bytes) = hex::decode(&event.sig)
        .ok()
        .and_then(|b| <[u8; 64]>::try_from(b.as_slice()).ok())
    else {
        return false;
    };
    key.verify_strict(&id_bytes, &Signature::from_bytes(&sig_bytes))
        .is_ok()
}
