//! Ed25519 signing and verification for peer envelopes (§3.4, §3.5, §4.7).
//!
//! Ed25519 is "a widely available public-key algorithm" per §6; any
//! implementation choice is conforming as long as peers agree on one.

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::{CryptoError, CryptoResult};

/// A peer's signing identity. `public_key_hex` is what gets published on a
/// peer record and exchanged in a handshake.
pub struct PeerSigningKey(SigningKey);

impl PeerSigningKey {
    pub fn generate() -> Self {
        Self(SigningKey::generate(&mut OsRng))
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(SigningKey::from_bytes(bytes))
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.0.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> String {
        hex::encode(self.0.sign(message).to_bytes())
    }
}

/// Verify `signature_hex` over `message` against `public_key_hex`.
///
/// Returns `Ok(())` on a valid signature, or a [`CryptoError`] describing
/// why verification could not even be attempted (bad encoding) or why it
/// failed (bad signature). Callers that only care "valid or not" should
/// collapse both to a boolean at the protocol layer per §4.7 step 1.
pub fn verify(public_key_hex: &str, message: &[u8], signature_hex: &str) -> CryptoResult<()> {
    let key_bytes: [u8; 32] = hex::decode(public_key_hex)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("public key must be 32 bytes".to_string()))?;
    let verifying_key =
        VerifyingKey::from_bytes(&key_bytes).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

    let sig_bytes: [u8; 64] = hex::decode(signature_hex)
        .map_err(|_| CryptoError::SignatureVerificationFailed)?
        .try_into()
        .map_err(|_| CryptoError::SignatureVerificationFailed)?;
    let signature = Signature::from_bytes(&sig_bytes);

    verifying_key
        .verify(message, &signature)
        .map_err(|_| CryptoError::SignatureVerificationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let key = PeerSigningKey::generate();
        let message = b"peer-1:sync-42:1700000000:abcdef:7";
        let sig = key.sign(message);
        verify(&key.public_key_hex(), message, &sig).unwrap();
    }

    #[test]
    fn tampered_message_fails_verification() {
        let key = PeerSigningKey::generate();
        let sig = key.sign(b"original");
        let err = verify(&key.public_key_hex(), b"tampered", &sig).unwrap_err();
        assert!(matches!(err, CryptoError::SignatureVerificationFailed));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let key = PeerSigningKey::generate();
        let other = PeerSigningKey::generate();
        let sig = key.sign(b"message");
        let err = verify(&other.public_key_hex(), b"message", &sig).unwrap_err();
        assert!(matches!(err, CryptoError::SignatureVerificationFailed));
    }
}
