//! Ed25519 signing keys (RFC 8032).
//!
//! Public keys are 32 raw bytes, signatures 64 bytes. Signing operates on the
//! message directly; no prehash is applied.

use ed25519_dalek::{Signer as _, Verifier as _};
use rand::rngs::OsRng;

use crate::error::SageError;

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

pub fn generate() -> ed25519_dalek::SigningKey {
    ed25519_dalek::SigningKey::generate(&mut OsRng)
}

pub fn secret_from_bytes(bytes: &[u8]) -> Result<ed25519_dalek::SigningKey, SageError> {
    let seed: [u8; 32] = bytes.try_into().map_err(|_| {
        SageError::InvalidArgument(format!(
            "Ed25519 secret key must be 32 bytes, got {}",
            bytes.len()
        ))
    })?;
    Ok(ed25519_dalek::SigningKey::from_bytes(&seed))
}

pub fn public_from_bytes(bytes: &[u8]) -> Result<ed25519_dalek::VerifyingKey, SageError> {
    let raw: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| {
        SageError::InvalidArgument(format!(
            "Ed25519 public key must be {} bytes, got {}",
            PUBLIC_KEY_LEN,
            bytes.len()
        ))
    })?;
    ed25519_dalek::VerifyingKey::from_bytes(&raw)
        .map_err(|_| SageError::InvalidArgument("Ed25519 public key not a valid point".into()))
}

pub fn sign(key: &ed25519_dalek::SigningKey, msg: &[u8]) -> Vec<u8> {
    key.sign(msg).to_bytes().to_vec()
}

pub fn verify(
    key: &ed25519_dalek::VerifyingKey,
    msg: &[u8],
    sig: &[u8],
) -> Result<(), SageError> {
    if sig.len() != SIGNATURE_LEN {
        return Err(SageError::InvalidSignature(format!(
            "Ed25519 signature must be {} bytes, got {}",
            SIGNATURE_LEN,
            sig.len()
        )));
    }
    let sig = ed25519_dalek::Signature::from_slice(sig)
        .map_err(|_| SageError::InvalidSignature("malformed Ed25519 signature".into()))?;
    key.verify(msg, &sig)
        .map_err(|_| SageError::InvalidSignature("Ed25519 verification failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let sk = generate();
        let pk = sk.verifying_key();
        let sig = sign(&sk, b"agent message");
        assert_eq!(sig.len(), SIGNATURE_LEN);
        verify(&pk, b"agent message", &sig).unwrap();
        assert!(verify(&pk, b"tampered", &sig).is_err());
    }

    #[test]
    fn rejects_truncated_signature() {
        let sk = generate();
        let pk = sk.verifying_key();
        let sig = sign(&sk, b"m");
        let err = verify(&pk, b"m", &sig[..63]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidSignature);
    }
}
