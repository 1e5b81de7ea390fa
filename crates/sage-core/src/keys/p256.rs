//! ECDSA over NIST P-256 with SHA-256 message hashing.
//!
//! Public keys use SEC1 encoding, compressed (33 bytes) or uncompressed
//! (65 bytes). Signatures are produced as raw fixed-width `r ‖ s` (64 bytes);
//! verification also accepts ASN.1 DER input.

use p256::ecdsa::signature::{Signer as _, Verifier as _};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::SageError;

pub const RAW_SIGNATURE_LEN: usize = 64;

pub fn generate() -> SigningKey {
    SigningKey::random(&mut OsRng)
}

pub fn secret_from_bytes(bytes: &[u8]) -> Result<SigningKey, SageError> {
    SigningKey::from_slice(bytes)
        .map_err(|_| SageError::InvalidArgument("invalid P-256 secret scalar".into()))
}

pub fn public_from_sec1(bytes: &[u8]) -> Result<VerifyingKey, SageError> {
    VerifyingKey::from_sec1_bytes(bytes)
        .map_err(|_| SageError::InvalidArgument("invalid SEC1 P-256 public key".into()))
}

/// Compressed SEC1 form (`0x02|0x03 ‖ X`).
pub fn public_to_sec1(key: &VerifyingKey) -> Vec<u8> {
    key.to_encoded_point(true).as_bytes().to_vec()
}

/// Signs SHA-256(msg), returning raw `r ‖ s`, each 32 bytes big-endian.
pub fn sign(key: &SigningKey, msg: &[u8]) -> Vec<u8> {
    let sig: Signature = key.sign(msg);
    sig.to_bytes().to_vec()
}

fn parse_signature(sig: &[u8]) -> Result<Signature, SageError> {
    // Raw form first; DER as the interoperability fallback. Scalar range
    // checks (r, s nonzero and below n) happen inside the parser.
    if sig.len() == RAW_SIGNATURE_LEN {
        Signature::from_slice(sig)
            .map_err(|_| SageError::InvalidSignature("P-256 r or s out of range".into()))
    } else {
        Signature::from_der(sig)
            .map_err(|_| SageError::InvalidSignature("malformed P-256 signature".into()))
    }
}

pub fn verify(key: &VerifyingKey, msg: &[u8], sig: &[u8]) -> Result<(), SageError> {
    let sig = parse_signature(sig)?;
    key.verify(msg, &sig)
        .map_err(|_| SageError::InvalidSignature("P-256 verification failed".into()))
}
