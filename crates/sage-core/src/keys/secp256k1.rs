//! ECDSA over secp256k1 in the Ethereum convention.
//!
//! SEC1 point encoding (compressed or uncompressed); signatures are raw
//! 64-byte `r ‖ s`, big-endian and left-padded — never ASN.1 DER. The message
//! is hashed with SHA-256 before signing. The Ethereum address of a key is
//! `keccak256(X ‖ Y)[12..]`.

use k256::ecdsa::signature::{Signer as _, Verifier as _};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha3::{Digest, Keccak256};

use crate::error::SageError;

pub const RAW_SIGNATURE_LEN: usize = 64;
pub const ETH_ADDRESS_LEN: usize = 20;

pub fn generate() -> SigningKey {
    SigningKey::random(&mut OsRng)
}

pub fn secret_from_bytes(bytes: &[u8]) -> Result<SigningKey, SageError> {
    SigningKey::from_slice(bytes)
        .map_err(|_| SageError::InvalidArgument("invalid secp256k1 secret scalar".into()))
}

pub fn public_from_sec1(bytes: &[u8]) -> Result<VerifyingKey, SageError> {
    VerifyingKey::from_sec1_bytes(bytes)
        .map_err(|_| SageError::InvalidArgument("invalid SEC1 secp256k1 public key".into()))
}

/// Compressed SEC1 form (`0x02|0x03 ‖ X`).
pub fn public_to_sec1(key: &VerifyingKey) -> Vec<u8> {
    key.to_encoded_point(true).as_bytes().to_vec()
}

/// Signs SHA-256(msg), returning raw `r ‖ s`.
pub fn sign(key: &SigningKey, msg: &[u8]) -> Vec<u8> {
    let sig: Signature = key.sign(msg);
    sig.to_bytes().to_vec()
}

pub fn verify(key: &VerifyingKey, msg: &[u8], sig: &[u8]) -> Result<(), SageError> {
    if sig.len() != RAW_SIGNATURE_LEN {
        return Err(SageError::InvalidSignature(format!(
            "secp256k1 signature must be {} raw bytes, got {}",
            RAW_SIGNATURE_LEN,
            sig.len()
        )));
    }
    let sig = Signature::from_slice(sig)
        .map_err(|_| SageError::InvalidSignature("secp256k1 r or s out of range".into()))?;
    key.verify(msg, &sig)
        .map_err(|_| SageError::InvalidSignature("secp256k1 verification failed".into()))
}

/// Ethereum address of a public key: `keccak256(X ‖ Y)[12..]`.
pub fn eth_address(key: &VerifyingKey) -> [u8; ETH_ADDRESS_LEN] {
    let point = key.to_encoded_point(false);
    // Skip the 0x04 SEC1 tag; hash the 64-byte X ‖ Y coordinates.
    let digest = Keccak256::digest(&point.as_bytes()[1..]);
    let mut addr = [0u8; ETH_ADDRESS_LEN];
    addr.copy_from_slice(&digest[12..]);
    addr
}

/// `0x`-prefixed lowercase hex rendering of [`eth_address`].
pub fn eth_address_hex(key: &VerifyingKey) -> String {
    format!("0x{}", hex::encode(eth_address(key)))
}

/// EIP-55 mixed-case checksum rendering of an address.
///
/// A hex digit is uppercased when the corresponding nibble of
/// `keccak256(lowercase-hex-address)` is `>= 8`.
pub fn to_checksum_address(address: &[u8; ETH_ADDRESS_LEN]) -> String {
    let lower = hex::encode(address);
    let hash = Keccak256::digest(lower.as_bytes());
    let mut out = String::with_capacity(2 + lower.len());
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            hash.get(i / 2).copied().unwrap_or(0) >> 4
        } else {
            hash.get(i / 2).copied().unwrap_or(0) & 0x0f
        };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}
