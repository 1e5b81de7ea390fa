//! X25519 key-agreement keys, used only for ECDH inside the HPKE handshake.

use rand::rngs::OsRng;

use crate::error::SageError;

pub const PUBLIC_KEY_LEN: usize = 32;

pub fn generate() -> x25519_dalek::StaticSecret {
    x25519_dalek::StaticSecret::random_from_rng(OsRng)
}

pub fn secret_from_bytes(bytes: &[u8]) -> Result<x25519_dalek::StaticSecret, SageError> {
    let raw: [u8; 32] = bytes.try_into().map_err(|_| {
        SageError::InvalidArgument(format!(
            "X25519 secret key must be 32 bytes, got {}",
            bytes.len()
        ))
    })?;
    Ok(x25519_dalek::StaticSecret::from(raw))
}

pub fn public_from_bytes(bytes: &[u8]) -> Result<x25519_dalek::PublicKey, SageError> {
    let raw: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| {
        SageError::InvalidArgument(format!(
            "X25519 public key must be {} bytes, got {}",
            PUBLIC_KEY_LEN,
            bytes.len()
        ))
    })?;
    Ok(x25519_dalek::PublicKey::from(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreement_is_symmetric() {
        let a = generate();
        let b = generate();
        let a_pub = x25519_dalek::PublicKey::from(&a);
        let b_pub = x25519_dalek::PublicKey::from(&b);
        let ab = a.diffie_hellman(&b_pub);
        let ba = b.diffie_hellman(&a_pub);
        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }

    #[test]
    fn public_key_length_enforced() {
        assert!(public_from_bytes(&[0u8; 31]).is_err());
        assert!(public_from_bytes(&[0u8; 32]).is_ok());
    }
}
