//! Key algebra: generation, parsing, signing, and verification for the
//! long-term key types an agent may register.
//!
//! Algorithm-specific rules (point encodings, signature widths, prehashing)
//! live in the per-algorithm submodules; this module provides the
//! type-dispatching wrappers the rest of the crate works with.

pub mod ed25519;
pub mod p256;
pub mod secp256k1;
pub mod x25519;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SageError;

/// Registered key types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    Ed25519,
    EcdsaP256,
    EcdsaSecp256k1,
    X25519,
}

impl KeyType {
    /// Whether keys of this type produce signatures (as opposed to key agreement).
    pub fn is_signing(&self) -> bool {
        !matches!(self, KeyType::X25519)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Ed25519 => "ed25519",
            KeyType::EcdsaP256 => "ecdsa-p256",
            KeyType::EcdsaSecp256k1 => "ecdsa-secp256k1",
            KeyType::X25519 => "x25519",
        }
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RFC 9421-style signature algorithm identifiers.
///
/// Each algorithm accepts its registry name and the JOSE-style alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    Ed25519,
    EcdsaP256Sha256,
    EcdsaSecp256k1Sha256,
    /// Session-bound MAC; keyed by session id rather than a long-term key.
    HmacSha256,
}

impl SignatureAlgorithm {
    /// Parse an algorithm identifier. Unknown identifiers fail
    /// `unsupported-algorithm`.
    pub fn parse(s: &str) -> Result<Self, SageError> {
        match s {
            "ed25519" | "EdDSA" => Ok(Self::Ed25519),
            "ecdsa-p256-sha256" | "ES256" => Ok(Self::EcdsaP256Sha256),
            "ecdsa-secp256k1-sha256" | "ES256K" => Ok(Self::EcdsaSecp256k1Sha256),
            "hmac-sha256" => Ok(Self::HmacSha256),
            other => Err(SageError::UnsupportedAlgorithm(other.to_owned())),
        }
    }

    /// The canonical identifier written into `Signature-Input`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::EcdsaP256Sha256 => "ecdsa-p256-sha256",
            Self::EcdsaSecp256k1Sha256 => "ecdsa-secp256k1-sha256",
            Self::HmacSha256 => "hmac-sha256",
        }
    }

    /// The key type able to produce or verify this algorithm, if any.
    pub fn key_type(&self) -> Option<KeyType> {
        match self {
            Self::Ed25519 => Some(KeyType::Ed25519),
            Self::EcdsaP256Sha256 => Some(KeyType::EcdsaP256),
            Self::EcdsaSecp256k1Sha256 => Some(KeyType::EcdsaSecp256k1),
            Self::HmacSha256 => None,
        }
    }

    /// Infer the algorithm from a key type, for signatures that omit `alg`.
    pub fn for_key_type(kt: KeyType) -> Result<Self, SageError> {
        match kt {
            KeyType::Ed25519 => Ok(Self::Ed25519),
            KeyType::EcdsaP256 => Ok(Self::EcdsaP256Sha256),
            KeyType::EcdsaSecp256k1 => Ok(Self::EcdsaSecp256k1Sha256),
            KeyType::X25519 => Err(SageError::UnsupportedAlgorithm(
                "x25519 keys cannot sign".into(),
            )),
        }
    }
}

impl std::fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed public key of any supported type.
#[derive(Debug, Clone)]
pub enum PublicKey {
    Ed25519(ed25519_dalek::VerifyingKey),
    EcdsaP256(::p256::ecdsa::VerifyingKey),
    EcdsaSecp256k1(::k256::ecdsa::VerifyingKey),
    X25519(x25519_dalek::PublicKey),
}

impl PublicKey {
    pub fn key_type(&self) -> KeyType {
        match self {
            Self::Ed25519(_) => KeyType::Ed25519,
            Self::EcdsaP256(_) => KeyType::EcdsaP256,
            Self::EcdsaSecp256k1(_) => KeyType::EcdsaSecp256k1,
            Self::X25519(_) => KeyType::X25519,
        }
    }

    /// Parse serialized key material of a known type.
    pub fn from_bytes(kt: KeyType, bytes: &[u8]) -> Result<Self, SageError> {
        match kt {
            KeyType::Ed25519 => Ok(Self::Ed25519(ed25519::public_from_bytes(bytes)?)),
            KeyType::EcdsaP256 => Ok(Self::EcdsaP256(p256::public_from_sec1(bytes)?)),
            KeyType::EcdsaSecp256k1 => {
                Ok(Self::EcdsaSecp256k1(secp256k1::public_from_sec1(bytes)?))
            }
            KeyType::X25519 => Ok(Self::X25519(x25519::public_from_bytes(bytes)?)),
        }
    }

    /// Canonical serialization: raw 32 bytes for Ed25519/X25519, compressed
    /// SEC1 for the ECDSA curves.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Ed25519(k) => k.to_bytes().to_vec(),
            Self::EcdsaP256(k) => p256::public_to_sec1(k),
            Self::EcdsaSecp256k1(k) => secp256k1::public_to_sec1(k),
            Self::X25519(k) => k.as_bytes().to_vec(),
        }
    }

    /// Verify `sig` over `msg` with the given algorithm.
    ///
    /// The algorithm must be type-compatible with the key; pass `None` to
    /// infer it from the key type.
    pub fn verify(
        &self,
        algorithm: Option<SignatureAlgorithm>,
        msg: &[u8],
        sig: &[u8],
    ) -> Result<(), SageError> {
        let alg = match algorithm {
            Some(a) => a,
            None => SignatureAlgorithm::for_key_type(self.key_type())?,
        };
        if alg.key_type() != Some(self.key_type()) {
            return Err(SageError::UnsupportedAlgorithm(format!(
                "algorithm {alg} incompatible with {} key",
                self.key_type()
            )));
        }
        match (self, alg) {
            (Self::Ed25519(k), SignatureAlgorithm::Ed25519) => ed25519::verify(k, msg, sig),
            (Self::EcdsaP256(k), SignatureAlgorithm::EcdsaP256Sha256) => {
                p256::verify(k, msg, sig)
            }
            (Self::EcdsaSecp256k1(k), SignatureAlgorithm::EcdsaSecp256k1Sha256) => {
                secp256k1::verify(k, msg, sig)
            }
            _ => Err(SageError::UnsupportedAlgorithm(alg.as_str().into())),
        }
    }

    /// Hex SHA-256 of the canonical serialization; the default `keyid`.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.to_bytes()))
    }

    /// Ethereum address, for secp256k1 keys only.
    pub fn eth_address(&self) -> Option<String> {
        match self {
            Self::EcdsaSecp256k1(k) => Some(secp256k1::eth_address_hex(k)),
            _ => None,
        }
    }
}

/// A private key of any supported type. Underlying scalars are zeroized on
/// drop by their implementations.
#[derive(Clone)]
pub enum PrivateKey {
    Ed25519(ed25519_dalek::SigningKey),
    EcdsaP256(::p256::ecdsa::SigningKey),
    EcdsaSecp256k1(::k256::ecdsa::SigningKey),
    X25519(x25519_dalek::StaticSecret),
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_tuple("PrivateKey")
            .field(&self.key_type())
            .finish()
    }
}

impl PrivateKey {
    pub fn key_type(&self) -> KeyType {
        match self {
            Self::Ed25519(_) => KeyType::Ed25519,
            Self::EcdsaP256(_) => KeyType::EcdsaP256,
            Self::EcdsaSecp256k1(_) => KeyType::EcdsaSecp256k1,
            Self::X25519(_) => KeyType::X25519,
        }
    }

    pub fn from_bytes(kt: KeyType, bytes: &[u8]) -> Result<Self, SageError> {
        match kt {
            KeyType::Ed25519 => Ok(Self::Ed25519(ed25519::secret_from_bytes(bytes)?)),
            KeyType::EcdsaP256 => Ok(Self::EcdsaP256(p256::secret_from_bytes(bytes)?)),
            KeyType::EcdsaSecp256k1 => {
                Ok(Self::EcdsaSecp256k1(secp256k1::secret_from_bytes(bytes)?))
            }
            KeyType::X25519 => Ok(Self::X25519(x25519::secret_from_bytes(bytes)?)),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            Self::Ed25519(k) => PublicKey::Ed25519(k.verifying_key()),
            Self::EcdsaP256(k) => PublicKey::EcdsaP256(*k.verifying_key()),
            Self::EcdsaSecp256k1(k) => PublicKey::EcdsaSecp256k1(*k.verifying_key()),
            Self::X25519(k) => PublicKey::X25519(x25519_dalek::PublicKey::from(k)),
        }
    }

    /// Sign `msg`. Fails `unsupported-algorithm` for key-agreement keys.
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, SageError> {
        match self {
            Self::Ed25519(k) => Ok(ed25519::sign(k, msg)),
            Self::EcdsaP256(k) => Ok(p256::sign(k, msg)),
            Self::EcdsaSecp256k1(k) => Ok(secp256k1::sign(k, msg)),
            Self::X25519(_) => Err(SageError::UnsupportedAlgorithm(
                "x25519 keys cannot sign".into(),
            )),
        }
    }
}

/// A generated or imported key pair.
#[derive(Debug, Clone)]
pub struct KeyPair {
    private: PrivateKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair of the given type.
    pub fn generate(kt: KeyType) -> Self {
        let private = match kt {
            KeyType::Ed25519 => PrivateKey::Ed25519(ed25519::generate()),
            KeyType::EcdsaP256 => PrivateKey::EcdsaP256(p256::generate()),
            KeyType::EcdsaSecp256k1 => PrivateKey::EcdsaSecp256k1(secp256k1::generate()),
            KeyType::X25519 => PrivateKey::X25519(x25519::generate()),
        };
        let public = private.public_key();
        KeyPair { private, public }
    }

    /// Import a key pair from serialized secret material.
    pub fn from_secret_bytes(kt: KeyType, bytes: &[u8]) -> Result<Self, SageError> {
        let private = PrivateKey::from_bytes(kt, bytes)?;
        let public = private.public_key();
        Ok(KeyPair { private, public })
    }

    pub fn key_type(&self) -> KeyType {
        self.private.key_type()
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private
    }

    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, SageError> {
        self.private.sign(msg)
    }

    /// The signature algorithm this pair naturally produces.
    pub fn algorithm(&self) -> Result<SignatureAlgorithm, SageError> {
        SignatureAlgorithm::for_key_type(self.key_type())
    }
}
