//! Hybrid Public Key Encryption (RFC 9180), Base mode, for the agent
//! handshake.
//!
//! Suite: DHKEM(X25519, HKDF-SHA256) / HKDF-SHA256 / ChaCha20-Poly1305 — the
//! mandatory-to-implement combination. The composition follows the RFC's
//! labeled key schedule exactly; the X25519, HKDF, and AEAD primitives come
//! from their vetted crates.
//!
//! The handshake only consumes the exporter interface: both ends derive a
//! shared exporter secret that seeds the secure session. Seal/open contexts
//! are also exposed for callers that need one-shot encryption to a peer's
//! static key.

use aead::{Aead, KeyInit, Payload};
use chacha20poly1305::ChaCha20Poly1305;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::SageError;

/// KEM id for DHKEM(X25519, HKDF-SHA256).
const KEM_ID: u16 = 0x0020;
/// KDF id for HKDF-SHA256.
const KDF_ID: u16 = 0x0001;
/// AEAD id for ChaCha20-Poly1305.
const AEAD_ID: u16 = 0x0003;

const NK: usize = 32;
const NN: usize = 12;
const NH: usize = 32;
/// Encapsulated-key length for X25519.
pub const ENC_LEN: usize = 32;
/// Exporter length used by the session layer.
pub const EXPORTER_LEN: usize = 32;

/// Pinned exporter context for session-seed export.
pub const SESSION_EXPORTER_CONTEXT: &[u8] = b"sage/session exporter v1";

/// Builds the pinned handshake info string. Both parties must supply the same
/// context id and DID pair or their exporters will silently diverge.
pub fn handshake_info(context_id: &str, initiator_did: &str, responder_did: &str) -> String {
    format!("sage/hpke-handshake v1|ctx:{context_id}|init:{initiator_did}|resp:{responder_did}")
}

fn suite_id() -> [u8; 10] {
    let mut id = [0u8; 10];
    id[..4].copy_from_slice(b"HPKE");
    id[4..6].copy_from_slice(&KEM_ID.to_be_bytes());
    id[6..8].copy_from_slice(&KDF_ID.to_be_bytes());
    id[8..10].copy_from_slice(&AEAD_ID.to_be_bytes());
    id
}

fn kem_suite_id() -> [u8; 5] {
    let mut id = [0u8; 5];
    id[..3].copy_from_slice(b"KEM");
    id[3..5].copy_from_slice(&KEM_ID.to_be_bytes());
    id
}

fn labeled_extract(suite: &[u8], salt: &[u8], label: &str, ikm: &[u8]) -> [u8; 32] {
    let mut labeled_ikm = Vec::with_capacity(7 + suite.len() + label.len() + ikm.len());
    labeled_ikm.extend_from_slice(b"HPKE-v1");
    labeled_ikm.extend_from_slice(suite);
    labeled_ikm.extend_from_slice(label.as_bytes());
    labeled_ikm.extend_from_slice(ikm);
    let (prk, _) = Hkdf::<Sha256>::extract(Some(salt), &labeled_ikm);
    prk.into()
}

fn labeled_expand(
    suite: &[u8],
    prk: &[u8; 32],
    label: &str,
    info: &[u8],
    len: usize,
) -> Result<Zeroizing<Vec<u8>>, SageError> {
    let mut labeled_info = Vec::with_capacity(9 + suite.len() + label.len() + info.len());
    labeled_info.extend_from_slice(&(len as u16).to_be_bytes());
    labeled_info.extend_from_slice(b"HPKE-v1");
    labeled_info.extend_from_slice(suite);
    labeled_info.extend_from_slice(label.as_bytes());
    labeled_info.extend_from_slice(info);

    let hk = Hkdf::<Sha256>::from_prk(prk)
        .map_err(|_| SageError::InvalidKemOutput("HKDF PRK rejected".into()))?;
    let mut okm = Zeroizing::new(vec![0u8; len]);
    hk.expand(&labeled_info, &mut okm)
        .map_err(|_| SageError::InvalidKemOutput("HKDF expand length invalid".into()))?;
    Ok(okm)
}

/// DHKEM ExtractAndExpand over an X25519 shared secret.
fn kem_shared_secret(dh: &x25519_dalek::SharedSecret, kem_context: &[u8]) -> Result<Zeroizing<Vec<u8>>, SageError> {
    if !dh.was_contributory() {
        return Err(SageError::InvalidKemOutput(
            "non-contributory X25519 shared secret".into(),
        ));
    }
    let suite = kem_suite_id();
    let eae_prk = labeled_extract(&suite, b"", "eae_prk", dh.as_bytes());
    labeled_expand(&suite, &eae_prk, "shared_secret", kem_context, 32)
}

struct Schedule {
    key: Zeroizing<Vec<u8>>,
    base_nonce: [u8; NN],
    exporter_secret: Zeroizing<Vec<u8>>,
}

/// RFC 9180 §5.1 key schedule, Base mode only.
fn key_schedule(shared_secret: &[u8], info: &[u8]) -> Result<Schedule, SageError> {
    let suite = suite_id();
    let psk_id_hash = labeled_extract(&suite, b"", "psk_id_hash", b"");
    let info_hash = labeled_extract(&suite, b"", "info_hash", info);

    let mut context = Vec::with_capacity(1 + 64);
    context.push(0x00); // mode_base
    context.extend_from_slice(&psk_id_hash);
    context.extend_from_slice(&info_hash);

    let secret = labeled_extract(&suite, shared_secret, "secret", b"");
    let key = labeled_expand(&suite, &secret, "key", &context, NK)?;
    let nonce_okm = labeled_expand(&suite, &secret, "base_nonce", &context, NN)?;
    let exporter_secret = labeled_expand(&suite, &secret, "exp", &context, NH)?;

    let mut base_nonce = [0u8; NN];
    base_nonce.copy_from_slice(&nonce_okm);
    Ok(Schedule { key, base_nonce, exporter_secret })
}

/// An established HPKE context; either end of one encapsulation.
pub struct Context {
    schedule: Schedule,
    seq: u64,
}

impl Context {
    fn new(schedule: Schedule) -> Self {
        Self { schedule, seq: 0 }
    }

    fn next_nonce(&mut self) -> Result<[u8; NN], SageError> {
        if self.seq == u64::MAX {
            return Err(SageError::InvalidKemOutput("HPKE sequence exhausted".into()));
        }
        let mut nonce = self.schedule.base_nonce;
        for (i, byte) in self.seq.to_be_bytes().iter().enumerate() {
            nonce[NN - 8 + i] ^= byte;
        }
        self.seq += 1;
        Ok(nonce)
    }

    /// Encrypt the next message in sequence.
    pub fn seal(&mut self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, SageError> {
        let nonce = self.next_nonce()?;
        let cipher = ChaCha20Poly1305::new_from_slice(&self.schedule.key)
            .map_err(|_| SageError::InvalidKemOutput("AEAD key length".into()))?;
        cipher
            .encrypt(chacha20poly1305::Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
            .map_err(|_| SageError::DecryptFailed)
    }

    /// Decrypt the next message in sequence. Out-of-order ciphertexts fail.
    pub fn open(&mut self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, SageError> {
        let nonce = self.next_nonce()?;
        let cipher = ChaCha20Poly1305::new_from_slice(&self.schedule.key)
            .map_err(|_| SageError::InvalidKemOutput("AEAD key length".into()))?;
        let plaintext = cipher
            .decrypt(chacha20poly1305::Nonce::from_slice(&nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| SageError::DecryptFailed);
        if plaintext.is_err() {
            // A failed open must not consume the sequence number.
            self.seq -= 1;
        }
        plaintext
    }

    /// RFC 9180 secret export.
    pub fn export(&self, exporter_context: &[u8], len: usize) -> Result<Zeroizing<Vec<u8>>, SageError> {
        let suite = suite_id();
        let mut prk = [0u8; 32];
        prk.copy_from_slice(&self.schedule.exporter_secret);
        labeled_expand(&suite, &prk, "sec", exporter_context, len)
    }
}

fn validate_enc(enc: &[u8]) -> Result<[u8; ENC_LEN], SageError> {
    enc.try_into().map_err(|_| {
        SageError::InvalidKemOutput(format!(
            "encapsulated key must be {ENC_LEN} bytes, got {}",
            enc.len()
        ))
    })
}

/// Sender side: encapsulate to the peer's static X25519 key and build the
/// sending context.
pub fn setup_sender(
    peer_public: &x25519_dalek::PublicKey,
    info: &[u8],
) -> Result<([u8; ENC_LEN], Context), SageError> {
    let ephemeral = x25519_dalek::EphemeralSecret::random_from_rng(OsRng);
    let enc = *x25519_dalek::PublicKey::from(&ephemeral).as_bytes();
    let dh = ephemeral.diffie_hellman(peer_public);

    let mut kem_context = Vec::with_capacity(2 * ENC_LEN);
    kem_context.extend_from_slice(&enc);
    kem_context.extend_from_slice(peer_public.as_bytes());

    let shared = kem_shared_secret(&dh, &kem_context)?;
    let schedule = key_schedule(&shared, info)?;
    Ok((enc, Context::new(schedule)))
}

/// Receiver side: decapsulate `enc` with our static X25519 key.
pub fn setup_receiver(
    self_private: &x25519_dalek::StaticSecret,
    enc: &[u8],
    info: &[u8],
) -> Result<Context, SageError> {
    let enc = validate_enc(enc)?;
    let peer_ephemeral = x25519_dalek::PublicKey::from(enc);
    let dh = self_private.diffie_hellman(&peer_ephemeral);

    let self_public = x25519_dalek::PublicKey::from(self_private);
    let mut kem_context = Vec::with_capacity(2 * ENC_LEN);
    kem_context.extend_from_slice(&enc);
    kem_context.extend_from_slice(self_public.as_bytes());

    let shared = kem_shared_secret(&dh, &kem_context)?;
    let schedule = key_schedule(&shared, info)?;
    Ok(Context::new(schedule))
}

/// Sender-side handshake: fresh encapsulation plus exporter export.
///
/// Returns the encapsulated key to transmit and the exporter secret that
/// seeds the session. The exporter is zeroized on drop.
pub fn derive_shared_secret_to_peer(
    peer_public: &x25519_dalek::PublicKey,
    info: &[u8],
    exporter_context: &[u8],
    exporter_len: usize,
) -> Result<([u8; ENC_LEN], Zeroizing<Vec<u8>>), SageError> {
    let (enc, context) = setup_sender(peer_public, info)?;
    let exporter = context.export(exporter_context, exporter_len)?;
    Ok((enc, exporter))
}

/// Receiver-side handshake: decapsulate and export the same secret.
pub fn open_shared_secret_with_priv(
    self_private: &x25519_dalek::StaticSecret,
    enc: &[u8],
    info: &[u8],
    exporter_context: &[u8],
    exporter_len: usize,
) -> Result<Zeroizing<Vec<u8>>, SageError> {
    let context = setup_receiver(self_private, enc, info)?;
    context.export(exporter_context, exporter_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::x25519;

    #[test]
    fn exporters_agree_across_ends() {
        let receiver = x25519::generate();
        let receiver_pub = x25519_dalek::PublicKey::from(&receiver);
        let info = handshake_info("ctx-001", "did:alice", "did:bob");

        let (enc, sender_exp) = derive_shared_secret_to_peer(
            &receiver_pub,
            info.as_bytes(),
            SESSION_EXPORTER_CONTEXT,
            EXPORTER_LEN,
        )
        .unwrap();
        let receiver_exp = open_shared_secret_with_priv(
            &receiver,
            &enc,
            info.as_bytes(),
            SESSION_EXPORTER_CONTEXT,
            EXPORTER_LEN,
        )
        .unwrap();
        assert_eq!(sender_exp.as_slice(), receiver_exp.as_slice());
        assert_eq!(sender_exp.len(), EXPORTER_LEN);
    }

    #[test]
    fn divergent_info_diverges_exporters() {
        let receiver = x25519::generate();
        let receiver_pub = x25519_dalek::PublicKey::from(&receiver);
        let (enc, sender_exp) = derive_shared_secret_to_peer(
            &receiver_pub,
            handshake_info("ctx-001", "did:alice", "did:bob").as_bytes(),
            SESSION_EXPORTER_CONTEXT,
            EXPORTER_LEN,
        )
        .unwrap();
        let receiver_exp = open_shared_secret_with_priv(
            &receiver,
            &enc,
            handshake_info("ctx-002", "did:alice", "did:bob").as_bytes(),
            SESSION_EXPORTER_CONTEXT,
            EXPORTER_LEN,
        )
        .unwrap();
        assert_ne!(sender_exp.as_slice(), receiver_exp.as_slice());
    }

    #[test]
    fn seal_open_round_trip_in_order() {
        let receiver = x25519::generate();
        let receiver_pub = x25519_dalek::PublicKey::from(&receiver);
        let info = b"mutual context";

        let (enc, mut sender) = setup_sender(&receiver_pub, info).unwrap();
        let mut recipient = setup_receiver(&receiver, &enc, info).unwrap();

        let ct1 = sender.seal(b"first", b"aad").unwrap();
        let ct2 = sender.seal(b"second", b"aad").unwrap();
        assert_eq!(recipient.open(&ct1, b"aad").unwrap(), b"first");
        assert_eq!(recipient.open(&ct2, b"aad").unwrap(), b"second");
    }

    #[test]
    fn out_of_order_open_fails() {
        let receiver = x25519::generate();
        let receiver_pub = x25519_dalek::PublicKey::from(&receiver);
        let (enc, mut sender) = setup_sender(&receiver_pub, b"i").unwrap();
        let mut recipient = setup_receiver(&receiver, &enc, b"i").unwrap();

        let _ct1 = sender.seal(b"first", b"").unwrap();
        let ct2 = sender.seal(b"second", b"").unwrap();
        assert!(recipient.open(&ct2, b"").is_err());
    }

    #[test]
    fn malformed_enc_rejected() {
        let receiver = x25519::generate();
        let err = open_shared_secret_with_priv(
            &receiver,
            &[0u8; 16],
            b"info",
            SESSION_EXPORTER_CONTEXT,
            EXPORTER_LEN,
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidKemOutput);
    }

    #[test]
    fn low_order_peer_point_rejected() {
        // The all-zero public key is a low-order point; DH yields all zeros.
        let zero_pub = x25519_dalek::PublicKey::from([0u8; 32]);
        let err = derive_shared_secret_to_peer(
            &zero_pub,
            b"info",
            SESSION_EXPORTER_CONTEXT,
            EXPORTER_LEN,
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidKemOutput);
    }
}
