//! Secure session derived from an HPKE exporter secret.
//!
//! Both peers feed the same 32-byte exporter through the session key
//! schedule and arrive at the same session id, encryption key, and MAC key.
//! The channel is ChaCha20-Poly1305 with direction-tagged counter nonces;
//! the covered-content MAC integrates with the RFC 9421 signature headers
//! under the `hmac-sha256` algorithm, keyed by session id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aead::{Aead, KeyInit, Payload};
use chacha20poly1305::ChaCha20Poly1305;
use chrono::{DateTime, Utc};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::did::AgentDid;
use crate::error::SageError;

/// Info string for session-id derivation.
pub const SESSION_ID_INFO: &[u8] = b"sage/hpke v1";
/// Info string for the encryption key.
pub const ENC_KEY_INFO: &[u8] = b"sage/session enc v1";
/// Info string for the MAC key.
pub const MAC_KEY_INFO: &[u8] = b"sage/session mac v1";

pub const SESSION_ID_LEN: usize = 16;
pub const MAC_TAG_LEN: usize = 32;

const NONCE_LEN: usize = 12;

/// Which end of the handshake this session handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    /// Direction tag for traffic this end sends.
    fn send_tag(&self) -> u8 {
        match self {
            Role::Initiator => 0x01,
            Role::Responder => 0x02,
        }
    }

    /// Direction tag for traffic this end receives.
    fn recv_tag(&self) -> u8 {
        match self {
            Role::Initiator => 0x02,
            Role::Responder => 0x01,
        }
    }
}

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Wall-clock lifetime of the session.
    pub ttl: Duration,
    /// Per-direction message budget.
    pub max_messages: u64,
    /// Accepted receive reorder span when decrypting with an explicit
    /// counter. Zero (the default) demands strict in-order delivery.
    pub reorder_window: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_messages: 1 << 20,
            reorder_window: 0,
        }
    }
}

/// Derive the deterministic session id from an exporter secret.
pub fn session_id_from_exporter(exporter: &[u8]) -> Result<String, SageError> {
    let hk = Hkdf::<Sha256>::new(Some(b""), exporter);
    let mut id = [0u8; SESSION_ID_LEN];
    hk.expand(SESSION_ID_INFO, &mut id)
        .map_err(|_| SageError::InvalidArgument("session id expand failed".into()))?;
    Ok(hex::encode(id))
}

fn expand_key(exporter: &[u8], info: &[u8]) -> Result<Secret<[u8; 32]>, SageError> {
    // The 32-byte exporter is used directly as the PRK, per the session
    // key schedule.
    let hk = Hkdf::<Sha256>::from_prk(exporter)
        .map_err(|_| SageError::InvalidArgument("exporter is not a valid PRK".into()))?;
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(info, &mut *key)
        .map_err(|_| SageError::InvalidArgument("session key expand failed".into()))?;
    Ok(Secret::new(*key))
}

#[derive(Debug)]
struct RecvState {
    /// Next expected counter for strict in-order receive.
    next: u64,
    /// Sliding bitmap over the `reorder_window` counters below `next`;
    /// bit `i` marks counter `next - 1 - i` as already consumed.
    seen: u64,
}

/// One established secure session.
pub struct Session {
    id: String,
    role: Role,
    peer_did: Option<AgentDid>,
    enc_key: Secret<[u8; 32]>,
    mac_key: Secret<[u8; 32]>,
    send_counter: AtomicU64,
    recv: Mutex<RecvState>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    max_messages: u64,
    reorder_window: u64,
    closed: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("peer_did", &self.peer_did)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Derive a session from an exporter secret.
    ///
    /// Consumes the exporter; its bytes are zeroized when this call returns.
    pub fn from_exporter(
        exporter: Zeroizing<Vec<u8>>,
        role: Role,
        peer_did: Option<AgentDid>,
        config: SessionConfig,
    ) -> Result<Self, SageError> {
        if exporter.len() != 32 {
            return Err(SageError::InvalidArgument(format!(
                "session exporter must be 32 bytes, got {}",
                exporter.len()
            )));
        }
        let id = session_id_from_exporter(&exporter)?;
        let enc_key = expand_key(&exporter, ENC_KEY_INFO)?;
        let mac_key = expand_key(&exporter, MAC_KEY_INFO)?;
        let created_at = Utc::now();
        let expires_at = created_at
            + chrono::Duration::from_std(config.ttl)
                .map_err(|_| SageError::InvalidArgument("session ttl out of range".into()))?;
        Ok(Self {
            id,
            role,
            peer_did,
            enc_key,
            mac_key,
            send_counter: AtomicU64::new(0),
            recv: Mutex::new(RecvState { next: 0, seen: 0 }),
            created_at,
            expires_at,
            max_messages: config.max_messages,
            reorder_window: config.reorder_window,
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer_did(&self) -> Option<&AgentDid> {
        self.peer_did.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the session still accepts traffic.
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && Utc::now() < self.expires_at
    }

    /// Mark the session closed. Key material is zeroized when the handle is
    /// dropped (the manager drops its reference on close).
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn check_open(&self) -> Result<(), SageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SageError::Expired(format!("session {} closed", self.id)));
        }
        if Utc::now() >= self.expires_at {
            return Err(SageError::Expired(format!("session {} ttl elapsed", self.id)));
        }
        Ok(())
    }

    fn nonce(tag: u8, counter: u64) -> [u8; NONCE_LEN] {
        // direction-tag(1) ‖ big-endian(counter, 11)
        let mut nonce = [0u8; NONCE_LEN];
        nonce[0] = tag;
        nonce[4..].copy_from_slice(&counter.to_be_bytes());
        nonce
    }

    fn cipher(&self) -> Result<ChaCha20Poly1305, SageError> {
        ChaCha20Poly1305::new_from_slice(self.enc_key.expose_secret())
            .map_err(|_| SageError::InvalidArgument("session key length".into()))
    }

    /// Encrypt a message toward the peer.
    ///
    /// Callers serialize encrypts at the session level; the counter itself is
    /// atomic so a misuse cannot reuse a nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, SageError> {
        self.check_open()?;
        let counter = self.send_counter.fetch_add(1, Ordering::AcqRel);
        if counter >= self.max_messages {
            self.close();
            return Err(SageError::Expired(format!(
                "session {} message budget exhausted",
                self.id
            )));
        }
        let nonce = Self::nonce(self.role.send_tag(), counter);
        self.cipher()?
            .encrypt(
                chacha20poly1305::Nonce::from_slice(&nonce),
                Payload { msg: plaintext, aad: self.id.as_bytes() },
            )
            .map_err(|_| SageError::DecryptFailed)
    }

    /// Decrypt the next in-order message from the peer.
    ///
    /// Strict monotonic: the ciphertext must have been sealed at exactly the
    /// next expected counter. A failed open never advances the counter.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, SageError> {
        self.check_open()?;
        let mut recv = self.recv.lock();
        if recv.next >= self.max_messages {
            self.close();
            return Err(SageError::Expired(format!(
                "session {} message budget exhausted",
                self.id
            )));
        }
        let nonce = Self::nonce(self.role.recv_tag(), recv.next);
        let plaintext = self
            .cipher()?
            .decrypt(
                chacha20poly1305::Nonce::from_slice(&nonce),
                Payload { msg: ciphertext, aad: self.id.as_bytes() },
            )
            .map_err(|_| SageError::DecryptFailed)?;
        recv.next += 1;
        recv.seen = (recv.seen << 1) | 1;
        Ok(plaintext)
    }

    /// Decrypt a message sealed at an explicit counter.
    ///
    /// Within the configured reorder window, out-of-order ciphertexts are
    /// accepted once each (bitmap anti-replay); outside it, or with a zero
    /// window, regression fails `out-of-order`.
    pub fn decrypt_at(&self, counter: u64, ciphertext: &[u8]) -> Result<Vec<u8>, SageError> {
        self.check_open()?;
        if counter >= self.max_messages {
            return Err(SageError::Expired(format!(
                "session {} message budget exhausted",
                self.id
            )));
        }
        let mut recv = self.recv.lock();
        if counter < recv.next {
            let lag = recv.next - counter;
            if self.reorder_window == 0 || lag > self.reorder_window || lag > 64 {
                return Err(SageError::OutOfOrder(format!(
                    "counter {counter} below next expected {}",
                    recv.next
                )));
            }
            if recv.seen >> (lag - 1) & 1 == 1 {
                return Err(SageError::Replay { scope: format!("session:{}", self.id) });
            }
        }

        let nonce = Self::nonce(self.role.recv_tag(), counter);
        let plaintext = self
            .cipher()?
            .decrypt(
                chacha20poly1305::Nonce::from_slice(&nonce),
                Payload { msg: ciphertext, aad: self.id.as_bytes() },
            )
            .map_err(|_| SageError::DecryptFailed)?;

        if counter < recv.next {
            let lag = recv.next - counter;
            recv.seen |= 1 << (lag - 1);
        } else {
            let advance = counter - recv.next + 1;
            recv.seen = if advance >= 64 { 0 } else { recv.seen << advance };
            recv.seen |= 1;
            recv.next = counter + 1;
        }
        Ok(plaintext)
    }

    /// MAC over covered content: HMAC-SHA-256 with the session MAC key.
    pub fn sign_covered(&self, covered: &[u8]) -> Result<[u8; MAC_TAG_LEN], SageError> {
        self.check_open()?;
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(self.mac_key.expose_secret())
            .map_err(|_| SageError::InvalidArgument("MAC key length".into()))?;
        mac.update(covered);
        let tag = mac.finalize().into_bytes();
        let mut out = [0u8; MAC_TAG_LEN];
        out.copy_from_slice(&tag);
        Ok(out)
    }

    /// Constant-time verification of a covered-content MAC.
    pub fn verify_covered(&self, covered: &[u8], tag: &[u8]) -> Result<(), SageError> {
        self.check_open()?;
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(self.mac_key.expose_secret())
            .map_err(|_| SageError::InvalidArgument("MAC key length".into()))?;
        mac.update(covered);
        let computed = mac.finalize().into_bytes();
        if bool::from(computed.as_slice().ct_eq(tag)) {
            Ok(())
        } else {
            Err(SageError::InvalidSignature("session MAC mismatch".into()))
        }
    }
}

/// In-memory registry of live sessions, keyed by session id.
///
/// Inbound session-MAC verification resolves its key through this registry
/// (`keyid` carries the session id). Expired entries are dropped by
/// [`SessionManager::sweep`] or on access.
#[derive(Default)]
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session, returning the shared handle.
    pub fn insert(&self, session: Session) -> Arc<Session> {
        let handle = Arc::new(session);
        self.sessions
            .lock()
            .insert(handle.id().to_owned(), Arc::clone(&handle));
        handle
    }

    /// Look up a live session. Expired handles are evicted, not returned.
    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.lock();
        match sessions.get(session_id) {
            Some(handle) if handle.is_open() => Some(Arc::clone(handle)),
            Some(_) => {
                sessions.remove(session_id);
                None
            }
            None => None,
        }
    }

    /// Close and drop a session. Keys are zeroized once the last handle goes.
    pub fn close(&self, session_id: &str) {
        if let Some(handle) = self.sessions.lock().remove(session_id) {
            handle.close();
        }
    }

    /// Drop every expired or closed session.
    pub fn sweep(&self) {
        self.sessions.lock().retain(|_, s| s.is_open());
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hpke;
    use crate::keys::x25519;

    fn paired_sessions(config: SessionConfig) -> (Session, Session) {
        let receiver = x25519::generate();
        let receiver_pub = x25519_dalek::PublicKey::from(&receiver);
        let info = hpke::handshake_info("ctx-001", "did:sage:test:alice", "did:sage:test:bob");
        let (enc, exp_a) = hpke::derive_shared_secret_to_peer(
            &receiver_pub,
            info.as_bytes(),
            hpke::SESSION_EXPORTER_CONTEXT,
            hpke::EXPORTER_LEN,
        )
        .unwrap();
        let exp_b = hpke::open_shared_secret_with_priv(
            &receiver,
            &enc,
            info.as_bytes(),
            hpke::SESSION_EXPORTER_CONTEXT,
            hpke::EXPORTER_LEN,
        )
        .unwrap();
        let a = Session::from_exporter(exp_a, Role::Initiator, None, config.clone()).unwrap();
        let b = Session::from_exporter(exp_b, Role::Responder, None, config).unwrap();
        (a, b)
    }

    #[test]
    fn both_ends_derive_the_same_session() {
        let (a, b) = paired_sessions(SessionConfig::default());
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id().len(), 2 * SESSION_ID_LEN);

        let ct = a.encrypt(b"hello, secure world").unwrap();
        assert_eq!(b.decrypt(&ct).unwrap(), b"hello, secure world");

        let ct = b.encrypt(b"and back").unwrap();
        assert_eq!(a.decrypt(&ct).unwrap(), b"and back");
    }

    #[test]
    fn directions_use_distinct_keystreams() {
        let (a, b) = paired_sessions(SessionConfig::default());
        // A message sealed initiator→responder must not open as
        // responder→initiator traffic.
        let ct = a.encrypt(b"directional").unwrap();
        assert!(a.decrypt(&ct).is_err());
        assert_eq!(b.decrypt(&ct).unwrap(), b"directional");
    }

    #[test]
    fn failed_decrypt_does_not_advance() {
        let (a, b) = paired_sessions(SessionConfig::default());
        let ct1 = a.encrypt(b"one").unwrap();
        let mut bad = ct1.clone();
        bad[0] ^= 0x80;
        assert!(b.decrypt(&bad).is_err());
        // Counter unchanged: the genuine ciphertext still opens.
        assert_eq!(b.decrypt(&ct1).unwrap(), b"one");
    }

    #[test]
    fn strict_ordering_by_default() {
        let (a, b) = paired_sessions(SessionConfig::default());
        let _ct1 = a.encrypt(b"one").unwrap();
        let ct2 = a.encrypt(b"two").unwrap();
        assert!(b.decrypt(&ct2).is_err());
    }

    #[test]
    fn reorder_window_accepts_each_counter_once() {
        let config = SessionConfig { reorder_window: 8, ..Default::default() };
        let (a, b) = paired_sessions(config);
        let ct0 = a.encrypt(b"zero").unwrap();
        let ct1 = a.encrypt(b"one").unwrap();
        let ct2 = a.encrypt(b"two").unwrap();

        assert_eq!(b.decrypt_at(2, &ct2).unwrap(), b"two");
        assert_eq!(b.decrypt_at(0, &ct0).unwrap(), b"zero");
        // Replaying an already-consumed counter is rejected.
        let err = b.decrypt_at(0, &ct0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Replay);
        assert_eq!(b.decrypt_at(1, &ct1).unwrap(), b"one");
    }

    #[test]
    fn covered_mac_round_trip() {
        let (a, b) = paired_sessions(SessionConfig::default());
        let tag = a.sign_covered(b"\"@method\": POST").unwrap();
        assert_eq!(tag.len(), MAC_TAG_LEN);
        b.verify_covered(b"\"@method\": POST", &tag).unwrap();
        assert!(b.verify_covered(b"\"@method\": GET", &tag).is_err());
        assert!(b.verify_covered(b"\"@method\": POST", &tag[..31]).is_err());
    }

    #[test]
    fn message_budget_closes_session() {
        let config = SessionConfig { max_messages: 2, ..Default::default() };
        let (a, _b) = paired_sessions(config);
        a.encrypt(b"1").unwrap();
        a.encrypt(b"2").unwrap();
        let err = a.encrypt(b"3").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Expired);
        assert!(!a.is_open());
    }

    #[test]
    fn closed_sessions_refuse_traffic() {
        let (a, b) = paired_sessions(SessionConfig::default());
        let ct = a.encrypt(b"x").unwrap();
        b.close();
        assert_eq!(b.decrypt(&ct).unwrap_err().kind(), crate::error::ErrorKind::Expired);
        assert!(b.sign_covered(b"c").is_err());
    }

    #[test]
    fn manager_resolves_and_sweeps() {
        let manager = SessionManager::new();
        let (a, _b) = paired_sessions(SessionConfig::default());
        let id = a.id().to_owned();
        let handle = manager.insert(a);
        assert!(manager.get(&id).is_some());
        handle.close();
        assert!(manager.get(&id).is_none());
        manager.sweep();
        assert!(manager.is_empty());
    }
}
