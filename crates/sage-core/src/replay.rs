//! Replay protection: the seen-nonce set and the per-session sequence
//! tracker.
//!
//! Both structures are shared across verification tasks and guard their maps
//! with short critical sections; no lock is ever held across I/O or crypto.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::SageError;

/// Binding scope of a nonce.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Handshake and long-term-key signatures.
    Global,
    /// Bound to one established session.
    Session(String),
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Global => f.write_str("global"),
            Scope::Session(id) => write!(f, "session:{id}"),
        }
    }
}

/// Tuning for [`NonceStore`].
#[derive(Debug, Clone)]
pub struct NonceStoreConfig {
    /// How long a consumed nonce stays hot.
    pub ttl: Duration,
    /// Minimum spacing between amortized expiry sweeps.
    pub cleanup_interval: Duration,
    /// Hard bound on live entries; exceeding it evicts the oldest half.
    pub max_entries: usize,
}

impl Default for NonceStoreConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            cleanup_interval: Duration::from_secs(60),
            max_entries: 65_536,
        }
    }
}

#[derive(Debug)]
struct NonceEntry {
    first_seen: Instant,
    expires: Instant,
}

#[derive(Debug)]
struct NonceState {
    entries: HashMap<(Scope, String), NonceEntry>,
    next_sweep: Instant,
}

/// Short-lived set of consumed nonces, keyed by `(scope, nonce)`.
#[derive(Debug)]
pub struct NonceStore {
    config: NonceStoreConfig,
    state: Mutex<NonceState>,
}

impl Default for NonceStore {
    fn default() -> Self {
        Self::new(NonceStoreConfig::default())
    }
}

impl NonceStore {
    pub fn new(config: NonceStoreConfig) -> Self {
        let next_sweep = Instant::now() + config.cleanup_interval;
        Self {
            config,
            state: Mutex::new(NonceState { entries: HashMap::new(), next_sweep }),
        }
    }

    /// Test-and-insert a nonce.
    ///
    /// Fails `replay` when the `(scope, nonce)` pair is already live. When
    /// the insert pushes the store past its bound, the oldest half is evicted
    /// and `replay-window-overflow` is returned; the nonce itself stays
    /// recorded, so a retry of the same message still reads as a replay.
    pub fn consume(&self, scope: Scope, nonce: &str) -> Result<(), SageError> {
        let now = Instant::now();
        let mut state = self.state.lock();

        if now >= state.next_sweep {
            state.entries.retain(|_, e| e.expires > now);
            state.next_sweep = now + self.config.cleanup_interval;
        }

        let key = (scope.clone(), nonce.to_owned());
        if let Some(entry) = state.entries.get(&key) {
            if entry.expires > now {
                return Err(SageError::Replay { scope: scope.to_string() });
            }
        }
        state.entries.insert(
            key,
            NonceEntry { first_seen: now, expires: now + self.config.ttl },
        );

        if state.entries.len() > self.config.max_entries {
            let evicted = self.evict_oldest_half(&mut state);
            return Err(SageError::ReplayWindowOverflow { evicted });
        }
        Ok(())
    }

    /// Drop every expired entry now, regardless of sweep cadence.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.entries.retain(|_, e| e.expires > now);
        state.next_sweep = now + self.config.cleanup_interval;
    }

    /// Live entry count (expired-but-unswept entries included).
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_oldest_half(&self, state: &mut NonceState) -> usize {
        let mut order: Vec<((Scope, String), Instant)> = state
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.first_seen))
            .collect();
        order.sort_by_key(|(_, seen)| *seen);
        let evict = order.len() / 2;
        for (key, _) in order.into_iter().take(evict) {
            state.entries.remove(&key);
        }
        evict
    }
}

/// Last accepted `(sequence, timestamp)` per session, for long-term-key
/// signed traffic.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    state: Mutex<HashMap<String, (u64, i64)>>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept the pair only if both values strictly exceed the stored ones.
    ///
    /// The first message of a session is accepted as presented and becomes
    /// the baseline.
    pub fn check_and_advance(
        &self,
        session_id: &str,
        sequence: u64,
        timestamp_millis: i64,
    ) -> Result<(), SageError> {
        let mut state = self.state.lock();
        match state.get(session_id) {
            None => {
                state.insert(session_id.to_owned(), (sequence, timestamp_millis));
                Ok(())
            }
            Some(&(last_seq, last_ts)) => {
                if sequence > last_seq && timestamp_millis > last_ts {
                    state.insert(session_id.to_owned(), (sequence, timestamp_millis));
                    Ok(())
                } else {
                    Err(SageError::OutOfOrder(format!(
                        "sequence {sequence} (last {last_seq}), timestamp {timestamp_millis} (last {last_ts})"
                    )))
                }
            }
        }
    }

    /// Forget a session's baseline (close or expiry).
    pub fn remove(&self, session_id: &str) {
        self.state.lock().remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_replay_within_scope_rejected() {
        let store = NonceStore::default();
        store.consume(Scope::Global, "n-1").unwrap();
        let err = store.consume(Scope::Global, "n-1").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Replay);
        // Same nonce in a different binding scope is distinct.
        store
            .consume(Scope::Session("s-1".into()), "n-1")
            .unwrap();
    }

    #[test]
    fn expired_nonces_can_be_reused() {
        let store = NonceStore::new(NonceStoreConfig {
            ttl: Duration::from_millis(0),
            ..Default::default()
        });
        store.consume(Scope::Global, "n").unwrap();
        // TTL zero: instantly expired, not a replay.
        store.consume(Scope::Global, "n").unwrap();
    }

    #[test]
    fn overflow_evicts_oldest_half_and_reports() {
        let store = NonceStore::new(NonceStoreConfig {
            max_entries: 4,
            ..Default::default()
        });
        for i in 0..4 {
            store.consume(Scope::Global, &format!("n-{i}")).unwrap();
        }
        let err = store.consume(Scope::Global, "n-4").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ReplayWindowOverflow);
        assert!(store.len() <= 3);
        // The triggering nonce survives the eviction.
        let err = store.consume(Scope::Global, "n-4").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Replay);
    }

    #[test]
    fn purge_respects_ttl() {
        let store = NonceStore::new(NonceStoreConfig {
            ttl: Duration::from_secs(300),
            ..Default::default()
        });
        store.consume(Scope::Global, "keep").unwrap();
        store.purge_expired();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn sequences_strictly_increase() {
        let tracker = SequenceTracker::new();
        tracker.check_and_advance("s", 1, 100).unwrap();
        tracker.check_and_advance("s", 2, 200).unwrap();
        // Equal sequence regresses.
        assert!(tracker.check_and_advance("s", 2, 300).is_err());
        // Timestamp must advance together with the sequence.
        assert!(tracker.check_and_advance("s", 3, 200).is_err());
        tracker.check_and_advance("s", 3, 301).unwrap();
    }

    #[test]
    fn first_use_sets_baseline() {
        let tracker = SequenceTracker::new();
        tracker.check_and_advance("s", 0, 0).unwrap();
        assert!(tracker.check_and_advance("s", 0, 0).is_err());
        tracker.remove("s");
        tracker.check_and_advance("s", 0, 0).unwrap();
    }
}
