//! DID resolution with read-through caching.
//!
//! Resolution queries the injected [`RegistryClient`], caches records with a
//! TTL under an LRU bound, and collapses concurrent reads of the same DID
//! into a single upstream call. Transient chain errors retry with bounded
//! exponential backoff; the caller's deadline bounds the total wait.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::agent::AgentMetadata;
use crate::did::AgentDid;
use crate::error::SageError;
use crate::keys::{PublicKey, SignatureAlgorithm};
use crate::registry::RegistryClient;

/// Resolver tuning.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// How long a cached record stays fresh.
    pub ttl: Duration,
    /// LRU capacity of the metadata cache.
    pub capacity: usize,
    /// Upstream attempts for transient chain errors (including the first).
    pub retry_attempts: u32,
    /// Backoff before the first retry; doubles per attempt.
    pub retry_base_delay: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            capacity: 1024,
            retry_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
        }
    }
}

struct CachedEntry {
    metadata: Arc<AgentMetadata>,
    expires_at: Instant,
}

type InflightMap = Mutex<HashMap<AgentDid, Arc<tokio::sync::Mutex<()>>>>;

/// Removes a DID's single-flight gate when the active fetcher exits, on
/// every path: success, upstream error, deadline, or cancellation. Inbound
/// DIDs are untrusted, so a leaked entry per failed lookup would let a
/// caller grow the map without bound.
struct InflightGuard<'a> {
    inflight: &'a InflightMap,
    did: &'a AgentDid,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.inflight.lock().remove(self.did);
    }
}

/// Caching DID resolver over an injected registry client.
pub struct Resolver {
    client: Arc<dyn RegistryClient>,
    config: ResolverConfig,
    cache: Mutex<LruCache<AgentDid, CachedEntry>>,
    /// Per-DID gates so concurrent misses collapse into one upstream read.
    inflight: InflightMap,
}

impl Resolver {
    pub fn new(client: Arc<dyn RegistryClient>, config: ResolverConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            client,
            config,
            cache: Mutex::new(LruCache::new(capacity)),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_defaults(client: Arc<dyn RegistryClient>) -> Self {
        Self::new(client, ResolverConfig::default())
    }

    /// Resolve a DID, serving from cache when fresh.
    pub async fn resolve(&self, did: &AgentDid) -> Result<Arc<AgentMetadata>, SageError> {
        self.resolve_inner(did, None).await
    }

    /// Resolve with a deadline bounding cache misses' upstream time.
    pub async fn resolve_with_deadline(
        &self,
        did: &AgentDid,
        deadline: Instant,
    ) -> Result<Arc<AgentMetadata>, SageError> {
        self.resolve_inner(did, Some(deadline)).await
    }

    async fn resolve_inner(
        &self,
        did: &AgentDid,
        deadline: Option<Instant>,
    ) -> Result<Arc<AgentMetadata>, SageError> {
        if let Some(hit) = self.cache_lookup(did) {
            debug!(did = %did, "resolver cache hit");
            return Ok(hit);
        }

        let gate = {
            let mut inflight = self.inflight.lock();
            Arc::clone(
                inflight
                    .entry(did.clone())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        // Waiters queue here while one task reads upstream. Dropping this
        // future releases the slot.
        let _gate_guard = gate.lock().await;
        // We are the active fetcher: drop the gate entry on every exit.
        let _inflight_guard = InflightGuard { inflight: &self.inflight, did };

        // A predecessor may have populated the cache while we waited.
        if let Some(hit) = self.cache_lookup(did) {
            return Ok(hit);
        }

        debug!(did = %did, "resolver cache miss, reading registry");
        let fetch = self.fetch_with_retry(did);
        let metadata = match deadline {
            Some(at) => tokio::time::timeout_at(at.into(), fetch)
                .await
                .map_err(|_| SageError::DeadlineExceeded)??,
            None => fetch.await?,
        };

        let metadata = Arc::new(metadata);
        self.cache.lock().put(
            did.clone(),
            CachedEntry {
                metadata: Arc::clone(&metadata),
                expires_at: Instant::now() + self.config.ttl,
            },
        );
        Ok(metadata)
    }

    fn cache_lookup(&self, did: &AgentDid) -> Option<Arc<AgentMetadata>> {
        let mut cache = self.cache.lock();
        match cache.get(did) {
            Some(entry) if entry.expires_at > Instant::now() => {
                Some(Arc::clone(&entry.metadata))
            }
            Some(_) => {
                cache.pop(did);
                None
            }
            None => None,
        }
    }

    async fn fetch_with_retry(&self, did: &AgentDid) -> Result<AgentMetadata, SageError> {
        let mut attempt = 0u32;
        loop {
            match self.client.get_agent(did).await {
                Ok(metadata) => return Ok(metadata),
                Err(e) if e.is_transient() && attempt + 1 < self.config.retry_attempts => {
                    let delay = self.config.retry_base_delay * 2u32.saturating_pow(attempt);
                    warn!(did = %did, attempt, "transient registry error, retrying: {e}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drop any cached record for a DID.
    pub fn invalidate(&self, did: &AgentDid) {
        self.cache.lock().pop(did);
    }

    /// Force a read-through, replacing the cached record.
    pub async fn refresh(&self, did: &AgentDid) -> Result<Arc<AgentMetadata>, SageError> {
        self.invalidate(did);
        self.resolve(did).await
    }

    /// Fresh activation check, bypassing the cache.
    pub async fn is_active(&self, did: &AgentDid) -> Result<bool, SageError> {
        self.client.is_active(did).await
    }

    /// Uncached lookup by owner address.
    pub async fn resolve_by_address(
        &self,
        address: &str,
    ) -> Result<AgentMetadata, SageError> {
        self.client.get_agent_by_address(address).await
    }

    /// First registered key compatible with `hint`, parsed.
    pub async fn resolve_public_key(
        &self,
        did: &AgentDid,
        hint: SignatureAlgorithm,
    ) -> Result<PublicKey, SageError> {
        let metadata = self.resolve(did).await?;
        metadata.key_for_algorithm(hint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentKey;
    use crate::keys::{KeyPair, KeyType};
    use crate::registry::StaticRegistry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn sample_agent(did: &str) -> AgentMetadata {
        AgentMetadata {
            did: AgentDid::parse(did).unwrap(),
            name: "sample".into(),
            owner: "0xabc".into(),
            endpoint: "https://agent.example".into(),
            active: true,
            registered_at: chrono::Utc::now(),
            keys: vec![AgentKey {
                key_type: KeyType::Ed25519,
                public_key: KeyPair::generate(KeyType::Ed25519).public_key().to_bytes(),
                verified: true,
                registered_at: chrono::Utc::now(),
            }],
            capabilities: serde_json::Map::new(),
        }
    }

    /// Counts upstream calls; optionally fails with transient errors first.
    struct CountingClient {
        inner: StaticRegistry,
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl RegistryClient for CountingClient {
        async fn get_agent(&self, did: &AgentDid) -> Result<AgentMetadata, SageError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(SageError::ChainError {
                    message: "rpc timeout".into(),
                    transient: true,
                });
            }
            self.inner.get_agent(did).await
        }

        async fn get_agent_by_address(&self, addr: &str) -> Result<AgentMetadata, SageError> {
            self.inner.get_agent_by_address(addr).await
        }

        async fn is_active(&self, did: &AgentDid) -> Result<bool, SageError> {
            self.inner.is_active(did).await
        }
    }

    fn counting_resolver(fail_first: u32) -> (Arc<CountingClient>, Resolver) {
        let registry = StaticRegistry::new();
        registry.insert(sample_agent("did:sage:test:a"));
        let client = Arc::new(CountingClient {
            inner: registry,
            calls: AtomicU32::new(0),
            fail_first,
        });
        let resolver = Resolver::new(
            Arc::clone(&client) as Arc<dyn RegistryClient>,
            ResolverConfig {
                retry_base_delay: Duration::from_millis(1),
                ..Default::default()
            },
        );
        (client, resolver)
    }

    #[tokio::test]
    async fn caches_within_ttl() {
        let (client, resolver) = counting_resolver(0);
        let did = AgentDid::parse("did:sage:test:a").unwrap();
        resolver.resolve(&did).await.unwrap();
        resolver.resolve(&did).await.unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        resolver.refresh(&did).await.unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_resolves_collapse() {
        let (client, resolver) = counting_resolver(0);
        let resolver = Arc::new(resolver);
        let did = AgentDid::parse("did:sage:test:a").unwrap();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let resolver = Arc::clone(&resolver);
            let did = did.clone();
            handles.push(tokio::spawn(async move { resolver.resolve(&did).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_errors_retry_then_succeed() {
        let (client, resolver) = counting_resolver(2);
        let did = AgentDid::parse("did:sage:test:a").unwrap();
        resolver.resolve(&did).await.unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unknown_did_is_not_found() {
        let (_client, resolver) = counting_resolver(0);
        let did = AgentDid::parse("did:sage:test:missing").unwrap();
        let err = resolver.resolve(&did).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn failed_resolutions_do_not_leak_inflight_entries() {
        let (_client, resolver) = counting_resolver(0);
        // A stream of distinct bogus DIDs must not grow the single-flight
        // map: each failed fetch removes its gate on the way out.
        for i in 0..32 {
            let did = AgentDid::parse(&format!("did:sage:test:bogus-{i}")).unwrap();
            assert!(resolver.resolve(&did).await.is_err());
        }
        assert!(resolver.inflight.lock().is_empty());

        // The success path cleans up too.
        let did = AgentDid::parse("did:sage:test:a").unwrap();
        resolver.resolve(&did).await.unwrap();
        assert!(resolver.inflight.lock().is_empty());
    }

    #[tokio::test]
    async fn deadline_bounds_upstream_wait() {
        struct HangingClient;
        #[async_trait]
        impl RegistryClient for HangingClient {
            async fn get_agent(&self, _did: &AgentDid) -> Result<AgentMetadata, SageError> {
                futures::future::pending().await
            }
            async fn get_agent_by_address(&self, _a: &str) -> Result<AgentMetadata, SageError> {
                futures::future::pending().await
            }
            async fn is_active(&self, _did: &AgentDid) -> Result<bool, SageError> {
                futures::future::pending().await
            }
        }

        let resolver = Resolver::with_defaults(Arc::new(HangingClient));
        let did = AgentDid::parse("did:sage:test:a").unwrap();
        let deadline = Instant::now() + Duration::from_millis(20);
        let err = resolver.resolve_with_deadline(&did, deadline).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DeadlineExceeded);
    }

    #[tokio::test]
    async fn resolves_compatible_public_key() {
        let (_client, resolver) = counting_resolver(0);
        let did = AgentDid::parse("did:sage:test:a").unwrap();
        let key = resolver
            .resolve_public_key(&did, SignatureAlgorithm::Ed25519)
            .await
            .unwrap();
        assert_eq!(key.key_type(), KeyType::Ed25519);
        let err = resolver
            .resolve_public_key(&did, SignatureAlgorithm::EcdsaSecp256k1Sha256)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NoCompatibleKey);
    }
}
