//! Top-level entry point bundling the shared services.
//!
//! A [`SageCore`] owns the resolver (over the injected registry client), the
//! verification service, the session registry, and the replay structures, so
//! an application constructs one value and drives everything through it. No
//! globals: two cores with two clients coexist in one process.

use std::sync::Arc;

use crate::did::AgentDid;
use crate::error::SageError;
use crate::hpke;
use crate::keys::KeyType;
use crate::message::Message;
use crate::registry::RegistryClient;
use crate::replay::{NonceStore, SequenceTracker};
use crate::request::SignableMessage;
use crate::resolver::{Resolver, ResolverConfig};
use crate::session::{Role, Session, SessionConfig, SessionManager};
use crate::verification::{VerificationOptions, VerificationResult, VerificationService};

/// Shared state for one agent-side deployment.
pub struct SageCore {
    resolver: Arc<Resolver>,
    verification: VerificationService,
    sessions: SessionManager,
    session_config: SessionConfig,
}

impl SageCore {
    pub fn builder(client: Arc<dyn RegistryClient>) -> SageCoreBuilder {
        SageCoreBuilder {
            client,
            resolver_config: ResolverConfig::default(),
            session_config: SessionConfig::default(),
            nonce_store: None,
        }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn verification(&self) -> &VerificationService {
        &self.verification
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Verify an inbound structured message end to end.
    pub async fn verify_message(
        &self,
        message: &Message,
        opts: &VerificationOptions,
    ) -> VerificationResult {
        self.verification.verify_message(message, opts).await
    }

    /// Verify an inbound transport request end to end.
    pub async fn verify_request(
        &self,
        request: &SignableMessage,
        opts: &VerificationOptions,
    ) -> VerificationResult {
        self.verification.verify_request(request, opts).await
    }

    /// Initiator side of the handshake: resolve the peer's key-agreement key
    /// from the registry, run HPKE, and register the resulting session.
    ///
    /// Returns the encapsulated key to transmit alongside the context id and
    /// the live session handle. The peer must call [`accept_session`] with
    /// the same context id and DID pair.
    ///
    /// [`accept_session`]: SageCore::accept_session
    pub async fn initiate_session(
        &self,
        self_did: &AgentDid,
        peer_did: &AgentDid,
        context_id: &str,
    ) -> Result<(Vec<u8>, Arc<Session>), SageError> {
        let peer = self.resolver.resolve(peer_did).await?;
        let peer_key = peer.key_of_type(KeyType::X25519)?;
        let peer_public = match peer_key {
            crate::keys::PublicKey::X25519(pk) => pk,
            _ => {
                return Err(SageError::NoCompatibleKey(
                    "peer has no X25519 key-agreement key".into(),
                ))
            }
        };

        let info = hpke::handshake_info(context_id, self_did.as_str(), peer_did.as_str());
        let (enc, exporter) = hpke::derive_shared_secret_to_peer(
            &peer_public,
            info.as_bytes(),
            hpke::SESSION_EXPORTER_CONTEXT,
            hpke::EXPORTER_LEN,
        )?;

        let session = Session::from_exporter(
            exporter,
            Role::Initiator,
            Some(peer_did.clone()),
            self.session_config.clone(),
        )?;
        Ok((enc.to_vec(), self.sessions.insert(session)))
    }

    /// Responder side of the handshake: decapsulate with our static X25519
    /// key and register the resulting session.
    ///
    /// `initiator_did` and `self_did` must be the same pair, in the same
    /// order, that the initiator used — the info string binds them.
    pub async fn accept_session(
        &self,
        initiator_did: &AgentDid,
        self_did: &AgentDid,
        self_key: &x25519_dalek::StaticSecret,
        context_id: &str,
        enc: &[u8],
    ) -> Result<Arc<Session>, SageError> {
        let info = hpke::handshake_info(context_id, initiator_did.as_str(), self_did.as_str());
        let exporter = hpke::open_shared_secret_with_priv(
            self_key,
            enc,
            info.as_bytes(),
            hpke::SESSION_EXPORTER_CONTEXT,
            hpke::EXPORTER_LEN,
        )?;

        let session = Session::from_exporter(
            exporter,
            Role::Responder,
            Some(initiator_did.clone()),
            self.session_config.clone(),
        )?;
        Ok(self.sessions.insert(session))
    }
}

/// Builder over the injected registry client.
pub struct SageCoreBuilder {
    client: Arc<dyn RegistryClient>,
    resolver_config: ResolverConfig,
    session_config: SessionConfig,
    nonce_store: Option<Arc<NonceStore>>,
}

impl SageCoreBuilder {
    pub fn resolver_config(mut self, config: ResolverConfig) -> Self {
        self.resolver_config = config;
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    pub fn nonce_store(mut self, store: Arc<NonceStore>) -> Self {
        self.nonce_store = Some(store);
        self
    }

    pub fn build(self) -> SageCore {
        let resolver = Arc::new(Resolver::new(self.client, self.resolver_config));
        let nonce_store = self.nonce_store.unwrap_or_default();
        let verification = VerificationService::with_stores(
            Arc::clone(&resolver),
            nonce_store,
            Arc::new(SequenceTracker::new()),
        );
        SageCore {
            resolver,
            verification,
            sessions: SessionManager::new(),
            session_config: self.session_config,
        }
    }
}
