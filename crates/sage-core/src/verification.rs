//! End-to-end inbound verification.
//!
//! Orchestrates DID resolution, key selection, signature verification,
//! replay protection, and policy checks (activation, declared-metadata
//! agreement, required capabilities). The outcome is a structured record so
//! callers can distinguish a replay from a bad signature without string
//! matching.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::agent::AgentMetadata;
use crate::error::{ErrorKind, SageError};
use crate::message::Message;
use crate::replay::{NonceStore, Scope, SequenceTracker};
use crate::request::SignableMessage;
use crate::resolver::Resolver;
use crate::verifier::{verify_message as verify_http, VerifyOptions};

/// Policy knobs for one verification.
#[derive(Debug, Clone)]
pub struct VerificationOptions {
    /// Reject messages from deactivated agents.
    pub require_active_agent: bool,
    /// Clock-skew tolerance in seconds; `None` disables.
    pub max_clock_skew: Option<i64>,
    /// Maximum accepted signature age in seconds; `None` disables.
    pub max_age: Option<i64>,
    /// Capabilities that must be present and truthy on the resolved agent.
    pub required_capabilities: Vec<String>,
    /// Compare declared `name` / `owner` / `endpoint` metadata against the
    /// resolved record.
    pub verify_metadata: bool,
}

impl Default for VerificationOptions {
    fn default() -> Self {
        Self {
            require_active_agent: true,
            max_clock_skew: Some(300),
            max_age: Some(600),
            required_capabilities: Vec::new(),
            verify_metadata: false,
        }
    }
}

/// Outcome of a verification.
#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub valid: bool,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
    pub agent_name: Option<String>,
    pub agent_owner: Option<String>,
    pub capabilities: Option<serde_json::Map<String, Value>>,
    pub verified_at: DateTime<Utc>,
}

impl VerificationResult {
    fn failure(err: &SageError, metadata: Option<&AgentMetadata>) -> Self {
        Self {
            valid: false,
            error_kind: Some(err.kind()),
            error: Some(err.to_string()),
            agent_name: metadata.map(|m| m.name.clone()),
            agent_owner: metadata.map(|m| m.owner.clone()),
            capabilities: metadata.map(|m| m.capabilities.clone()),
            verified_at: Utc::now(),
        }
    }

    fn success(metadata: &AgentMetadata) -> Self {
        Self {
            valid: true,
            error_kind: None,
            error: None,
            agent_name: Some(metadata.name.clone()),
            agent_owner: Some(metadata.owner.clone()),
            capabilities: Some(metadata.capabilities.clone()),
            verified_at: Utc::now(),
        }
    }
}

/// Verification orchestrator: resolver plus the shared replay structures.
pub struct VerificationService {
    resolver: Arc<Resolver>,
    nonce_store: Arc<NonceStore>,
    sequence: Arc<SequenceTracker>,
}

impl VerificationService {
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self {
            resolver,
            nonce_store: Arc::new(NonceStore::default()),
            sequence: Arc::new(SequenceTracker::new()),
        }
    }

    pub fn with_stores(
        resolver: Arc<Resolver>,
        nonce_store: Arc<NonceStore>,
        sequence: Arc<SequenceTracker>,
    ) -> Self {
        Self { resolver, nonce_store, sequence }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn nonce_store(&self) -> &NonceStore {
        &self.nonce_store
    }

    /// Verify a structured [`Message`] end to end.
    pub async fn verify_message(
        &self,
        message: &Message,
        opts: &VerificationOptions,
    ) -> VerificationResult {
        let metadata = match self.resolver.resolve(message.agent_did()).await {
            Ok(m) => m,
            Err(e) => return VerificationResult::failure(&e, None),
        };
        debug!(did = %message.agent_did(), agent = %metadata.name, "verifying inbound message");

        match self.verify_message_inner(message, &metadata, opts).await {
            Ok(()) => VerificationResult::success(&metadata),
            Err(e) => VerificationResult::failure(&e, Some(&metadata)),
        }
    }

    async fn verify_message_inner(
        &self,
        message: &Message,
        metadata: &AgentMetadata,
        opts: &VerificationOptions,
    ) -> Result<(), SageError> {
        if opts.require_active_agent && !metadata.active {
            return Err(SageError::Deactivated(message.agent_did().to_string()));
        }

        message.verify_basic()?;

        let algorithm = message.algorithm().ok_or_else(|| {
            SageError::InvalidArgument("message declares no signature algorithm".into())
        })?;
        let key = metadata.key_for_algorithm(algorithm)?;

        // Signature over the declared signed fields.
        message.verify(&key)?;

        self.check_freshness(message, opts)?;

        // Replay protection: burn the message nonce in the global scope.
        self.nonce_store.consume(Scope::Global, message.nonce())?;

        // Session-scoped ordering, when the message carries a sequence.
        if let (Some(session_id), Some(sequence)) = (
            message.metadata().get("session_id").and_then(Value::as_str),
            message.metadata().get("sequence").and_then(Value::as_u64),
        ) {
            self.sequence.check_and_advance(
                session_id,
                sequence,
                message.timestamp().timestamp_millis(),
            )?;
        }

        if opts.verify_metadata {
            self.check_declared_metadata(message, metadata)?;
        }

        self.check_capabilities(metadata, &opts.required_capabilities)?;
        Ok(())
    }

    fn check_freshness(
        &self,
        message: &Message,
        opts: &VerificationOptions,
    ) -> Result<(), SageError> {
        let now = Utc::now().timestamp();
        let ts = message.timestamp().timestamp();
        let skew = opts.max_clock_skew.unwrap_or(0).max(0);

        if opts.max_clock_skew.is_some() && ts - now > skew {
            return Err(SageError::Stale(format!(
                "timestamp {ts} is {}s in the future",
                ts - now
            )));
        }
        if let Some(max_age) = opts.max_age {
            if max_age > 0 && now - ts > max_age + skew {
                return Err(SageError::Stale(format!(
                    "timestamp {ts} exceeds max age {max_age}s"
                )));
            }
        }
        Ok(())
    }

    fn check_declared_metadata(
        &self,
        message: &Message,
        metadata: &AgentMetadata,
    ) -> Result<(), SageError> {
        let declared = [
            ("name", &metadata.name),
            ("owner", &metadata.owner),
            ("endpoint", &metadata.endpoint),
        ];
        for (field, resolved) in declared {
            if let Some(Value::String(claimed)) = message.metadata().get(field) {
                if claimed != resolved {
                    return Err(SageError::MetadataMismatch(format!(
                        "declared {field} {claimed:?} does not match registry {resolved:?}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_capabilities(
        &self,
        metadata: &AgentMetadata,
        required: &[String],
    ) -> Result<(), SageError> {
        let missing: Vec<&str> = required
            .iter()
            .filter(|c| !metadata.has_capability(c))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SageError::MissingCapabilities(missing.join(", ")))
        }
    }

    /// Verify a transport request carrying RFC 9421 signature headers plus
    /// the agent envelope.
    pub async fn verify_request(
        &self,
        request: &SignableMessage,
        opts: &VerificationOptions,
    ) -> VerificationResult {
        let headers: Vec<(&str, &str)> = request.headers().collect();
        let message = match crate::envelope::parse_from_headers(headers, request.body()) {
            Ok(m) => m,
            Err(e) => return VerificationResult::failure(&e, None),
        };

        let metadata = match self.resolver.resolve(message.agent_did()).await {
            Ok(m) => m,
            Err(e) => return VerificationResult::failure(&e, None),
        };

        match self
            .verify_request_inner(request, &message, &metadata, opts)
            .await
        {
            Ok(()) => VerificationResult::success(&metadata),
            Err(e) => VerificationResult::failure(&e, Some(&metadata)),
        }
    }

    async fn verify_request_inner(
        &self,
        request: &SignableMessage,
        message: &Message,
        metadata: &AgentMetadata,
        opts: &VerificationOptions,
    ) -> Result<(), SageError> {
        if opts.require_active_agent && !metadata.active {
            return Err(SageError::Deactivated(message.agent_did().to_string()));
        }

        let algorithm = message.algorithm().ok_or_else(|| {
            SageError::InvalidArgument("envelope declares no signature algorithm".into())
        })?;
        let key = metadata.key_for_algorithm(algorithm)?;

        let verify_opts = VerifyOptions {
            max_age: opts.max_age,
            max_clock_skew: opts.max_clock_skew,
            nonce_store: Some(&self.nonce_store),
            ..Default::default()
        };
        verify_http(request, &key, &verify_opts)?;

        if opts.verify_metadata {
            self.check_declared_metadata(message, metadata)?;
        }
        self.check_capabilities(metadata, &opts.required_capabilities)?;
        Ok(())
    }
}
